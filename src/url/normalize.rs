use crate::UrlError;
use url::Url;

/// Query parameters that never contribute to an item's identity
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "ref",
];

/// Schemes that never point at a loadable page or image
const IGNORED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "blob:"];

/// Resolves an attribute value found on a page into an absolute http(s) URL
///
/// Returns None for empty values, fragment-only links, non-web schemes, and
/// anything that fails to parse.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use gleaner::url::resolve_link;
///
/// let base = Url::parse("https://example.com/cards?page=2").unwrap();
/// let url = resolve_link("/cards/info/42", &base).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/cards/info/42");
/// assert!(resolve_link("javascript:void(0)", &base).is_none());
/// ```
pub fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if IGNORED_SCHEMES.iter().any(|s| lowered.starts_with(s)) {
        return None;
    }

    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Canonical identity for an item URL
///
/// # Normalization Steps
///
/// 1. Resolve against the page URL; reject non-http(s) results
/// 2. Lowercase the host (done by the parser)
/// 3. Remove dot segments (done by the parser)
/// 4. Remove the fragment
/// 5. Remove tracking query parameters, keeping the order of the rest
/// 6. Remove an empty query string
///
/// # Examples
///
/// ```
/// use url::Url;
/// use gleaner::url::canonicalize_identity;
///
/// let base = Url::parse("https://example.com/cards").unwrap();
/// let id = canonicalize_identity("//CDN.example.com/a/../img.png?utm_source=x#top", &base).unwrap();
/// assert_eq!(id, "https://cdn.example.com/img.png");
/// ```
pub fn canonicalize_identity(href: &str, base: &Url) -> Result<String, UrlError> {
    let mut url = resolve_link(href, base)
        .ok_or_else(|| UrlError::Parse(format!("cannot resolve '{}' against {}", href, base)))?;

    if url.host_str().is_none() {
        return Err(UrlError::Malformed(format!("'{}' has no host", href)));
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    Ok(url.to_string())
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
