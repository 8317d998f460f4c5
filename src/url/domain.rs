use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use gleaner::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns true if the URL's host contains `hint` (case-insensitive)
///
/// An empty hint matches every URL with a host.
pub fn host_matches(url: &Url, hint: &str) -> bool {
    match extract_domain(url) {
        Some(host) => hint.is_empty() || host.contains(&hint.to_lowercase()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_subdomain() {
        let url = Url::parse("https://blog.example.com/post").unwrap();
        assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
    }

    #[test]
    fn test_extract_with_port() {
        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(extract_domain(&url), Some("127.0.0.1".to_string()));
    }

    #[test]
    fn test_host_matches() {
        let url = Url::parse("https://cdn.Shoob.gg/img.png").unwrap();
        assert!(host_matches(&url, "shoob.gg"));
        assert!(host_matches(&url, "SHOOB"));
        assert!(host_matches(&url, ""));
        assert!(!host_matches(&url, "example.com"));
    }
}
