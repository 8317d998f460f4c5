//! URL handling module for Gleaner
//!
//! This module provides list-page URL rendering, link resolution, identity
//! canonicalization, and host matching.

mod domain;
mod normalize;

use crate::state::WorkCoordinate;
use crate::UrlError;
use url::Url;

// Re-export main functions
pub use domain::{extract_domain, host_matches};
pub use normalize::{canonicalize_identity, resolve_link};

/// Renders the list-page URL for a coordinate
///
/// The template takes `{partition}` and `{page}` placeholders.
///
/// # Examples
///
/// ```
/// use gleaner::state::WorkCoordinate;
/// use gleaner::url::render_list_url;
///
/// let url = render_list_url(
///     "https://example.com/cards?page={page}&tier={partition}",
///     &WorkCoordinate::new("S", 4),
/// )
/// .unwrap();
/// assert_eq!(url.as_str(), "https://example.com/cards?page=4&tier=S");
/// ```
pub fn render_list_url(template: &str, coordinate: &WorkCoordinate) -> Result<Url, UrlError> {
    let rendered = template
        .replace("{partition}", &coordinate.partition)
        .replace("{page}", &coordinate.page.to_string());

    let url = Url::parse(&rendered).map_err(|e| UrlError::Parse(format!("{}: {}", rendered, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            other
        ))),
    }
}
