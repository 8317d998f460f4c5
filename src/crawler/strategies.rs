//! List-page extraction strategies
//!
//! Each strategy is a pure function from a loaded document to candidate items.
//! The scanner runs all of them and keeps the largest result. Strategies report
//! everything they match; the blacklist is applied by the scanner afterwards.

use crate::config::IdentitySource;
use crate::crawler::site::SiteRules;
use crate::renderer::Document;
use crate::state::CandidateItem;
use crate::url::{canonicalize_identity, host_matches, resolve_link};
use scraper::ElementRef;
use url::Url;

/// Name used when an image carries no alt text
const UNNAMED: &str = "Unknown";

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, document: &Document, rules: &SiteRules) -> Vec<CandidateItem>;
}

/// Detail links that wrap an image
pub struct LinkedImageStrategy;

impl ExtractionStrategy for LinkedImageStrategy {
    fn name(&self) -> &'static str {
        "linked-image"
    }

    fn extract(&self, document: &Document, rules: &SiteRules) -> Vec<CandidateItem> {
        let Ok(base) = Url::parse(document.url()) else {
            return Vec::new();
        };

        document
            .select(&rules.detail_links)
            .filter_map(|link| {
                let image = link.select(&rules.images).next()?;
                build_candidate(&base, rules, &image, &link)
            })
            .collect()
    }
}

/// Images whose nearest enclosing link points at the site or a detail page
pub struct ImageAncestorStrategy;

impl ExtractionStrategy for ImageAncestorStrategy {
    fn name(&self) -> &'static str {
        "image-ancestor"
    }

    fn extract(&self, document: &Document, rules: &SiteRules) -> Vec<CandidateItem> {
        let Ok(base) = Url::parse(document.url()) else {
            return Vec::new();
        };

        document
            .select(&rules.images)
            .filter_map(|image| {
                let link = image
                    .ancestors()
                    .filter_map(ElementRef::wrap)
                    .find(|e| e.value().name() == "a")?;

                let href = link.value().attr("href")?;
                let resolved = resolve_link(href, &base)?;
                if !host_matches(&resolved, &rules.detail_host_hint) && !rules.is_detail_href(href)
                {
                    return None;
                }
                build_candidate(&base, rules, &image, &link)
            })
            .collect()
    }
}

/// The strategies every scanner runs, in tie-break order
pub fn default_strategies() -> Vec<Box<dyn ExtractionStrategy>> {
    vec![Box::new(LinkedImageStrategy), Box::new(ImageAncestorStrategy)]
}

fn build_candidate(
    base: &Url,
    rules: &SiteRules,
    image: &ElementRef<'_>,
    link: &ElementRef<'_>,
) -> Option<CandidateItem> {
    let src = image
        .value()
        .attr("src")
        .or_else(|| image.value().attr("data-src"))
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    let name = image
        .value()
        .attr("alt")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNNAMED);

    let href = link.value().attr("href")?;
    let detail = resolve_link(href, base)?;

    let identity = match rules.identity {
        IdentitySource::Image => canonicalize_identity(src, base).ok()?,
        IdentitySource::Detail => canonicalize_identity(href, base).ok()?,
    };

    Some(CandidateItem::new(identity, detail.to_string(), name).with_image_ref(src))
}
