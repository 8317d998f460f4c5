//! Compiled site layout rules
//!
//! Selectors are parsed once from [`SiteConfig`] and shared by the list scanner
//! and the detail fetcher. Everything here is synchronous and operates on an
//! already loaded [`Document`].

use crate::config::{IdentitySource, SiteConfig};
use crate::renderer::{element_text, Document};
use crate::state::normalize_attribution;
use crate::ConfigError;
use scraper::{ElementRef, Selector};

/// Parses a CSS selector, reporting failures as configuration errors
pub fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

/// Fields read from a detail page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub category: Option<String>,
    pub attribution: Option<String>,
}

impl Enrichment {
    pub fn is_resolved(&self) -> bool {
        self.category.is_some() && self.attribution.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SiteRules {
    pub list_url: String,
    pub no_results_text: String,
    pub detail_link_patterns: Vec<String>,
    pub detail_host_hint: String,
    pub excluded_image_markers: Vec<String>,
    pub blacklist: Vec<String>,
    pub identity: IdentitySource,

    pub detail_links: Selector,
    pub images: Selector,

    pub breadcrumb_item: Selector,
    pub breadcrumb_position: Selector,
    pub breadcrumb_name: Selector,
    pub category_position: u32,

    pub attribution: Selector,
    pub attribution_exclude_text: String,
    pub attribution_label: String,
    pub attribution_terminator: String,
    pub anonymous_name: String,
    pub anonymous_markers: Vec<String>,
}

impl SiteRules {
    pub fn from_config(site: &SiteConfig) -> Result<Self, ConfigError> {
        let link_selector = site
            .detail_link_patterns
            .iter()
            .map(|p| format!(r#"a[href*="{}"]"#, p.replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Self {
            list_url: site.list_url.clone(),
            no_results_text: site.no_results_text.clone(),
            detail_link_patterns: site.detail_link_patterns.clone(),
            detail_host_hint: site.detail_host_hint.clone(),
            excluded_image_markers: site.excluded_image_markers.clone(),
            blacklist: site.blacklist.iter().map(|b| b.to_lowercase()).collect(),
            identity: site.identity,
            detail_links: parse_selector(&link_selector)?,
            images: parse_selector("img")?,
            breadcrumb_item: parse_selector(&site.breadcrumb_item_selector)?,
            breadcrumb_position: parse_selector(&site.breadcrumb_position_selector)?,
            breadcrumb_name: parse_selector(&site.breadcrumb_name_selector)?,
            category_position: site.category_position,
            attribution: parse_selector(&site.attribution_selector)?,
            attribution_exclude_text: site.attribution_exclude_text.clone(),
            attribution_label: site.attribution_label.clone(),
            attribution_terminator: site.attribution_terminator.clone(),
            anonymous_name: site.anonymous_name.clone(),
            anonymous_markers: site.anonymous_markers.clone(),
        })
    }

    /// Returns true if a display name is navigation chrome rather than an item
    pub fn is_blacklisted(&self, name: &str) -> bool {
        let lower = name.trim().to_lowercase();
        self.blacklist
            .iter()
            .any(|term| !term.is_empty() && (lower == *term || lower.contains(term.as_str())))
    }

    /// Returns true if an image URL is a placeholder or card back
    pub fn is_excluded_image(&self, src: &str) -> bool {
        self.excluded_image_markers
            .iter()
            .any(|m| !m.is_empty() && src.contains(m.as_str()))
    }

    pub fn is_detail_href(&self, href: &str) -> bool {
        self.detail_link_patterns
            .iter()
            .any(|p| !p.is_empty() && href.contains(p.as_str()))
    }

    /// True when the page shows the end-of-partition text
    pub fn is_no_results(&self, document: &Document) -> bool {
        !self.no_results_text.is_empty() && document.contains_text(&self.no_results_text)
    }

    /// Reads category and attribution from a detail page
    pub fn enrich(&self, document: &Document) -> Enrichment {
        Enrichment {
            category: self.extract_category(document),
            attribution: self.extract_attribution(document),
        }
    }

    /// Category from the breadcrumb at the configured depth
    ///
    /// Falls back to the second-to-last breadcrumb when no item carries the
    /// configured position.
    pub fn extract_category(&self, document: &Document) -> Option<String> {
        let items: Vec<ElementRef<'_>> = document.select(&self.breadcrumb_item).collect();
        let wanted = self.category_position.to_string();

        let at_position = items.iter().find(|item| {
            item.select(&self.breadcrumb_position)
                .next()
                .and_then(|meta| meta.value().attr("content"))
                .map(|content| content.trim() == wanted)
                .unwrap_or(false)
        });

        let node = match at_position {
            Some(item) => Some(*item),
            None if items.len() >= 2 => Some(items[items.len() - 2]),
            None => None,
        }?;

        let name = node
            .select(&self.breadcrumb_name)
            .next()
            .map(|span| element_text(&span))?;
        let name = name.trim();

        if crate::state::is_unresolved_category(name) {
            None
        } else {
            Some(name.to_string())
        }
    }

    /// Attribution from the labelled text block, falling back to a profile link
    ///
    /// Returns None only when neither the label nor a profile link rendered.
    /// Placeholder values map to the anonymous name.
    pub fn extract_attribution(&self, document: &Document) -> Option<String> {
        let labelled = self.labelled_attribution(document);
        if let Some(value) = &labelled {
            if !self.is_placeholder(value) {
                return Some(self.normalize(value));
            }
        }

        let linked = document
            .select(&self.attribution)
            .map(|a| element_text(&a).trim().to_string())
            .find(|text| {
                !text.is_empty()
                    && (self.attribution_exclude_text.is_empty()
                        || !text.contains(&self.attribution_exclude_text))
            });

        match (linked, labelled) {
            (Some(name), _) => Some(self.normalize(&name)),
            (None, Some(value)) => Some(self.normalize(&value)),
            (None, None) => None,
        }
    }

    fn labelled_attribution(&self, document: &Document) -> Option<String> {
        if self.attribution_label.is_empty() {
            return None;
        }

        let text = document.body_text();
        let start = text.find(&self.attribution_label)? + self.attribution_label.len();
        let rest = &text[start..];
        let value = if self.attribution_terminator.is_empty() {
            rest.lines().next().unwrap_or("")
        } else {
            match rest.find(&self.attribution_terminator) {
                Some(end) => &rest[..end],
                None => rest.lines().next().unwrap_or(""),
            }
        };
        Some(value.trim().to_string())
    }

    fn is_placeholder(&self, value: &str) -> bool {
        self.normalize(value) == self.anonymous_name
    }

    fn normalize(&self, value: &str) -> String {
        normalize_attribution(value, &self.anonymous_name, &self.anonymous_markers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> SiteRules {
        SiteRules::from_config(&SiteConfig::default()).unwrap()
    }

    fn detail_page(position: &str, category: &str, body: &str) -> Document {
        Document::from_html(
            "https://shoob.gg/cards/info/1",
            &format!(
                r#"<html><body>
                <ol class="breadcrumb-new">
                  <li itemprop="itemListElement"><span itemprop="name">Home</span><meta itemprop="position" content="1"></li>
                  <li itemprop="itemListElement"><span itemprop="name">Cards</span><meta itemprop="position" content="2"></li>
                  <li itemprop="itemListElement"><span itemprop="name">{category}</span><meta itemprop="position" content="{position}"></li>
                  <li itemprop="itemListElement"><span itemprop="name">Card Name</span><meta itemprop="position" content="9"></li>
                </ol>
                {body}
                </body></html>"#
            ),
        )
    }

    #[test]
    fn test_category_at_position() {
        let doc = detail_page("3", " Naruto ", "");
        assert_eq!(rules().extract_category(&doc), Some("Naruto".to_string()));
    }

    #[test]
    fn test_category_falls_back_to_second_to_last() {
        let doc = detail_page("7", "Bleach", "");
        assert_eq!(rules().extract_category(&doc), Some("Bleach".to_string()));
    }

    #[test]
    fn test_category_missing() {
        let doc = Document::from_html("u", "<p>loading</p>");
        assert_eq!(rules().extract_category(&doc), None);

        let sentinel = detail_page("3", "Unknown Anime", "");
        assert_eq!(rules().extract_category(&sentinel), None);
    }

    #[test]
    fn test_attribution_from_label() {
        let doc = detail_page("3", "X", "<div>Card Maker: Kira <a href='/u/kira'>See the Maker</a></div>");
        assert_eq!(rules().extract_attribution(&doc), Some("Kira".to_string()));
    }

    #[test]
    fn test_attribution_from_link() {
        let doc = detail_page(
            "3",
            "X",
            "<a href='/u/1'>See all</a><a href='/u/2'> Mira </a>",
        );
        assert_eq!(rules().extract_attribution(&doc), Some("Mira".to_string()));
    }

    #[test]
    fn test_attribution_placeholder_normalizes() {
        let doc = detail_page("3", "X", "<div>Card Maker: Official See the Maker</div>");
        assert_eq!(rules().extract_attribution(&doc), Some("Anonymous".to_string()));
    }

    #[test]
    fn test_attribution_absent() {
        let doc = detail_page("3", "X", "<p>nothing here</p>");
        assert_eq!(rules().extract_attribution(&doc), None);
        assert!(!rules().enrich(&doc).is_resolved());
    }

    #[test]
    fn test_blacklist_and_exclusions() {
        let rules = rules();
        assert!(rules.is_blacklisted("Shoob Home"));
        assert!(rules.is_blacklisted(" MENU "));
        assert!(!rules.is_blacklisted("Sakura"));
        assert!(rules.is_excluded_image("https://cdn/card_back.png"));
        assert!(!rules.is_excluded_image("https://cdn/sakura.png"));
        assert!(rules.is_detail_href("https://shoob.gg/cards/info/9"));
    }

    #[test]
    fn test_no_results_sentinel() {
        let rules = rules();
        let end = Document::from_html("u", "<body><p>No cards found</p></body>");
        let page = Document::from_html("u", "<body><p>cards</p></body>");
        assert!(rules.is_no_results(&end));
        assert!(!rules.is_no_results(&page));
    }
}
