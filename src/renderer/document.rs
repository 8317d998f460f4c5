use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

/// Raw result of a navigation: the final URL and the returned markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSource {
    pub url: String,
    pub status: u16,
    pub html: String,
}

impl PageSource {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            html: html.into(),
        }
    }
}

/// A parsed, read-only view over a loaded page
///
/// Parsing happens on demand and the document never outlives the synchronous
/// extraction that uses it.
pub struct Document {
    url: String,
    html: Html,
}

impl Document {
    pub fn parse(source: &PageSource) -> Self {
        Self::from_html(&source.url, &source.html)
    }

    pub fn from_html(url: &str, html: &str) -> Self {
        Self {
            url: url.to_string(),
            html: Html::parse_document(html),
        }
    }

    /// URL the document was loaded from (after redirects)
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn select<'a, 'b>(&'a self, selector: &'b Selector) -> scraper::html::Select<'a, 'b> {
        self.html.select(selector)
    }

    pub fn has(&self, selector: &Selector) -> bool {
        self.html.select(selector).next().is_some()
    }

    /// Concatenated text of the body (or the whole document when there is no body)
    pub fn body_text(&self) -> String {
        let body = Selector::parse("body").ok();
        match body.as_ref().and_then(|s| self.html.select(s).next()) {
            Some(body) => element_text(&body),
            None => self.html.root_element().text().collect(),
        }
    }

    /// Case-insensitive search of the body text
    pub fn contains_text(&self, needle: &str) -> bool {
        self.body_text()
            .to_lowercase()
            .contains(&needle.to_lowercase())
    }
}

/// Concatenated text content of an element
pub fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

/// Page-class specific resource filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Image,
    Font,
    Media,
    Stylesheet,
}

/// What a session is leased for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionProfile {
    /// List scans read image attributes and never suppress images
    ListScan,
    /// Detail pages only need text and may skip heavy resources
    Metadata,
}

impl SessionProfile {
    pub fn suppressed_resources(&self) -> &'static [ResourceClass] {
        match self {
            Self::ListScan => &[ResourceClass::Font, ResourceClass::Media],
            Self::Metadata => &[
                ResourceClass::Image,
                ResourceClass::Font,
                ResourceClass::Media,
                ResourceClass::Stylesheet,
            ],
        }
    }

    pub fn suppresses(&self, class: ResourceClass) -> bool {
        self.suppressed_resources().contains(&class)
    }
}

/// How long to wait for a navigation and what must be present afterwards
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Upper bound on the navigation plus condition polling
    pub timeout: Duration,

    /// Pause after the load before conditions are checked
    pub settle: Duration,

    pub poll_interval: Duration,

    /// Every selector must match for the wait to succeed
    pub conditions: Vec<Selector>,
}

impl WaitPolicy {
    pub fn load(timeout: Duration) -> Self {
        Self {
            timeout,
            settle: Duration::ZERO,
            poll_interval: Duration::from_millis(500),
            conditions: Vec::new(),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn require(mut self, selector: Selector) -> Self {
        self.conditions.push(selector);
        self
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn is_satisfied(&self, document: &Document) -> bool {
        self.conditions.iter().all(|c| document.has(c))
    }

    /// Parses and checks the source without keeping the parsed document
    pub fn is_satisfied_by(&self, source: &PageSource) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        self.is_satisfied(&Document::parse(source))
    }
}
