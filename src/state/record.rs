use crate::state::WorkCoordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Category sentinel for records whose classification never resolved
pub const UNRESOLVED: &str = "unresolved";

/// Older documents used this spelling for the same sentinel
pub const LEGACY_UNRESOLVED: &str = "Unknown Anime";

/// Returns true if a category value means "not classified"
pub fn is_unresolved_category(category: &str) -> bool {
    let trimmed = category.trim();
    trimmed.is_empty() || trimmed == UNRESOLVED || trimmed == LEGACY_UNRESOLVED
}

/// A provisional reference discovered on a list page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    /// Stable natural key (canonical image or detail URL)
    pub identity: String,

    /// Absolute URL of the detail page
    pub detail_ref: String,

    pub display_name: String,

    /// Image source as it appeared on the list page; empty when unknown
    pub image_ref: String,
}

impl CandidateItem {
    pub fn new(
        identity: impl Into<String>,
        detail_ref: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            detail_ref: detail_ref.into(),
            display_name: display_name.into(),
            image_ref: String::new(),
        }
    }

    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = image_ref.into();
        self
    }
}

/// A fully enriched, persisted record
///
/// Field names follow the current document format; the legacy names written by
/// older crawls are accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(alias = "imageUrl")]
    pub identity: String,

    #[serde(default, alias = "detailUrl")]
    pub detail_ref: String,

    #[serde(default, alias = "cardName")]
    pub display_name: String,

    #[serde(default, alias = "animeName")]
    pub category: String,

    #[serde(default, alias = "creator")]
    pub attribution_name: String,

    #[serde(default, alias = "description")]
    pub composite_description: String,

    #[serde(default, alias = "tier", deserialize_with = "string_or_number")]
    pub partition: String,

    #[serde(default, alias = "page", deserialize_with = "page_number")]
    pub page_index: u32,

    #[serde(default, alias = "scrapedAt", skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Builds a resolved record from a candidate and its enrichment
    pub fn enriched(
        item: &CandidateItem,
        coordinate: &WorkCoordinate,
        category: impl Into<String>,
        attribution_name: impl Into<String>,
    ) -> Self {
        let category = category.into();
        let composite_description = composite_description(&item.display_name, &category);
        Self {
            identity: item.identity.clone(),
            detail_ref: item.detail_ref.clone(),
            display_name: item.display_name.clone(),
            category,
            attribution_name: attribution_name.into(),
            composite_description,
            partition: coordinate.partition.clone(),
            page_index: coordinate.page,
            fetched_at: Some(Utc::now()),
        }
    }

    /// Builds a lenient-mode record carrying sentinel category and attribution
    pub fn sentinel(item: &CandidateItem, coordinate: &WorkCoordinate, attribution: &str) -> Self {
        Self::enriched(item, coordinate, UNRESOLVED, attribution)
    }

    pub fn is_unresolved(&self) -> bool {
        is_unresolved_category(&self.category)
    }

    pub fn coordinate(&self) -> WorkCoordinate {
        WorkCoordinate::new(self.partition.clone(), self.page_index)
    }

    /// Rebuilds the composite description from the current name and category
    pub fn refresh_description(&mut self) {
        self.composite_description = composite_description(&self.display_name, &self.category);
    }
}

/// `"<displayName> from <category>"`
pub fn composite_description(display_name: &str, category: &str) -> String {
    format!("{} from {}", display_name.trim(), category.trim())
}

/// Maps placeholder attributions to the configured anonymous name
///
/// A value is a placeholder when it is empty, or equals or contains one of `markers`.
pub fn normalize_attribution(raw: &str, anonymous_name: &str, markers: &[String]) -> String {
    let value = raw.trim();
    let placeholder = value.is_empty()
        || markers
            .iter()
            .any(|m| !m.is_empty() && (value.eq_ignore_ascii_case(m) || value.contains(m.as_str())));

    if placeholder {
        anonymous_name.to_string()
    } else {
        value.to_string()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

fn page_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
