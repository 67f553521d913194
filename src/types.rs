use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The closed category set every catalog record must land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Concerts,
    Comedy,
    Sports,
    Festivals,
    Family,
    Arts,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Concerts,
        Category::Comedy,
        Category::Sports,
        Category::Festivals,
        Category::Family,
        Category::Arts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Concerts => "concerts",
            Category::Comedy => "comedy",
            Category::Sports => "sports",
            Category::Festivals => "festivals",
            Category::Family => "family",
            Category::Arts => "arts",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_lowercase().as_str() {
            "concerts" => Some(Category::Concerts),
            "comedy" => Some(Category::Comedy),
            "sports" => Some(Category::Sports),
            "festivals" => Some(Category::Festivals),
            "family" => Some(Category::Family),
            "arts" => Some(Category::Arts),
            _ => None,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Category::Concerts => "\u{1F3B5}",
            Category::Comedy => "\u{1F602}",
            Category::Sports => "\u{1F3C6}",
            Category::Festivals => "\u{1F389}",
            Category::Family => "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}",
            Category::Arts => "\u{1F3A8}",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility of a record in the catalog. Manual review tooling may park
/// records as hidden; the build pass filters them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Active,
    Hidden,
}

/// An unvalidated event produced by extraction or a structured fetcher.
/// The date is still a raw string here; the validator owns rejection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Candidate {
    pub title: String,
    pub venue: String,
    pub area: String,
    pub date: String,
    pub time: String,
    pub price: String,
    pub desc: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub cat: Option<Category>,
    pub source_id: String,
    pub source_priority: u8,
    /// Calendar URL of the originating source, used as a link of last resort.
    #[serde(default)]
    pub venue_url: Option<String>,
    /// Vendor-assigned event id for exact-match dedup of API records.
    #[serde(default)]
    pub vendor_event_id: Option<String>,
    /// Structured fetchers emit pre-verified ticket URLs.
    #[serde(default)]
    pub url_valid: bool,
    #[serde(default)]
    pub affiliate_platform: Option<String>,
}

/// A validated, enriched catalog record. A candidate either fully qualifies
/// into one of these or is excluded; no partial records reach the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    pub title: String,
    pub venue: String,
    pub area: String,
    pub date: NaiveDate,
    pub time: String,
    pub price: String,
    pub desc: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub cat: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    pub emoji: String,
    pub source_id: String,
    pub source_priority: u8,
    #[serde(default)]
    pub venue_url: Option<String>,
    #[serde(default)]
    pub vendor_event_id: Option<String>,
    #[serde(default)]
    pub url_valid: bool,
    #[serde(default)]
    pub url_upgraded: bool,
    #[serde(default)]
    pub affiliate_platform: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
}

impl EventRecord {
    pub fn has_real_price(&self) -> bool {
        !self.price.is_empty() && self.price != "TBD"
    }
}

/// How a source's content was ultimately acquired this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionMethod {
    /// Rendering proxy returned fresh content.
    Rendered,
    /// Plain GET plus local HTML stripping.
    Direct,
    /// Cache younger than the freshness TTL; no network attempted.
    CacheFresh,
    /// Every live strategy failed; an expired cache entry was served.
    CacheStale,
    Failed,
}

impl AcquisitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMethod::Rendered => "rendered",
            AcquisitionMethod::Direct => "direct",
            AcquisitionMethod::CacheFresh => "cache-fresh",
            AcquisitionMethod::CacheStale => "cache-stale",
            AcquisitionMethod::Failed => "failed",
        }
    }
}

/// One error from one attempted fetch strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchError {
    pub method: String,
    pub error: String,
}

/// Outcome of scraping a single source. Never an Err: total failure is a
/// definitive value with the accumulated error list.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub source_id: String,
    pub content: Option<String>,
    pub method: AcquisitionMethod,
    pub bytes: usize,
    pub errors: Vec<FetchError>,
}

impl ScrapeResult {
    pub fn failed(source_id: &str, errors: Vec<FetchError>) -> Self {
        Self {
            source_id: source_id.to_string(),
            content: None,
            method: AcquisitionMethod::Failed,
            bytes: 0,
            errors,
        }
    }
}

/// Contract shared by the structured fetchers: fully-typed, categorized,
/// venue-normalized candidates, no extraction step.
#[async_trait::async_trait]
pub trait StructuredFetcher: Send + Sync {
    fn fetcher_id(&self) -> &'static str;

    async fn fetch_events(&self) -> Result<Vec<Candidate>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_serde() {
        for cat in Category::ALL {
            let json = serde_json::to_string(&cat).unwrap();
            let back: Category = serde_json::from_str(&json).unwrap();
            assert_eq!(cat, back);
            assert_eq!(json, format!("\"{}\"", cat.as_str()));
        }
    }

    #[test]
    fn unknown_category_string_is_rejected() {
        assert_eq!(Category::parse("nightlife"), None);
        assert_eq!(Category::parse("Arts"), Some(Category::Arts));
    }

    #[test]
    fn status_defaults_to_active() {
        let c: Candidate = serde_json::from_str(
            r#"{"title":"x","venue":"v","area":"Omaha","date":"2026-01-01",
                "time":"TBD","price":"TBD","desc":"","source_id":"s","source_priority":5}"#,
        )
        .unwrap();
        assert!(c.url.is_none());
        assert!(!c.url_valid);
    }
}
