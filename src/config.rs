use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Tunables loaded from `config.toml`. Every section has defaults so a
/// missing file still yields a runnable pipeline; secrets never live here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: String,
    pub scraper: ScraperSettings,
    pub ticketmaster: TicketmasterSettings,
    pub ticketomaha: TicketOmahaSettings,
    pub extractor: ExtractorSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    /// Sources fetched in flight at once; batches run strictly in sequence.
    pub concurrency: usize,
    /// Politeness pause between scrape batches.
    pub batch_delay_ms: u64,
    /// Cache entries younger than this skip the network entirely.
    pub cache_ttl_hours: i64,
    pub rendered_timeout_secs: u64,
    pub direct_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TicketmasterSettings {
    pub latitude: String,
    pub longitude: String,
    pub radius_miles: u32,
    pub page_size: u32,
    pub max_pages: u32,
    pub page_delay_ms: u64,
    pub timeout_secs: u64,
    pub cache_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TicketOmahaSettings {
    pub base_url: String,
    /// robots.txt Crawl-delay for the target site.
    pub crawl_delay_secs: u64,
    pub timeout_secs: u64,
    pub cache_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    pub model: String,
    pub max_tokens: u32,
    /// Pause between sequential extraction calls.
    pub call_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            scraper: ScraperSettings::default(),
            ticketmaster: TicketmasterSettings::default(),
            ticketomaha: TicketOmahaSettings::default(),
            extractor: ExtractorSettings::default(),
        }
    }
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            batch_delay_ms: 1500,
            cache_ttl_hours: 6,
            rendered_timeout_secs: 35,
            direct_timeout_secs: 20,
        }
    }
}

impl Default for TicketmasterSettings {
    fn default() -> Self {
        Self {
            latitude: "41.2565".to_string(),
            longitude: "-95.9345".to_string(),
            radius_miles: 50,
            page_size: 200,
            max_pages: 3,
            page_delay_ms: 250,
            timeout_secs: 15,
            cache_ttl_hours: 4,
        }
    }
}

impl Default for TicketOmahaSettings {
    fn default() -> Self {
        Self {
            base_url: "https://ticketomaha.com".to_string(),
            crawl_delay_secs: 5,
            timeout_secs: 15,
            cache_ttl_hours: 6,
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            call_delay_ms: 1500,
        }
    }
}

impl Settings {
    /// Load from `config.toml` in the working directory, falling back to
    /// defaults when the file is absent.
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }
}

/// Credentials and endpoints read from the environment (via `.env` in dev).
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub anthropic_api_key: Option<String>,
    pub ticketmaster_api_key: Option<String>,
    pub reader_api_key: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub affiliate_ids: AffiliateIds,
}

/// Per-platform affiliate identifiers. Empty means no rewriting for that
/// platform.
#[derive(Debug, Clone, Default)]
pub struct AffiliateIds {
    pub ticketmaster: Option<String>,
    pub etix: Option<String>,
    pub axs: Option<String>,
    pub eventbrite: Option<String>,
    pub seetickets: Option<String>,
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            ticketmaster_api_key: non_empty("TICKETMASTER_API_KEY"),
            reader_api_key: non_empty("JINA_API_KEY"),
            slack_webhook_url: non_empty("SLACK_WEBHOOK_URL"),
            discord_webhook_url: non_empty("DISCORD_WEBHOOK_URL"),
            affiliate_ids: AffiliateIds {
                ticketmaster: non_empty("TICKETMASTER_AFFILIATE_ID"),
                etix: non_empty("ETIX_AFFILIATE_ID"),
                axs: non_empty("AXS_AFFILIATE_ID"),
                eventbrite: non_empty("EVENTBRITE_AFFILIATE_ID"),
                seetickets: non_empty("SEETICKETS_AFFILIATE_ID"),
            },
        }
    }

    /// The extraction service credential is the one hard requirement for a
    /// full run; everything else degrades gracefully.
    pub fn require_anthropic(&self) -> Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .ok_or_else(|| PipelineError::MissingCredential("ANTHROPIC_API_KEY".into()))
    }

    pub fn affiliate_id(&self, platform: &str) -> Option<&str> {
        match platform {
            "ticketmaster" => self.affiliate_ids.ticketmaster.as_deref(),
            "etix" => self.affiliate_ids.etix.as_deref(),
            "axs" => self.affiliate_ids.axs.as_deref(),
            "eventbrite" => self.affiliate_ids.eventbrite.as_deref(),
            "seetickets" => self.affiliate_ids.seetickets.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let settings = Settings::load_from("/nonexistent/config.toml").unwrap();
        assert_eq!(settings.scraper.concurrency, 3);
        assert_eq!(settings.ticketmaster.max_pages, 3);
        assert_eq!(settings.ticketomaha.crawl_delay_secs, 5);
    }

    #[test]
    fn parses_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scraper]\nconcurrency = 5\n").unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.scraper.concurrency, 5);
        // untouched sections keep defaults
        assert_eq!(settings.scraper.batch_delay_ms, 1500);
        assert_eq!(settings.extractor.max_tokens, 4096);
    }
}
