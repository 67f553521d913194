//! Tiered content acquisition: fresh cache, rendering proxy, direct fetch,
//! stale cache, definitive failure — in that order. Never errors past its
//! boundary; a total failure is a value carrying everything that went wrong.

use chrono::Duration as ChronoDuration;
use metrics::counter;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::config::ScraperSettings;
use crate::constants::{MIN_DIRECT_CONTENT_BYTES, MIN_RENDERED_CONTENT_BYTES, USER_AGENT};
use crate::registry::{FetchStrategy, Source};
use crate::store::{get_typed, put_typed, KvStore};
use crate::types::{AcquisitionMethod, FetchError, ScrapeResult};

const READER_PROXY_BASE: &str = "https://r.jina.ai";
const FETCH_RETRIES: u32 = 2;

/// Cache entry persisted per source after every successful live fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPage {
    pub source_id: String,
    pub url: String,
    pub content: String,
    pub byte_len: usize,
    /// SHA-256 of the content, for cheap change detection across runs.
    #[serde(default)]
    pub content_digest: String,
}

/// Hex digest used for cache change detection.
pub fn content_digest(content: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub struct Scraper {
    client: reqwest::Client,
    cache: Arc<dyn KvStore>,
    settings: ScraperSettings,
    reader_key: Option<String>,
}

struct Fetched {
    content: String,
    bytes: usize,
}

impl Scraper {
    pub fn new(cache: Arc<dyn KvStore>, settings: ScraperSettings, reader_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache,
            settings,
            reader_key,
        }
    }

    pub fn read_cached(&self, source_id: &str) -> Option<CachedPage> {
        get_typed(self.cache.as_ref(), source_id).ok().flatten()
    }

    fn cache_ttl(&self) -> ChronoDuration {
        ChronoDuration::hours(self.settings.cache_ttl_hours)
    }

    fn read_fresh_cache(&self, source_id: &str) -> Option<CachedPage> {
        let value = self
            .cache
            .get_fresh(source_id, self.cache_ttl())
            .ok()
            .flatten()?;
        serde_json::from_value(value).ok()
    }

    /// Fetch one source through the full strategy chain.
    #[instrument(skip(self), fields(source = source.id))]
    pub async fn scrape_source(&self, source: &Source) -> ScrapeResult {
        // Fresh cache short-circuits the network entirely.
        if let Some(cached) = self.read_fresh_cache(source.id) {
            counter!("scrape_cache_fresh_total").increment(1);
            return ScrapeResult {
                source_id: source.id.to_string(),
                bytes: cached.byte_len,
                content: Some(cached.content),
                method: AcquisitionMethod::CacheFresh,
                errors: Vec::new(),
            };
        }

        let mut errors: Vec<FetchError> = Vec::new();

        if source.strategy == FetchStrategy::Rendered {
            match self.fetch_via_reader(source.url).await {
                Ok(fetched) => return self.record_success(source, fetched, AcquisitionMethod::Rendered, errors),
                Err(e) => errors.push(FetchError {
                    method: "rendered".to_string(),
                    error: e,
                }),
            }
        }

        match self.fetch_direct(source.url).await {
            Ok(fetched) => return self.record_success(source, fetched, AcquisitionMethod::Direct, errors),
            Err(e) => errors.push(FetchError {
                method: "direct".to_string(),
                error: e,
            }),
        }

        // Any cached copy, regardless of age, beats nothing.
        if let Some(cached) = self.read_cached(source.id) {
            warn!(
                "serving stale cache for {} after {} errors",
                source.id,
                errors.len()
            );
            counter!("scrape_cache_stale_total").increment(1);
            return ScrapeResult {
                source_id: source.id.to_string(),
                bytes: cached.byte_len,
                content: Some(cached.content),
                method: AcquisitionMethod::CacheStale,
                errors,
            };
        }

        counter!("scrape_failures_total").increment(1);
        ScrapeResult::failed(source.id, errors)
    }

    fn record_success(
        &self,
        source: &Source,
        fetched: Fetched,
        method: AcquisitionMethod,
        errors: Vec<FetchError>,
    ) -> ScrapeResult {
        let previous_digest = self.read_cached(source.id).map(|p| p.content_digest);
        let page = CachedPage {
            source_id: source.id.to_string(),
            url: source.url.to_string(),
            byte_len: fetched.bytes,
            content_digest: content_digest(&fetched.content),
            content: fetched.content,
        };
        if previous_digest.as_deref() == Some(page.content_digest.as_str()) {
            counter!("scrape_content_unchanged_total").increment(1);
        }
        if let Err(e) = put_typed(self.cache.as_ref(), source.id, &page) {
            warn!("failed to cache {}: {}", source.id, e);
        }
        ScrapeResult {
            source_id: source.id.to_string(),
            bytes: page.byte_len,
            content: Some(page.content),
            method,
            errors,
        }
    }

    /// Rendering proxy: returns the page as rendered plain text. A bearer
    /// token raises rate limits; 429s back off without burning a retry's
    /// full delay budget.
    async fn fetch_via_reader(&self, url: &str) -> Result<Fetched, String> {
        let proxy_url = format!("{READER_PROXY_BASE}/{url}");
        for attempt in 0..=FETCH_RETRIES {
            let mut req = self
                .client
                .get(&proxy_url)
                .header("Accept", "text/plain")
                .header("X-Return-Format", "text")
                .header("X-Timeout", "30")
                .timeout(Duration::from_secs(self.settings.rendered_timeout_secs));
            if let Some(key) = &self.reader_key {
                req = req.header("Authorization", format!("Bearer {key}"));
            }

            let outcome: Result<(), String> = match req.send().await {
                Ok(res) if res.status().as_u16() == 429 => {
                    let wait = Duration::from_millis(10_000.min(2_000 * (attempt as u64 + 1)));
                    info!("reader proxy rate limited, waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Ok(res) if !res.status().is_success() => {
                    Err(format!("reader proxy HTTP {}", res.status().as_u16()))
                }
                Ok(res) => match res.text().await {
                    Ok(text) if text.len() < MIN_RENDERED_CONTENT_BYTES => {
                        Err("reader proxy returned too little content".to_string())
                    }
                    Ok(text) => {
                        let bytes = text.len();
                        return Ok(Fetched { content: text, bytes });
                    }
                    Err(e) => Err(e.to_string()),
                },
                Err(e) => Err(e.to_string()),
            };

            if let Err(e) = outcome {
                if attempt == FETCH_RETRIES {
                    return Err(e);
                }
                self.backoff(attempt).await;
            }
        }
        Err("reader proxy retries exhausted".to_string())
    }

    /// Plain GET with a descriptive user agent, stripped down to text.
    async fn fetch_direct(&self, url: &str) -> Result<Fetched, String> {
        for attempt in 0..=FETCH_RETRIES {
            let outcome: Result<(), String> = match self
                .client
                .get(url)
                .header("User-Agent", USER_AGENT)
                .header("Accept", "text/html,application/xhtml+xml")
                .timeout(Duration::from_secs(self.settings.direct_timeout_secs))
                .send()
                .await
            {
                Ok(res) if !res.status().is_success() => {
                    Err(format!("HTTP {}", res.status().as_u16()))
                }
                Ok(res) => match res.text().await {
                    Ok(html) => {
                        let text = strip_html(&html);
                        if text.len() < MIN_DIRECT_CONTENT_BYTES {
                            Err("direct fetch returned too little content".to_string())
                        } else {
                            let bytes = text.len();
                            return Ok(Fetched { content: text, bytes });
                        }
                    }
                    Err(e) => Err(e.to_string()),
                },
                Err(e) => Err(e.to_string()),
            };

            if let Err(e) = outcome {
                if attempt == FETCH_RETRIES {
                    return Err(e);
                }
                self.backoff(attempt).await;
            }
        }
        Err("direct fetch retries exhausted".to_string())
    }

    async fn backoff(&self, attempt: u32) {
        let jitter = rand::thread_rng().gen_range(0..300u64);
        tokio::time::sleep(Duration::from_millis(1_500 * (attempt as u64 + 1) + jitter)).await;
    }

    /// Scrape sources in fixed-width batches. Requests within a batch race;
    /// batch N+1 never starts before batch N fully settles, and a politeness
    /// pause separates batches.
    pub async fn scrape_all(self: Arc<Self>, sources: &[Source]) -> Vec<ScrapeResult> {
        let concurrency = self.settings.concurrency.max(1);
        let batches: Vec<&[Source]> = sources.chunks(concurrency).collect();
        let total_batches = batches.len();
        let mut results = Vec::with_capacity(sources.len());

        for (bi, batch) in batches.into_iter().enumerate() {
            info!(
                "scrape batch {}/{}: {}",
                bi + 1,
                total_batches,
                batch.iter().map(|s| s.id).collect::<Vec<_>>().join(", ")
            );

            let mut set: JoinSet<(usize, ScrapeResult, f64)> = JoinSet::new();
            for (i, source) in batch.iter().copied().enumerate() {
                let scraper = Arc::clone(&self);
                set.spawn(async move {
                    let start = Instant::now();
                    let result = scraper.scrape_source(&source).await;
                    (i, result, start.elapsed().as_secs_f64())
                });
            }

            let mut settled: Vec<(usize, ScrapeResult, f64)> = Vec::with_capacity(batch.len());
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(item) => settled.push(item),
                    Err(e) => warn!("scrape task panicked: {}", e),
                }
            }
            settled.sort_by_key(|(i, _, _)| *i);

            for (_, result, elapsed) in settled {
                let status = if result.content.is_some() { "ok" } else { "failed" };
                info!(
                    "  {} {} ({}, {:.1}KB, {:.1}s)",
                    status,
                    result.source_id,
                    result.method.as_str(),
                    result.bytes as f64 / 1024.0,
                    elapsed
                );
                results.push(result);
            }

            if bi + 1 < total_batches {
                tokio::time::sleep(Duration::from_millis(self.settings.batch_delay_ms)).await;
            }
        }

        results
    }
}

static STRIP_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["script", "style", "nav", "footer", "header"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}[\s\S]*?</{tag}>")).unwrap())
        .collect()
});
static STRIP_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static NUMERIC_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#\d+;").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Reduce raw HTML to the visible text the extractor sees.
pub fn strip_html(html: &str) -> String {
    let mut text = html.to_string();
    for pattern in STRIP_BLOCKS.iter() {
        text = pattern.replace_all(&text, "").into_owned();
    }
    let text = STRIP_TAGS.replace_all(&text, " ");
    let text = text.replace("&nbsp;", " ").replace("&amp;", "&");
    let text = NUMERIC_ENTITY.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;
    use serde_json::json;

    fn test_scraper(dir: &std::path::Path) -> Arc<Scraper> {
        let cache = Arc::new(JsonFileStore::open(dir).unwrap());
        Arc::new(Scraper::new(cache, ScraperSettings::default(), None))
    }

    fn seed_cache(dir: &std::path::Path, source_id: &str, content: &str) {
        let cache = JsonFileStore::open(dir).unwrap();
        put_typed(
            &cache,
            source_id,
            &CachedPage {
                source_id: source_id.to_string(),
                url: "https://example.com".to_string(),
                content: content.to_string(),
                byte_len: content.len(),
                content_digest: content_digest(content),
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_network() {
        let dir = tempfile::tempdir().unwrap();
        seed_cache(dir.path(), "waitingroom", "cached page text");
        let scraper = test_scraper(dir.path());
        let source = crate::registry::find_source("waitingroom").unwrap();

        let result = scraper.scrape_source(source).await;
        assert_eq!(result.method, AcquisitionMethod::CacheFresh);
        assert_eq!(result.content.as_deref(), Some("cached page text"));
        assert!(result.errors.is_empty());
    }

    #[test]
    fn stale_entries_are_still_readable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileStore::open(dir.path()).unwrap();
        // Write an entry with an ancient timestamp directly.
        let page = json!({
            "source_id": "chi",
            "url": "https://example.com",
            "content": "old but usable",
            "byte_len": 14,
        });
        let entry = json!({"stored_at": "2001-01-01T00:00:00Z", "value": page});
        std::fs::write(
            dir.path().join("chi.json"),
            serde_json::to_vec(&entry).unwrap(),
        )
        .unwrap();

        let scraper = Scraper::new(Arc::new(cache), ScraperSettings::default(), None);
        assert!(scraper.read_fresh_cache("chi").is_none());
        let stale = scraper.read_cached("chi").unwrap();
        assert_eq!(stale.content, "old but usable");
    }

    #[test]
    fn strip_html_removes_chrome_and_entities() {
        let html = r#"<html><head><style>.x{}</style><script>var a;</script></head>
            <body><nav>menu</nav><h1>Bryce&nbsp;Vine</h1><p>Feb 20 &amp; 21 &#8212;</p>
            <footer>contact</footer></body></html>"#;
        let text = strip_html(html);
        assert_eq!(text, "Bryce Vine Feb 20 & 21");
        assert!(!text.contains("menu"));
        assert!(!text.contains("var a"));
    }
}
