//! Ticket Omaha fetcher: discovers event pages through the site's sitemap,
//! then reads the JSON-LD Event object embedded in each page. The site's
//! crawl policy mandates a multi-second delay between page fetches.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::apis::{format_dollars, format_time_12h, trim_desc};
use crate::categorize::{category_for_genre, keyword_category};
use crate::config::TicketOmahaSettings;
use crate::constants::{LOOKAHEAD_DAYS, TICKETOMAHA_SOURCE_ID, USER_AGENT};
use crate::error::Result;
use crate::similarity::dedupe_key;
use crate::store::{put_typed, KvStore};
use crate::types::{Candidate, Category, StructuredFetcher};
use crate::venues::{area_for_city, normalize_venue, VENUE_ALIASES};

const CACHE_KEY: &str = "ticketomaha-api";
const PAGE_RETRIES: u32 = 1;

pub struct TicketOmahaFetcher {
    client: reqwest::Client,
    cache: Arc<dyn KvStore>,
    settings: TicketOmahaSettings,
}

static EVENT_LOC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<loc>\s*(https?://ticketomaha\.com/events/([^<\s]+))\s*</loc>").unwrap()
});
static VALID_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]+$").unwrap());

/// Event page URLs from the sitemap. Category/theme pages are skipped:
/// real event slugs are hyphenated alphanumeric codes with no query parts.
pub fn extract_event_urls(sitemap: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for caps in EVENT_LOC.captures_iter(sitemap) {
        let full = &caps[1];
        let slug = &caps[2];
        if slug.contains('?') || slug.contains('#') {
            continue;
        }
        if !VALID_SLUG.is_match(slug) || !slug.contains('-') {
            continue;
        }
        if seen.insert(full.to_string()) {
            urls.push(full.to_string());
        }
    }
    urls
}

static LD_JSON_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// JSON-LD Event objects from a page, in flat, array, or @graph-nested form.
pub fn extract_json_ld_events(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let mut events = Vec::new();
    for script in document.select(&LD_JSON_SELECTOR) {
        let raw = script.text().collect::<String>();
        let Ok(data) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        let items: Vec<&Value> = match &data {
            Value::Array(arr) => arr.iter().collect(),
            other => vec![other],
        };
        for item in items {
            if item["@type"] == "Event" {
                events.push(item.clone());
            }
            if let Some(graph) = item["@graph"].as_array() {
                for nested in graph {
                    if nested["@type"] == "Event" {
                        events.push(nested.clone());
                    }
                }
            }
        }
    }
    events
}

static PRICE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)tickets?\s+start(?:ing)?\s+at\s+\$(\d+(?:\.\d{2})?)").unwrap(),
        Regex::new(r"(?i)starting\s+at\s+\$(\d+(?:\.\d{2})?)").unwrap(),
        Regex::new(r"(?i)from\s+\$(\d+(?:\.\d{2})?)").unwrap(),
        Regex::new(r"(?i)\$(\d+(?:\.\d{2})?)\s*[-\u{2013}]\s*\$(\d+(?:\.\d{2})?)").unwrap(),
        Regex::new(r"(?i)price[:\s]+\$(\d+(?:\.\d{2})?)").unwrap(),
    ]
});
static FREE_ADMISSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfree\s*(admission|entry|event)?\b").unwrap());

/// Price from page text when the structured markup has no usable offers.
pub fn extract_price_from_text(html: &str) -> String {
    for pattern in PRICE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(html) {
            let low = caps[1].parse::<f64>().unwrap_or(0.0).floor();
            if let Some(high) = caps.get(2) {
                let high = high.as_str().parse::<f64>().unwrap_or(0.0).floor();
                return format!("${}\u{2013}${}", format_dollars(low), format_dollars(high));
            }
            return format!("${}", format_dollars(low));
        }
    }
    if FREE_ADMISSION.is_match(html) {
        return "Free".to_string();
    }
    "TBD".to_string()
}

static GENRE_LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[href^="/events?genres="]"#).unwrap());

/// Genre labels from the page's category links.
pub fn extract_genres(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&GENRE_LINK_SELECTOR)
        .map(|a| a.text().collect::<String>().trim().to_lowercase())
        .filter(|g| !g.is_empty())
        .collect()
}

fn classify(title: &str, genres: &[String]) -> Category {
    for genre in genres {
        if let Some(cat) = category_for_genre(genre) {
            return cat;
        }
    }
    // This site is primarily performing arts; unmatched titles land there.
    keyword_category(title).unwrap_or(Category::Arts)
}

static TITLE_DATE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\|\s*(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\.?\s+\d{1,2},?\s*\d{4}\s*$")
        .unwrap()
});

/// Strip "| Mar. 21, 2026" date suffixes and trailing "| Venue Name"
/// segments naming a known venue.
pub fn clean_title(raw: &str) -> String {
    let without_date = TITLE_DATE_SUFFIX.replace(raw, "");
    let parts: Vec<&str> = without_date.split('|').map(str::trim).collect();
    if parts.len() > 1 {
        let last = parts[parts.len() - 1].to_lowercase();
        if VENUE_ALIASES.contains_key(last.as_str()) {
            return parts[..parts.len() - 1].join(" | ");
        }
    }
    without_date.trim().to_string()
}

fn parse_start(start: &str) -> Option<(NaiveDate, String)> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(start) {
        return Some((dt.date_naive(), format_time_12h(dt.hour(), dt.minute())));
    }
    // Date-only startDate values are common for all-day listings.
    if let Ok(date) = NaiveDate::parse_from_str(start, "%Y-%m-%d") {
        return Some((date, "TBD".to_string()));
    }
    None
}

fn price_from_offers(offers: &Value) -> Option<String> {
    let list: Vec<&Value> = match offers {
        Value::Array(arr) => arr.iter().collect(),
        Value::Null => return None,
        other => vec![other],
    };
    let prices: Vec<f64> = list
        .iter()
        .filter_map(|o| {
            let p = &o["price"];
            p.as_f64().or_else(|| p.as_str().and_then(|s| s.parse().ok()))
        })
        .filter(|p| *p >= 0.0)
        .collect();
    if prices.is_empty() {
        return None;
    }
    let min = prices.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some(if min == 0.0 && max == 0.0 {
        "Free".to_string()
    } else if min != max {
        format!("${}\u{2013}${}", format_dollars(min.floor()), format_dollars(max.floor()))
    } else {
        format!("${}", format_dollars(min.floor()))
    })
}

fn image_from_ld(image: &Value) -> Option<String> {
    match image {
        Value::String(s) => Some(s.clone()),
        Value::Array(arr) => arr.first().and_then(|v| v.as_str()).map(str::to_string),
        Value::Object(_) => image["url"].as_str().map(str::to_string),
        _ => None,
    }
}

/// Map one JSON-LD Event into a candidate, or `None` when required fields
/// are missing or the date falls outside the window.
pub fn map_event(ld: &Value, page_url: &str, page_html: Option<&str>, today: NaiveDate, end: NaiveDate) -> Option<Candidate> {
    let title = clean_title(ld["name"].as_str()?);
    if title.is_empty() {
        return None;
    }

    let (date, time) = parse_start(ld["startDate"].as_str()?)?;
    if date < today || date > end {
        return None;
    }

    let location = &ld["location"];
    let venue = normalize_venue(location["name"].as_str().unwrap_or("TBD"));
    // This site is metro-focused; an unmapped or missing locality defaults
    // to the core area instead of dropping the record.
    let area = location["address"]["addressLocality"]
        .as_str()
        .and_then(area_for_city)
        .unwrap_or("Omaha");

    let price = price_from_offers(&ld["offers"])
        .or_else(|| page_html.map(extract_price_from_text))
        .unwrap_or_else(|| "TBD".to_string());

    let mut desc = ld["description"].as_str().unwrap_or_default().to_string();
    if desc.is_empty() {
        desc = format!("{title} at {venue}");
    }
    desc = crate::scraper::strip_html(&desc);
    desc = trim_desc(&desc, 200);

    let genres = page_html.map(|h| extract_genres(h)).unwrap_or_default();

    Some(Candidate {
        cat: Some(classify(&title, &genres)),
        title,
        venue,
        area: area.to_string(),
        date: date.to_string(),
        time,
        price,
        desc,
        url: Some(page_url.to_string()),
        image: image_from_ld(&ld["image"]),
        source_id: TICKETOMAHA_SOURCE_ID.to_string(),
        source_priority: 3,
        venue_url: None,
        vendor_event_id: None,
        url_valid: true,
        affiliate_platform: None,
    })
}

/// Multi-showtime pages emit one JSON-LD object per showing; collapse
/// same-day repeats before returning.
pub fn dedupe_showtimes(events: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|e| seen.insert(dedupe_key(&e.title, &e.date)))
        .collect()
}

impl TicketOmahaFetcher {
    pub fn new(cache: Arc<dyn KvStore>, settings: TicketOmahaSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache,
            settings,
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..=PAGE_RETRIES {
            match self
                .client
                .get(url)
                .header("User-Agent", USER_AGENT)
                .header("Accept", "text/html,application/xhtml+xml")
                .timeout(Duration::from_secs(self.settings.timeout_secs))
                .send()
                .await
            {
                Ok(res) if res.status().is_success() => return Ok(res.text().await?),
                Ok(res) => {
                    last_err = Some(crate::error::PipelineError::Api {
                        message: format!("HTTP {}", res.status().as_u16()),
                    })
                }
                Err(e) => last_err = Some(e.into()),
            }
            if attempt < PAGE_RETRIES {
                tokio::time::sleep(Duration::from_millis(2_000)).await;
            }
        }
        Err(last_err.unwrap_or(crate::error::PipelineError::Api {
            message: "unreachable".to_string(),
        }))
    }
}

#[async_trait]
impl StructuredFetcher for TicketOmahaFetcher {
    fn fetcher_id(&self) -> &'static str {
        TICKETOMAHA_SOURCE_ID
    }

    #[instrument(skip(self))]
    async fn fetch_events(&self) -> Result<Vec<Candidate>> {
        let ttl = ChronoDuration::hours(self.settings.cache_ttl_hours);
        if let Some(entry) = self.cache.get_fresh(CACHE_KEY, ttl)? {
            if let Ok(cached) = serde_json::from_value::<Vec<Candidate>>(entry) {
                info!("using cached structured-markup data ({} events)", cached.len());
                return Ok(cached);
            }
        }

        let sitemap_url = format!("{}/sitemap", self.settings.base_url);
        let sitemap = self.fetch_page(&sitemap_url).await?;
        let urls = extract_event_urls(&sitemap);
        info!("found {} event page URLs in sitemap", urls.len());
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let today = Utc::now().date_naive();
        let end = today + ChronoDuration::days(LOOKAHEAD_DAYS);
        let crawl_delay = Duration::from_secs(self.settings.crawl_delay_secs);
        info!(
            "crawling {} pages with {}s delay (~{} min)",
            urls.len(),
            self.settings.crawl_delay_secs,
            (urls.len() as u64 * self.settings.crawl_delay_secs).div_ceil(60)
        );

        let mut events = Vec::new();
        let mut failed = 0usize;
        for (i, url) in urls.iter().enumerate() {
            match self.fetch_page(url).await {
                Ok(html) => {
                    for ld in extract_json_ld_events(&html) {
                        if let Some(c) = map_event(&ld, url, Some(&html), today, end) {
                            events.push(c);
                        }
                    }
                }
                Err(e) => {
                    failed += 1;
                    if failed <= 5 {
                        warn!("failed {}: {}", url, e);
                    }
                }
            }
            if (i + 1) % 20 == 0 || i + 1 == urls.len() {
                info!("  {}/{} pages fetched, {} events so far", i + 1, urls.len(), events.len());
            }
            if i + 1 < urls.len() {
                tokio::time::sleep(crawl_delay).await;
            }
        }
        if failed > 5 {
            warn!("... and {} more page failures", failed - 5);
        }

        let deduped = dedupe_showtimes(events);
        put_typed(self.cache.as_ref(), CACHE_KEY, &deduped)?;
        info!(
            "structured-markup crawl: {} events from {} pages ({} failed), cached",
            deduped.len(),
            urls.len() - failed,
            failed
        );
        Ok(deduped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sitemap_extraction_filters_theme_pages() {
        let sitemap = r#"
            <urlset>
              <loc>https://ticketomaha.com/events/wicked-jhby</loc>
              <loc>https://ticketomaha.com/events/opera</loc>
              <loc>https://ticketomaha.com/events/wicked-jhby</loc>
              <loc>https://ticketomaha.com/venues/orpheum</loc>
              <loc>https://ticketomaha.com/events/jazz-night-x4f2</loc>
            </urlset>"#;
        let urls = extract_event_urls(sitemap);
        assert_eq!(
            urls,
            vec![
                "https://ticketomaha.com/events/wicked-jhby",
                "https://ticketomaha.com/events/jazz-night-x4f2",
            ]
        );
    }

    #[test]
    fn json_ld_flat_and_graph_forms() {
        let html = r#"<html><head>
            <script type="application/ld+json">{"@type":"Event","name":"Wicked"}</script>
            <script type="application/ld+json">{"@graph":[{"@type":"Event","name":"Hamilton"},{"@type":"Place"}]}</script>
            <script type="application/ld+json">[{"@type":"Event","name":"Cats"}]</script>
            <script type="application/ld+json">not json</script>
            </head><body></body></html>"#;
        let events = extract_json_ld_events(html);
        let names: Vec<&str> = events.iter().filter_map(|e| e["name"].as_str()).collect();
        assert_eq!(names, vec!["Wicked", "Hamilton", "Cats"]);
    }

    #[test]
    fn price_text_patterns() {
        assert_eq!(extract_price_from_text("Tickets start at $35.50 today"), "$35");
        assert_eq!(extract_price_from_text("from $20"), "$20");
        assert_eq!(extract_price_from_text("$25 - $60 depending on seat"), "$25\u{2013}$60");
        assert_eq!(extract_price_from_text("Free admission for members"), "Free");
        assert_eq!(extract_price_from_text("doors at seven"), "TBD");
    }

    #[test]
    fn title_cleaning_strips_date_and_venue_suffixes() {
        assert_eq!(clean_title("Bob Dylan | Mar. 21, 2026"), "Bob Dylan");
        assert_eq!(clean_title("Wicked | Orpheum Theater"), "Wicked");
        assert_eq!(clean_title("Alpha | Beta Hall"), "Alpha | Beta Hall");
    }

    #[test]
    fn maps_a_json_ld_event() {
        let today = NaiveDate::from_ymd_opt(2099, 1, 1).unwrap();
        let end = today + ChronoDuration::days(90);
        let ld = json!({
            "@type": "Event",
            "name": "Wicked | Orpheum Theater",
            "startDate": "2099-02-10T19:30:00-06:00",
            "location": {
                "name": "Orpheum Theatre",
                "address": {"addressLocality": "Omaha"}
            },
            "offers": [{"price": "45.00"}, {"price": "125.00"}],
            "description": "<p>The untold story of the witches of Oz.</p>",
            "image": {"url": "https://img/wicked.jpg"}
        });
        let c = map_event(&ld, "https://ticketomaha.com/events/wicked-jhby", None, today, end).unwrap();
        assert_eq!(c.title, "Wicked");
        assert_eq!(c.venue, "Orpheum Theater");
        assert_eq!(c.date, "2099-02-10");
        assert_eq!(c.time, "7:30 PM");
        assert_eq!(c.price, "$45\u{2013}$125");
        assert_eq!(c.desc, "The untold story of the witches of Oz.");
        assert_eq!(c.image.as_deref(), Some("https://img/wicked.jpg"));
        assert_eq!(c.source_priority, 3);
        assert!(c.url_valid);
    }

    #[test]
    fn out_of_window_and_missing_fields_drop() {
        let today = NaiveDate::from_ymd_opt(2099, 1, 1).unwrap();
        let end = today + ChronoDuration::days(90);
        let past = json!({"@type":"Event","name":"Old Show","startDate":"2098-01-01"});
        assert!(map_event(&past, "u", None, today, end).is_none());
        let undated = json!({"@type":"Event","name":"No Date"});
        assert!(map_event(&undated, "u", None, today, end).is_none());
    }

    #[test]
    fn showtime_dedup_collapses_same_day_repeats() {
        let mk = |title: &str, date: &str| Candidate {
            title: title.into(),
            date: date.into(),
            ..Default::default()
        };
        let events = vec![
            mk("Wicked", "2099-02-10"),
            mk("Wicked!", "2099-02-10"),
            mk("Wicked", "2099-02-11"),
        ];
        let deduped = dedupe_showtimes(events);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn genre_classification_falls_back_to_arts() {
        assert_eq!(classify("An Evening of Mystery", &[]), Category::Arts);
        assert_eq!(classify("x", &["comedy".to_string()]), Category::Comedy);
        assert_eq!(classify("Jazz Night", &[]), Category::Concerts);
    }
}
