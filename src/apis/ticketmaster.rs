//! Ticketmaster Discovery API fetcher: geo-radius query around the metro
//! center, paginated until exhausted or the page cap, mapped straight into
//! typed candidates with verified ticket URLs.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::apis::{format_dollars, format_time_12h, trim_desc};
use crate::categorize::{category_for_genre, category_for_segment};
use crate::config::TicketmasterSettings;
use crate::constants::{LOOKAHEAD_DAYS, TICKETMASTER_SOURCE_ID};
use crate::error::{PipelineError, Result};
use crate::store::{put_typed, KvStore};
use crate::types::{Candidate, Category, StructuredFetcher};
use crate::venues::{area_for_city, normalize_venue};

const BASE_URL: &str = "https://app.ticketmaster.com/discovery/v2/events.json";
const CACHE_KEY: &str = "ticketmaster-api";

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(rename = "_embedded")]
    embedded: Option<ResponseEmbedded>,
    page: Option<PageInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponseEmbedded {
    events: Vec<TmEvent>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PageInfo {
    #[serde(rename = "totalPages")]
    total_pages: u32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmEvent {
    name: String,
    id: String,
    url: Option<String>,
    info: Option<String>,
    #[serde(rename = "pleaseNote")]
    please_note: Option<String>,
    dates: TmDates,
    classifications: Vec<TmClassification>,
    #[serde(rename = "priceRanges")]
    price_ranges: Vec<TmPriceRange>,
    images: Vec<TmImage>,
    #[serde(rename = "_embedded")]
    embedded: TmEventEmbedded,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmDates {
    start: TmStart,
    status: TmStatus,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmStart {
    #[serde(rename = "localDate")]
    local_date: Option<String>,
    #[serde(rename = "localTime")]
    local_time: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmStatus {
    code: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmClassification {
    genre: Option<TmNamed>,
    #[serde(rename = "subGenre")]
    sub_genre: Option<TmNamed>,
    segment: Option<TmNamed>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmNamed {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmPriceRange {
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmImage {
    ratio: Option<String>,
    width: Option<u32>,
    url: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmEventEmbedded {
    venues: Vec<TmVenue>,
    attractions: Vec<TmAttraction>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmVenue {
    name: Option<String>,
    city: Option<TmCity>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmCity {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TmAttraction {
    name: Option<String>,
}

static ANCILLARY_TITLE: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)^Suites:").unwrap(),
        Regex::new(r"(?i)voucher").unwrap(),
        Regex::new(r"(?i)hotel\s+reservations?").unwrap(),
    ]
});

/// Genre → sub-genre → segment, against the shared rule tables.
fn classify(classifications: &[TmClassification]) -> Category {
    let Some(c) = classifications.first() else {
        return Category::Concerts;
    };
    let named = |n: &Option<TmNamed>| n.as_ref().and_then(|x| x.name.clone()).unwrap_or_default();
    if let Some(cat) = category_for_genre(&named(&c.genre)) {
        return cat;
    }
    if let Some(cat) = category_for_genre(&named(&c.sub_genre)) {
        return cat;
    }
    if let Some(cat) = category_for_segment(&named(&c.segment)) {
        return cat;
    }
    Category::Concerts
}

/// Best card image: 16:9 in the ideal width band, then any large 16:9, then
/// any large image, then whatever is first.
fn pick_image(images: &[TmImage]) -> Option<String> {
    let is_16x9 = |img: &&TmImage| img.ratio.as_deref() == Some("16_9");
    if let Some(ideal) = images
        .iter()
        .filter(is_16x9)
        .find(|img| matches!(img.width, Some(w) if (640..=1136).contains(&w)))
    {
        return Some(ideal.url.clone());
    }
    if let Some(any) = images
        .iter()
        .filter(is_16x9)
        .find(|img| matches!(img.width, Some(w) if w >= 500))
    {
        return Some(any.url.clone());
    }
    if let Some(large) = images.iter().find(|img| matches!(img.width, Some(w) if w >= 500)) {
        return Some(large.url.clone());
    }
    images.first().map(|img| img.url.clone())
}

fn format_price(ranges: &[TmPriceRange]) -> String {
    let Some(range) = ranges.first() else {
        return "TBD".to_string();
    };
    match (range.min, range.max) {
        (Some(min), Some(max)) if min == 0.0 && max == 0.0 => "Free".to_string(),
        (Some(min), Some(max)) if min != max => {
            format!("${}\u{2013}${}", format_dollars(min), format_dollars(max))
        }
        (Some(min), _) if min > 0.0 => format!("${}", format_dollars(min)),
        (_, Some(max)) if max > 0.0 => format!("${}", format_dollars(max)),
        _ => "TBD".to_string(),
    }
}

fn format_local_time(local_time: Option<&str>) -> String {
    let Some(raw) = local_time else {
        return "TBD".to_string();
    };
    let mut parts = raw.split(':');
    let (Some(h), Some(m)) = (parts.next(), parts.next()) else {
        return "TBD".to_string();
    };
    match (h.parse::<u32>(), m.parse::<u32>()) {
        (Ok(hour), Ok(minute)) if hour < 24 && minute < 60 => format_time_12h(hour, minute),
        _ => "TBD".to_string(),
    }
}

/// Map a vendor event into a candidate, or `None` when it is ancillary
/// inventory, outside the metro, cancelled, or outside the date window.
fn map_event(ev: &TmEvent, today: &str, end: &str) -> Option<Candidate> {
    if ANCILLARY_TITLE.iter().any(|p| p.is_match(&ev.name)) {
        return None;
    }

    let venue = ev.embedded.venues.first();
    let city = venue.and_then(|v| v.city.as_ref()).and_then(|c| c.name.as_deref())?;
    let area = area_for_city(city)?;

    match ev.dates.status.code.as_deref() {
        Some("cancelled") | Some("postponed") => return None,
        _ => {}
    }

    let local_date = ev.dates.start.local_date.as_deref()?;
    if local_date < today || local_date > end {
        return None;
    }

    let venue_name = normalize_venue(venue.and_then(|v| v.name.as_deref()).unwrap_or("TBD"));
    let url = ev
        .url
        .clone()
        .unwrap_or_else(|| format!("https://www.ticketmaster.com/event/{}", ev.id));

    let desc = ev
        .info
        .clone()
        .or_else(|| ev.please_note.clone())
        .or_else(|| {
            ev.embedded
                .attractions
                .first()
                .and_then(|a| a.name.as_ref())
                .map(|a| format!("{a} at {venue_name}"))
        })
        .unwrap_or_else(|| format!("Live event at {venue_name}"));

    Some(Candidate {
        title: ev.name.clone(),
        venue: venue_name,
        area: area.to_string(),
        date: local_date.to_string(),
        time: format_local_time(ev.dates.start.local_time.as_deref()),
        price: format_price(&ev.price_ranges),
        desc: trim_desc(&desc, 200),
        url: Some(url),
        image: pick_image(&ev.images),
        cat: Some(classify(&ev.classifications)),
        source_id: TICKETMASTER_SOURCE_ID.to_string(),
        source_priority: 1,
        venue_url: None,
        vendor_event_id: Some(ev.id.clone()),
        url_valid: true,
        affiliate_platform: Some("ticketmaster".to_string()),
    })
}

pub struct TicketmasterFetcher {
    client: reqwest::Client,
    api_key: Option<String>,
    cache: Arc<dyn KvStore>,
    settings: TicketmasterSettings,
}

impl TicketmasterFetcher {
    pub fn new(
        api_key: Option<String>,
        cache: Arc<dyn KvStore>,
        settings: TicketmasterSettings,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            cache,
            settings,
        }
    }

    async fn fetch_page(&self, api_key: &str, page: u32, today: &str, end: &str) -> Result<DiscoveryResponse> {
        let latlong = format!("{},{}", self.settings.latitude, self.settings.longitude);
        let radius = self.settings.radius_miles.to_string();
        let size = self.settings.page_size.to_string();
        let page_str = page.to_string();
        let start = format!("{today}T00:00:00Z");
        let finish = format!("{end}T23:59:59Z");
        let url = reqwest::Url::parse_with_params(
            BASE_URL,
            [
                ("apikey", api_key),
                ("latlong", latlong.as_str()),
                ("radius", radius.as_str()),
                ("unit", "miles"),
                ("size", size.as_str()),
                ("page", page_str.as_str()),
                ("startDateTime", start.as_str()),
                ("endDateTime", finish.as_str()),
                ("sort", "date,asc"),
            ],
        )
        .map_err(|e| PipelineError::Config(format!("bad discovery URL: {e}")))?;

        let res = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(PipelineError::Api {
                message: format!(
                    "discovery API {status}: {}",
                    body.chars().take(200).collect::<String>()
                ),
            });
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl StructuredFetcher for TicketmasterFetcher {
    fn fetcher_id(&self) -> &'static str {
        TICKETMASTER_SOURCE_ID
    }

    #[instrument(skip(self))]
    async fn fetch_events(&self) -> Result<Vec<Candidate>> {
        let Some(api_key) = self.api_key.clone() else {
            info!("no TICKETMASTER_API_KEY configured, skipping discovery API");
            return Ok(Vec::new());
        };

        let ttl = ChronoDuration::hours(self.settings.cache_ttl_hours);
        if let Some(entry) = self.cache.get_fresh(CACHE_KEY, ttl)? {
            if let Ok(cached) = serde_json::from_value::<Vec<Candidate>>(entry) {
                info!("using cached discovery API data ({} events)", cached.len());
                return Ok(cached);
            }
        }

        let today = Utc::now().date_naive().to_string();
        let end = (Utc::now().date_naive() + ChronoDuration::days(LOOKAHEAD_DAYS)).to_string();
        info!(
            "fetching discovery API: {},{} ({}mi radius), {} to {}",
            self.settings.latitude, self.settings.longitude, self.settings.radius_miles, today, end
        );

        let mut events = Vec::new();
        let mut total_pages = 1u32;
        let mut page = 0u32;
        while page < total_pages.min(self.settings.max_pages) {
            if page > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.page_delay_ms)).await;
            }
            let data = self.fetch_page(&api_key, page, &today, &end).await?;
            total_pages = data.page.map(|p| p.total_pages).unwrap_or(1).max(1);

            let raw = data.embedded.map(|e| e.events).unwrap_or_default();
            if raw.is_empty() {
                break;
            }
            events.extend(raw.iter().filter_map(|ev| map_event(ev, &today, &end)));
            info!(
                "  page {}/{}: {} raw, {} mapped so far",
                page + 1,
                total_pages.min(self.settings.max_pages),
                raw.len(),
                events.len()
            );
            page += 1;
        }

        put_typed(self.cache.as_ref(), CACHE_KEY, &events)?;
        info!("discovery API: {} events fetched and cached", events.len());
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> TmEvent {
        serde_json::from_value(json!({
            "name": "Creighton Bluejays vs DePaul Blue Demons",
            "id": "G5vYZ9K8sM1xP",
            "url": "https://www.ticketmaster.com/event/G5vYZ9K8sM1xP",
            "dates": {
                "start": {"localDate": "2099-01-15", "localTime": "19:30:00"},
                "status": {"code": "onsale"}
            },
            "classifications": [{
                "genre": {"name": "Basketball"},
                "segment": {"name": "Sports"}
            }],
            "priceRanges": [{"min": 18.0, "max": 85.0}],
            "images": [
                {"ratio": "3_2", "width": 305, "url": "https://img/small.jpg"},
                {"ratio": "16_9", "width": 1024, "url": "https://img/ideal.jpg"}
            ],
            "_embedded": {
                "venues": [{"name": "CHI Health Center Omaha", "city": {"name": "Omaha"}}],
                "attractions": [{"name": "Creighton Bluejays"}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn maps_a_full_event() {
        let c = map_event(&sample_event(), "2098-12-01", "2099-03-01").unwrap();
        assert_eq!(c.venue, "CHI Health Center");
        assert_eq!(c.area, "Omaha");
        assert_eq!(c.date, "2099-01-15");
        assert_eq!(c.time, "7:30 PM");
        assert_eq!(c.price, "$18\u{2013}$85");
        assert_eq!(c.cat, Some(Category::Sports));
        assert_eq!(c.image.as_deref(), Some("https://img/ideal.jpg"));
        assert_eq!(c.vendor_event_id.as_deref(), Some("G5vYZ9K8sM1xP"));
        assert!(c.url_valid);
    }

    #[test]
    fn drops_non_metro_and_cancelled() {
        let mut ev = sample_event();
        ev.embedded.venues[0].city = Some(TmCity { name: Some("Lincoln".into()) });
        assert!(map_event(&ev, "2098-12-01", "2099-03-01").is_none());

        let mut ev = sample_event();
        ev.dates.status.code = Some("cancelled".into());
        assert!(map_event(&ev, "2098-12-01", "2099-03-01").is_none());
    }

    #[test]
    fn drops_ancillary_inventory() {
        for title in ["Suites: Creighton vs DePaul", "Parking Voucher", "Hotel Reservations Pkg"] {
            let mut ev = sample_event();
            ev.name = title.to_string();
            assert!(map_event(&ev, "2098-12-01", "2099-03-01").is_none(), "{title}");
        }
    }

    #[test]
    fn drops_out_of_window_dates() {
        let ev = sample_event();
        assert!(map_event(&ev, "2099-02-01", "2099-05-01").is_none());
    }

    #[test]
    fn genre_chain_falls_back_to_segment() {
        let c: Vec<TmClassification> = serde_json::from_value(json!([{
            "genre": {"name": "Offbeat"},
            "subGenre": {"name": "Other"},
            "segment": {"name": "Arts & Theatre"}
        }]))
        .unwrap();
        assert_eq!(classify(&c), Category::Arts);
        assert_eq!(classify(&[]), Category::Concerts);
    }

    #[test]
    fn image_preference_order() {
        let imgs: Vec<TmImage> = serde_json::from_value(json!([
            {"ratio": "3_2", "width": 2048, "url": "https://img/large32.jpg"},
            {"ratio": "16_9", "width": 2048, "url": "https://img/big169.jpg"},
            {"ratio": "16_9", "width": 800, "url": "https://img/ideal.jpg"}
        ]))
        .unwrap();
        assert_eq!(pick_image(&imgs).as_deref(), Some("https://img/ideal.jpg"));

        let no_ideal: Vec<TmImage> = serde_json::from_value(json!([
            {"ratio": "4_3", "width": 100, "url": "https://img/tiny.jpg"}
        ]))
        .unwrap();
        assert_eq!(pick_image(&no_ideal).as_deref(), Some("https://img/tiny.jpg"));
        assert_eq!(pick_image(&[]), None);
    }

    #[test]
    fn price_formats() {
        let mk = |min: Option<f64>, max: Option<f64>| vec![TmPriceRange { min, max }];
        assert_eq!(format_price(&mk(Some(0.0), Some(0.0))), "Free");
        assert_eq!(format_price(&mk(Some(25.0), Some(45.5))), "$25\u{2013}$45.5");
        assert_eq!(format_price(&mk(Some(25.0), Some(25.0))), "$25");
        assert_eq!(format_price(&[]), "TBD");
    }
}
