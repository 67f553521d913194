//! Natural-language extraction of event candidates from scraped page text.
//!
//! The extraction service sits behind [`EventExtractor`] so the NLP backend
//! can be swapped per source without touching orchestration. The production
//! implementation calls the Anthropic Messages API and recovers a JSON array
//! from freeform model output.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::ExtractorSettings;
use crate::constants::{EXTRACT_MAX_CHARS_BATCHED, EXTRACT_MAX_CHARS_SOLO, LOOKAHEAD_DAYS, SOLO_CONTENT_BYTES};
use crate::error::{PipelineError, Result};
use crate::registry::Source;
use crate::types::{Candidate, Category, ScrapeResult};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const CALL_RETRIES: u32 = 2;
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// What the model returns per event, loosely typed on purpose: everything
/// here is still unvalidated.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExtractedEvent {
    pub title: String,
    pub venue: String,
    pub area: String,
    pub date: String,
    pub time: String,
    pub price: String,
    pub desc: String,
    pub url: Option<String>,
    pub cat: Option<String>,
}

/// Hints handed to the extraction backend alongside the page text.
#[derive(Debug, Clone)]
pub struct ExtractionHints {
    pub source_name: String,
    pub venue: Option<String>,
    pub cats: Vec<String>,
    /// True when the text contains several sources behind separators.
    pub multi_source: bool,
}

#[async_trait]
pub trait EventExtractor: Send + Sync {
    async fn extract(&self, text: &str, hints: &ExtractionHints) -> Result<Vec<ExtractedEvent>>;
}

pub struct AnthropicExtractor {
    client: reqwest::Client,
    api_key: String,
    settings: ExtractorSettings,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicExtractor {
    pub fn new(api_key: String, settings: ExtractorSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            settings,
        }
    }

    fn window() -> (String, String) {
        let today = Utc::now().date_naive();
        let end = today + ChronoDuration::days(LOOKAHEAD_DAYS);
        (today.to_string(), end.to_string())
    }

    fn system_prompt(&self, hints: &ExtractionHints) -> String {
        let (today, end) = Self::window();
        if hints.multi_source {
            return format!(
                "You are an expert event data extractor for Omaha, Nebraska. Today is {today}.\n\
                 Multiple event sources are provided below, separated by === SOURCE: ... === headers.\n\
                 Extract events from ALL sources. Rules:\n\
                 - Only real events with dates between {today} and {end}\n\
                 - Each must have: title, date (YYYY-MM-DD), venue, area\n\
                 - Return a single JSON array combining events from all sources\n\
                 - If no events, return []\n\n\
                 Each object: {{\"title\":\"...\",\"venue\":\"...\",\"area\":\"...\",\"date\":\"YYYY-MM-DD\",\
                 \"time\":\"...\",\"price\":\"...\",\"desc\":\"...\",\"url\":\"ticket/event URL or null\",\
                 \"cat\":\"concerts|comedy|sports|festivals|family|arts\"}}"
            );
        }

        let venue_hint = hints
            .venue
            .as_ref()
            .map(|v| format!("\nThe venue for all events on this page is \"{v}\"."))
            .unwrap_or_default();
        let cat_hint = if hints.cats.is_empty() {
            String::new()
        } else {
            format!("\nCategory hints: {}", hints.cats.join(", "))
        };
        format!(
            "You are an expert event data extractor for Omaha, Nebraska. Today is {today}.\n\n\
             RULES:\n\
             - Extract ONLY real events with confirmed dates between {today} and {end}\n\
             - Each event MUST have: title, date (YYYY-MM-DD format), venue name, and area/neighborhood\n\
             - Do NOT invent events — only extract what's clearly in the text\n\
             - If a URL for the specific event/ticket is visible, include it\n\
             - If time or price isn't clear, use \"TBD\"\n\
             - For recurring events (weekly shows, etc.), include the next 4 occurrences\n\
             - Skip past events, closed registrations, and general descriptions\n\
             - Omaha area includes: Omaha, Council Bluffs, Papillion, La Vista, Bellevue, Ralston, Gretna, Elkhorn{venue_hint}{cat_hint}\n\n\
             Return ONLY a JSON array. Each object:\n\
             {{\"title\":\"...\",\"venue\":\"...\",\"area\":\"...\",\"date\":\"YYYY-MM-DD\",\"time\":\"H:MM AM/PM or TBD\",\
             \"price\":\"$X–$Y or Free or TBD\",\"desc\":\"1-2 sentence description\",\
             \"url\":\"direct event/ticket URL if found, or null\",\"cat\":\"concerts|comedy|sports|festivals|family|arts\"}}\n\n\
             If no events found, return []."
        )
    }

    async fn call(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });

        for attempt in 0..=CALL_RETRIES {
            let res = self
                .client
                .post(API_URL)
                .header("Content-Type", "application/json")
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .timeout(CALL_TIMEOUT)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(res) if res.status().as_u16() == 429 => {
                    tokio::time::sleep(Duration::from_millis(5_000 * (attempt as u64 + 1))).await;
                    continue;
                }
                Ok(res) if !res.status().is_success() => {
                    let status = res.status().as_u16();
                    let detail = res.text().await.unwrap_or_default();
                    if attempt == CALL_RETRIES {
                        return Err(PipelineError::Api {
                            message: format!("extraction API {status}: {}", truncate_at(&detail, 200)),
                        });
                    }
                }
                Ok(res) => {
                    let parsed: MessagesResponse = res.json().await?;
                    return Ok(parsed
                        .content
                        .into_iter()
                        .filter(|b| b.kind == "text")
                        .map(|b| b.text)
                        .collect::<Vec<_>>()
                        .join("\n"));
                }
                Err(e) => {
                    if attempt == CALL_RETRIES {
                        return Err(e.into());
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(3_000 * (attempt as u64 + 1))).await;
        }

        Err(PipelineError::Api {
            message: "extraction call retries exhausted".to_string(),
        })
    }
}

#[async_trait]
impl EventExtractor for AnthropicExtractor {
    async fn extract(&self, text: &str, hints: &ExtractionHints) -> Result<Vec<ExtractedEvent>> {
        let system = self.system_prompt(hints);
        let user = if hints.multi_source {
            text.to_string()
        } else {
            format!(
                "Extract upcoming events from this {} page content:\n\n{}",
                hints.source_name, text
            )
        };
        let raw = self.call(&system, &user).await?;
        let Some(array_text) = locate_json_array(&raw) else {
            warn!("extraction output for {} had no JSON array", hints.source_name);
            return Ok(Vec::new());
        };
        let events: Vec<ExtractedEvent> = serde_json::from_str(array_text)?;
        Ok(events
            .into_iter()
            .filter(|e| !e.title.is_empty() && !e.date.is_empty())
            .collect())
    }
}

/// Locate the outermost JSON array in freeform model output by bracket
/// matching, skipping brackets inside string literals.
pub fn locate_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte-budget truncation preserving both the top of the page (most events)
/// and the tail (footer links): 80% head, 20% tail, explicit marker between.
pub fn truncate_content(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let head_budget = max_chars * 8 / 10;
    let tail_budget = max_chars - head_budget;
    let head = &text[..floor_char_boundary(text, head_budget)];
    let tail = &text[ceil_char_boundary(text, text.len() - tail_budget)..];
    format!("{head}\n\n[...content truncated...]\n\n{tail}")
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn truncate_at(s: &str, max: usize) -> &str {
    &s[..floor_char_boundary(s, max)]
}

/// A scraped source paired with its content, ready for extraction.
pub struct ScrapedPage {
    pub source: Source,
    pub content: String,
}

impl ScrapedPage {
    pub fn from_results(sources: &[Source], results: &[ScrapeResult]) -> Vec<ScrapedPage> {
        results
            .iter()
            .filter_map(|r| {
                let content = r.content.clone()?;
                let source = sources.iter().find(|s| s.id == r.source_id)?;
                Some(ScrapedPage {
                    source: *source,
                    content,
                })
            })
            .collect()
    }
}

fn hints_for(source: &Source, multi_source: bool) -> ExtractionHints {
    ExtractionHints {
        source_name: source.name.to_string(),
        venue: source.venue.map(str::to_string),
        cats: source
            .cats
            .iter()
            .filter(|c| **c != "all")
            .map(|c| c.to_string())
            .collect(),
        multi_source,
    }
}

fn to_candidate(e: ExtractedEvent, source: &Source) -> Candidate {
    let area = if e.area.trim().is_empty() {
        source.area.to_string()
    } else {
        e.area
    };
    let url = e.url.filter(|u| !u.is_empty() && u != "null" && u != "#");
    Candidate {
        title: e.title,
        venue: e.venue,
        area,
        date: e.date,
        time: if e.time.is_empty() { "TBD".into() } else { e.time },
        price: if e.price.is_empty() { "TBD".into() } else { e.price },
        desc: e.desc,
        url,
        image: None,
        cat: e.cat.as_deref().and_then(Category::parse),
        source_id: source.id.to_string(),
        source_priority: source.priority,
        venue_url: Some(source.url.to_string()),
        vendor_event_id: None,
        url_valid: false,
        affiliate_platform: None,
    }
}

/// Attribute a batched-extraction event back to its source by matching the
/// first word of each member's canonical venue name, falling back to the
/// batch's first member.
fn attribute<'a>(event: &ExtractedEvent, batch: &[&'a ScrapedPage]) -> &'a Source {
    let event_venue = event.venue.to_lowercase();
    batch
        .iter()
        .find(|p| {
            p.source
                .venue
                .and_then(|v| v.to_lowercase().split_whitespace().next().map(str::to_string))
                .map(|first| event_venue.contains(&first))
                .unwrap_or(false)
        })
        .map(|p| &p.source)
        .unwrap_or(&batch[0].source)
}

/// Run the extraction stage over every scraped page.
///
/// Tier-1 or oversized sources get solo calls; the rest are paired up into
/// combined calls. Calls run strictly sequentially with a politeness delay.
pub async fn extract_all(
    extractor: &dyn EventExtractor,
    pages: &[ScrapedPage],
    settings: &ExtractorSettings,
) -> Vec<Candidate> {
    let mut solo: Vec<&ScrapedPage> = Vec::new();
    let mut batchable: Vec<&ScrapedPage> = Vec::new();
    for page in pages {
        if page.source.tier == 1 || page.content.len() > SOLO_CONTENT_BYTES {
            solo.push(page);
        } else {
            batchable.push(page);
        }
    }

    let mut candidates = Vec::new();
    let delay = Duration::from_millis(settings.call_delay_ms);

    for (i, page) in solo.iter().enumerate() {
        info!(
            "extracting {} (solo, {:.1}KB)",
            page.source.id,
            page.content.len() as f64 / 1024.0
        );
        let text = truncate_content(&page.content, EXTRACT_MAX_CHARS_SOLO);
        match extractor.extract(&text, &hints_for(&page.source, false)).await {
            Ok(events) => {
                info!("  -> {} events", events.len());
                counter!("extracted_events_total").increment(events.len() as u64);
                candidates.extend(events.into_iter().map(|e| to_candidate(e, &page.source)));
            }
            Err(e) => error!("extraction failed for {}: {}", page.source.id, e),
        }
        if i + 1 < solo.len() {
            tokio::time::sleep(delay).await;
        }
    }

    let groups: Vec<&[&ScrapedPage]> = batchable.chunks(2).collect();
    for (gi, group) in groups.iter().enumerate() {
        if !solo.is_empty() || gi > 0 {
            tokio::time::sleep(delay).await;
        }
        info!(
            "extracting batch: {}",
            group.iter().map(|p| p.source.id).collect::<Vec<_>>().join(" + ")
        );
        let combined = group
            .iter()
            .map(|p| {
                format!(
                    "=== SOURCE: {} ({}) ===\n{}",
                    p.source.name,
                    p.source.url,
                    truncate_content(&p.content, EXTRACT_MAX_CHARS_BATCHED)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let hints = ExtractionHints {
            source_name: group
                .iter()
                .map(|p| p.source.name.to_string())
                .collect::<Vec<_>>()
                .join(" + "),
            venue: None,
            cats: Vec::new(),
            multi_source: true,
        };
        match extractor.extract(&combined, &hints).await {
            Ok(events) => {
                info!("  -> {} events", events.len());
                counter!("extracted_events_total").increment(events.len() as u64);
                for event in events {
                    let source = attribute(&event, group);
                    let source = *source;
                    candidates.push(to_candidate(event, &source));
                }
            }
            Err(e) => error!("batch extraction failed: {}", e),
        }
    }

    candidates
}
