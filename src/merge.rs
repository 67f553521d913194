//! Build-time reconciliation over the accumulated event store. Where the
//! per-run validator dedups on title similarity, this pass groups on
//! (normalized venue, date) to catch the same real-world occurrence arriving
//! through independent paths — a structured API record and an extracted
//! record for one concert — and merges their fields into a single survivor.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};

use crate::constants::MERGE_SIMILARITY_THRESHOLD;
use crate::ident::assign_unique_ids;
use crate::ranking::{completeness_score, is_api_source, merge_into};
use crate::registry::{GENERIC_URLS, VENUE_URL_MAP};
use crate::similarity::word_overlap;
use crate::types::{EventRecord, EventStatus};
use crate::urls::{is_placeholder_image, sanitize_url};
use crate::venues::venue_merge_key;

/// Venues whose events never belong in the catalog.
const EXCLUDED_VENUES: &[&str] = &["prairie meadows", "finish line", "library"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeSummary {
    pub input: usize,
    pub expired_dropped: usize,
    pub hidden_dropped: usize,
    pub urls_sanitized: usize,
    pub placeholder_images_stripped: usize,
    pub excluded_venue_dropped: usize,
    pub api_scraped_merges: usize,
    pub fuzzy_merges: usize,
    pub urls_upgraded: usize,
    pub marketplace_links: usize,
    pub venue_url_fallbacks: usize,
    pub zero_data_dropped: usize,
    pub ids_regenerated: usize,
    pub output: usize,
}

fn group_by_venue_date(events: &[EventRecord]) -> Vec<Vec<usize>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, ev) in events.iter().enumerate() {
        let key = format!("{}|{}", venue_merge_key(&ev.venue), ev.date);
        groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            Vec::new()
        });
        groups.get_mut(&key).unwrap().push(i);
    }
    order.into_iter().map(|k| groups.remove(&k).unwrap()).collect()
}

/// Cleanup applied before any grouping: expired and hidden records drop,
/// known-bad URL shapes are repaired, vendor placeholder artwork is
/// stripped, excluded venues are filtered.
fn sanitize(events: Vec<EventRecord>, today: NaiveDate, summary: &mut MergeSummary) -> Vec<EventRecord> {
    let mut out = Vec::with_capacity(events.len());
    for mut ev in events {
        if ev.date < today {
            summary.expired_dropped += 1;
            continue;
        }
        if ev.status == EventStatus::Hidden {
            summary.hidden_dropped += 1;
            continue;
        }
        let venue_lower = ev.venue.to_lowercase();
        if EXCLUDED_VENUES.iter().any(|ex| venue_lower.contains(ex)) {
            summary.excluded_venue_dropped += 1;
            continue;
        }
        if let Some(url) = ev.url.take() {
            let fixed = sanitize_url(&url, ev.vendor_event_id.as_deref());
            if fixed.as_deref() != Some(url.as_str()) {
                summary.urls_sanitized += 1;
            }
            ev.url = fixed;
        }
        if let Some(image) = &ev.image {
            if is_placeholder_image(image) {
                ev.image = None;
                summary.placeholder_images_stripped += 1;
            }
        }
        out.push(ev);
    }
    out
}

/// Pass 1: within each venue+date group holding both API-sourced and
/// extracted records, keep the completeness winner (ties favor the API
/// record), fold the loser's fields in, and discard the rest of the group.
fn merge_api_vs_scraped(
    events: Vec<EventRecord>,
    generic: &HashSet<&str>,
    summary: &mut MergeSummary,
) -> Vec<EventRecord> {
    let mut events = events;
    let mut dropped: HashSet<usize> = HashSet::new();

    for group in group_by_venue_date(&events) {
        if group.len() < 2 {
            continue;
        }
        let api: Vec<usize> = group.iter().copied().filter(|&i| is_api_source(&events[i].source_id)).collect();
        let scraped: Vec<usize> = group.iter().copied().filter(|&i| !is_api_source(&events[i].source_id)).collect();
        if api.is_empty() || scraped.is_empty() {
            continue;
        }

        // Representative API record: the first carrying an image, else the
        // first outright. Representative scraped record: highest score,
        // earliest on ties.
        let api_idx = api
            .iter()
            .copied()
            .find(|&i| events[i].image.is_some())
            .unwrap_or(api[0]);
        let sc_idx = scraped
            .iter()
            .copied()
            .reduce(|best, cur| {
                if completeness_score(&events[cur], generic) > completeness_score(&events[best], generic) {
                    cur
                } else {
                    best
                }
            })
            .unwrap();

        let keep_api = completeness_score(&events[api_idx], generic)
            >= completeness_score(&events[sc_idx], generic);
        let (winner, loser) = if keep_api { (api_idx, sc_idx) } else { (sc_idx, api_idx) };

        let donor = events[loser].clone();
        merge_into(&mut events[winner], &donor, generic);

        for &i in &group {
            if i != winner {
                dropped.insert(i);
            }
        }
        summary.api_scraped_merges += 1;
    }

    events
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, ev)| ev)
        .collect()
}

/// Pass 2: near-duplicate titles within the same venue+date group merge
/// even when both records came in through the same kind of source.
fn merge_fuzzy_titles(
    events: Vec<EventRecord>,
    generic: &HashSet<&str>,
    summary: &mut MergeSummary,
) -> Vec<EventRecord> {
    let mut events = events;
    let mut dropped: HashSet<usize> = HashSet::new();

    for group in group_by_venue_date(&events) {
        if group.len() < 2 {
            continue;
        }
        for a in 0..group.len() {
            let i = group[a];
            if dropped.contains(&i) {
                continue;
            }
            for b in (a + 1)..group.len() {
                let j = group[b];
                if dropped.contains(&j) {
                    continue;
                }
                let sim = word_overlap(&events[i].title, &events[j].title);
                if sim < MERGE_SIMILARITY_THRESHOLD {
                    continue;
                }
                let score_i = completeness_score(&events[i], generic);
                let score_j = completeness_score(&events[j], generic);
                let (winner, loser) = if score_i >= score_j { (i, j) } else { (j, i) };
                let donor = events[loser].clone();
                merge_into(&mut events[winner], &donor, generic);
                dropped.insert(loser);
                summary.fuzzy_merges += 1;
                if winner != i {
                    break;
                }
            }
        }
    }

    events
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, ev)| ev)
        .collect()
}

/// Pass 3: records stuck on a generic calendar URL inherit a real ticket URL
/// discovered by an API source in the same venue+date group.
fn upgrade_urls(events: &mut [EventRecord], generic: &HashSet<&str>, summary: &mut MergeSummary) {
    let mut ticket_urls: HashMap<String, String> = HashMap::new();
    for ev in events.iter() {
        if !is_api_source(&ev.source_id) {
            continue;
        }
        let Some(url) = &ev.url else { continue };
        if generic.contains(url.as_str()) {
            continue;
        }
        let key = format!("{}|{}", venue_merge_key(&ev.venue), ev.date);
        ticket_urls.entry(key).or_insert_with(|| url.clone());
    }

    for ev in events.iter_mut() {
        let is_generic = ev.url.as_deref().map(|u| generic.contains(u)).unwrap_or(false);
        if !is_generic {
            continue;
        }
        let key = format!("{}|{}", venue_merge_key(&ev.venue), ev.date);
        if let Some(better) = ticket_urls.get(&key) {
            ev.url = Some(better.clone());
            ev.url_upgraded = true;
            summary.urls_upgraded += 1;
        }
    }
}

struct MarketplaceLink {
    pattern: Regex,
    url: &'static str,
}

/// Recurring sports franchises with stable marketplace performer pages,
/// used as a last resort for records still stuck on a calendar URL.
static MARKETPLACE_LINKS: Lazy<Vec<MarketplaceLink>> = Lazy::new(|| {
    let link = |pattern: &str, url: &'static str| MarketplaceLink {
        pattern: Regex::new(pattern).unwrap(),
        url,
    };
    vec![
        link(r"(?i)omaha.*(hockey|maverick)", "https://www.stubhub.com/omaha-mavericks-men-s-hockey-tickets/performer/180988"),
        link(r"(?i)omaha.*(basketball|women.*basket)", "https://www.stubhub.com/omaha-mavericks-men-s-basketball-tickets/performer/170810"),
        link(r"(?i)creighton.*basketball", "https://www.stubhub.com/creighton-bluejays-mens-basketball-tickets/performer/3410"),
        link(r"(?i)creighton.*baseball", "https://www.stubhub.com/creighton-bluejays-baseball-tickets/performer/100291"),
        link(r"(?i)storm\s*chasers", "https://www.stubhub.com/omaha-storm-chasers-tickets/performer/3906"),
        link(r"(?i)union\s*omaha", "https://www.stubhub.com/union-omaha-tickets/performer/100623"),
        link(r"(?i)omaha.*lancers", "https://www.stubhub.com/omaha-lancers-tickets/performer/9488"),
        link(r"(?i)supernova|lovb.*nebraska", "https://www.stubhub.com/lovb-omaha-supernovas-tickets/performer/102118"),
    ]
});

fn apply_marketplace_fallback(events: &mut [EventRecord], generic: &HashSet<&str>, summary: &mut MergeSummary) {
    for ev in events.iter_mut() {
        let is_generic = ev.url.as_deref().map(|u| generic.contains(u)).unwrap_or(false);
        if !is_generic {
            continue;
        }
        let text = format!("{} {}", ev.title, ev.venue);
        if let Some(link) = MARKETPLACE_LINKS.iter().find(|l| l.pattern.is_match(&text)) {
            ev.url = Some(link.url.to_string());
            summary.marketplace_links += 1;
        }
    }
}

/// The whole build-time pass. Running it twice over its own output changes
/// nothing: every sub-pass is a fixed point, including id regeneration.
#[instrument(skip_all, fields(input = events.len()))]
pub fn merge_pass(events: Vec<EventRecord>, today: NaiveDate) -> (Vec<EventRecord>, MergeSummary) {
    let mut summary = MergeSummary {
        input: events.len(),
        ..Default::default()
    };
    let generic: HashSet<&str> = GENERIC_URLS.iter().copied().collect();

    let events = sanitize(events, today, &mut summary);
    let events = merge_api_vs_scraped(events, &generic, &mut summary);
    let mut events = merge_fuzzy_titles(events, &generic, &mut summary);

    upgrade_urls(&mut events, &generic, &mut summary);
    apply_marketplace_fallback(&mut events, &generic, &mut summary);

    // Sourceless-link fallback, then drop records carrying no link and no
    // image at all: nothing useful to show or point at.
    for ev in events.iter_mut() {
        if ev.url.is_none() {
            if let Some(url) = VENUE_URL_MAP.get(ev.source_id.as_str()) {
                ev.url = Some((*url).to_string());
                summary.venue_url_fallbacks += 1;
            }
        }
    }
    let before = events.len();
    events.retain(|ev| ev.url.is_some() || ev.image.is_some());
    summary.zero_data_dropped = before - events.len();

    events.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    summary.ids_regenerated = assign_unique_ids(&mut events);
    summary.output = events.len();

    info!(
        "merge pass: {} in, {} out ({} api/scraped merges, {} fuzzy, {} upgraded URLs)",
        summary.input, summary.output, summary.api_scraped_merges, summary.fuzzy_merges, summary.urls_upgraded
    );
    (events, summary)
}
