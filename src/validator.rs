//! Per-run validation: date gate, priority-ordered deduplication,
//! enrichment, URL liveness, affiliate rewriting, URL fallback, date sort —
//! applied in that order to the combined candidate set.

use chrono::{Duration as ChronoDuration, NaiveDate};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, instrument};

use crate::categorize::{classify, infer_tags};
use crate::config::Secrets;
use crate::constants::{DEDUP_SIMILARITY_THRESHOLD, LOOKAHEAD_DAYS};
use crate::ident::stable_id;
use crate::ranking::sort_by_priority;
use crate::similarity::{normalize_title, title_similarity};
use crate::types::{Candidate, EventRecord, EventStatus};
use crate::urls::{check_url, rewrite_affiliate};

const URL_CHECK_CONCURRENCY: usize = 5;
const URL_CHECK_WAVE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationSummary {
    pub input: usize,
    pub rejected_malformed: usize,
    pub rejected_past: usize,
    pub rejected_too_far: usize,
    pub duplicates_removed: usize,
    pub urls_validated: usize,
    pub urls_fixed: usize,
    pub urls_failed: usize,
    pub affiliates_rewritten: usize,
    pub url_fallbacks: usize,
    pub output: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions {
    /// Skip the (slow) outbound URL liveness checks.
    pub skip_url_check: bool,
}

static DATE_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Gate 1: well-formed date within [today, today + lookahead].
fn validate_dates(
    candidates: Vec<Candidate>,
    today: NaiveDate,
    summary: &mut ValidationSummary,
) -> Vec<(Candidate, NaiveDate)> {
    let end = today + ChronoDuration::days(LOOKAHEAD_DAYS);
    let mut valid = Vec::with_capacity(candidates.len());
    for c in candidates {
        if !DATE_SHAPE.is_match(&c.date) {
            summary.rejected_malformed += 1;
            continue;
        }
        let Ok(date) = NaiveDate::parse_from_str(&c.date, "%Y-%m-%d") else {
            summary.rejected_malformed += 1;
            continue;
        };
        if date < today {
            summary.rejected_past += 1;
            continue;
        }
        if date > end {
            summary.rejected_too_far += 1;
            continue;
        }
        valid.push((c, date));
    }
    valid
}

/// Gate 2: priority-ordered dedup. Candidates are walked best-source-first;
/// an exact vendor-id repeat or a same-date title above the similarity
/// threshold loses to whatever was kept before it.
fn deduplicate(
    mut dated: Vec<(Candidate, NaiveDate)>,
    summary: &mut ValidationSummary,
) -> Vec<(Candidate, NaiveDate)> {
    let before = dated.len();
    // Stable: equal priorities keep input order, so tie-breaks are
    // deterministic for a given candidate sequence.
    sort_by_priority(&mut dated, |(c, _)| c.source_priority);

    let mut kept: Vec<(Candidate, NaiveDate)> = Vec::with_capacity(dated.len());
    let mut seen_titles: Vec<(String, NaiveDate)> = Vec::with_capacity(dated.len());
    let mut seen_vendor_ids: HashSet<String> = HashSet::new();

    for (c, date) in dated {
        if let Some(vid) = &c.vendor_event_id {
            if !seen_vendor_ids.insert(vid.clone()) {
                continue;
            }
        }
        let norm = normalize_title(&c.title);
        let duplicate = seen_titles
            .iter()
            .any(|(t, d)| *d == date && title_similarity(t, &norm) > DEDUP_SIMILARITY_THRESHOLD);
        if duplicate {
            continue;
        }
        seen_titles.push((norm, date));
        kept.push((c, date));
    }

    summary.duplicates_removed = before - kept.len();
    kept
}

/// Gate 3: a candidate becomes a full record — category resolved, tags and
/// emoji attached, stable id assigned.
fn enrich(c: Candidate, date: NaiveDate) -> EventRecord {
    let cat = classify(&c.title, &c.desc, &c.venue, c.cat);
    let tags = infer_tags(&c.title, cat);
    let id = stable_id(&c.title, &c.date, &c.venue, &c.source_id);
    EventRecord {
        id,
        title: c.title,
        venue: c.venue,
        area: c.area,
        date,
        time: c.time,
        price: c.price,
        desc: c.desc,
        url: c.url,
        image: c.image,
        cat,
        tags,
        emoji: cat.emoji().to_string(),
        source_id: c.source_id,
        source_priority: c.source_priority,
        venue_url: c.venue_url,
        vendor_event_id: c.vendor_event_id,
        url_valid: c.url_valid,
        url_upgraded: false,
        affiliate_platform: c.affiliate_platform,
        status: EventStatus::Active,
    }
}

/// Gate 4: liveness-check outbound URLs in small concurrent waves. Dead
/// links fall back to the source's calendar URL when one exists; otherwise
/// the record is kept but flagged invalid.
async fn validate_urls(
    client: &reqwest::Client,
    events: &mut [EventRecord],
    summary: &mut ValidationSummary,
) {
    let to_check: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            e.url
                .as_deref()
                .map(|u| u != "#" && u.contains('/'))
                .unwrap_or(false)
        })
        .map(|(i, _)| i)
        .collect();

    info!("validating {} event URLs", to_check.len());

    for wave in to_check.chunks(URL_CHECK_CONCURRENCY) {
        let mut set: JoinSet<(usize, crate::urls::UrlCheck)> = JoinSet::new();
        for &i in wave {
            let client = client.clone();
            let url = events[i].url.clone().unwrap_or_default();
            set.spawn(async move { (i, check_url(&client, &url).await) });
        }
        while let Some(Ok((i, check))) = set.join_next().await {
            apply_url_check(&mut events[i], &check, summary);
        }
        tokio::time::sleep(URL_CHECK_WAVE_DELAY).await;
    }
}

/// Resolution of one liveness check: a live URL is marked validated; a dead
/// one falls back to the source's calendar URL when that is a real
/// alternative, else the record is kept but flagged invalid.
fn apply_url_check(
    ev: &mut EventRecord,
    check: &crate::urls::UrlCheck,
    summary: &mut ValidationSummary,
) {
    if check.valid {
        ev.url_valid = true;
        summary.urls_validated += 1;
    } else if ev.venue_url.is_some() && ev.venue_url != ev.url {
        ev.url = ev.venue_url.clone();
        summary.urls_fixed += 1;
    } else {
        ev.url_valid = false;
        summary.urls_failed += 1;
    }
}

/// Gate 5: append affiliate tracking parameters for recognized platforms.
fn rewrite_affiliates(events: &mut [EventRecord], secrets: &Secrets, summary: &mut ValidationSummary) {
    for ev in events.iter_mut() {
        let Some(url) = ev.url.as_deref() else { continue };
        if url == "#" {
            continue;
        }
        if let Some((rewritten, platform)) = rewrite_affiliate(url, secrets) {
            ev.url = Some(rewritten);
            ev.affiliate_platform = Some(platform.to_string());
            summary.affiliates_rewritten += 1;
        }
    }
}

/// The full validation pipeline, in strict order.
#[instrument(skip_all, fields(input = candidates.len()))]
pub async fn validate(
    candidates: Vec<Candidate>,
    client: &reqwest::Client,
    secrets: &Secrets,
    today: NaiveDate,
    options: ValidationOptions,
) -> (Vec<EventRecord>, ValidationSummary) {
    let mut summary = ValidationSummary {
        input: candidates.len(),
        ..Default::default()
    };

    let dated = validate_dates(candidates, today, &mut summary);
    info!(
        "date validation: {} valid, {} past, {} malformed, {} too far",
        dated.len(),
        summary.rejected_past,
        summary.rejected_malformed,
        summary.rejected_too_far
    );

    let deduped = deduplicate(dated, &mut summary);
    info!(
        "dedup: {} kept, {} duplicates removed",
        deduped.len(),
        summary.duplicates_removed
    );
    counter!("validator_duplicates_removed_total")
        .increment(summary.duplicates_removed as u64);

    let mut events: Vec<EventRecord> = deduped
        .into_iter()
        .map(|(c, date)| enrich(c, date))
        .collect();

    if options.skip_url_check {
        info!("URL validation skipped");
    } else {
        validate_urls(client, &mut events, &mut summary).await;
        info!(
            "URL checks: {} valid, {} fixed, {} failed",
            summary.urls_validated, summary.urls_fixed, summary.urls_failed
        );
    }

    rewrite_affiliates(&mut events, secrets, &mut summary);
    if summary.affiliates_rewritten > 0 {
        info!("affiliate URLs rewritten: {}", summary.affiliates_rewritten);
    }

    // Records still lacking any URL get their source's calendar URL.
    for ev in events.iter_mut() {
        let unusable = ev
            .url
            .as_deref()
            .map(|u| u.is_empty() || u == "#" || u == "null")
            .unwrap_or(true);
        if unusable {
            if let Some(venue_url) = &ev.venue_url {
                ev.url = Some(venue_url.clone());
                summary.url_fallbacks += 1;
            }
        }
    }
    if summary.url_fallbacks > 0 {
        info!("URL fallbacks applied: {}", summary.url_fallbacks);
    }

    events.sort_by(|a, b| a.date.cmp(&b.date));
    summary.output = events.len();
    info!("validation complete: {} events", events.len());
    (events, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn candidate(title: &str, days_ahead: i64, priority: u8, source: &str) -> Candidate {
        Candidate {
            title: title.to_string(),
            venue: "The Waiting Room".to_string(),
            area: "Omaha".to_string(),
            date: (today() + ChronoDuration::days(days_ahead)).to_string(),
            time: "8:00 PM".to_string(),
            price: "TBD".to_string(),
            desc: String::new(),
            source_id: source.to_string(),
            source_priority: priority,
            ..Default::default()
        }
    }

    async fn run(candidates: Vec<Candidate>) -> (Vec<EventRecord>, ValidationSummary) {
        let client = reqwest::Client::new();
        let secrets = Secrets::default();
        validate(
            candidates,
            &client,
            &secrets,
            today(),
            ValidationOptions { skip_url_check: true },
        )
        .await
    }

    #[tokio::test]
    async fn date_window_rejections_are_tallied() {
        let mut past = candidate("Old Show", 5, 5, "s");
        past.date = (today() - ChronoDuration::days(2)).to_string();
        let mut far = candidate("Distant Show", 5, 5, "s");
        far.date = (today() + ChronoDuration::days(95)).to_string();
        let mut bad = candidate("Bad Date", 5, 5, "s");
        bad.date = "next friday".to_string();
        let good = candidate("Good Show", 10, 5, "s");

        let (events, summary) = run(vec![past, far, bad, good]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Good Show");
        assert_eq!(summary.rejected_past, 1);
        assert_eq!(summary.rejected_too_far, 1);
        assert_eq!(summary.rejected_malformed, 1);
    }

    #[tokio::test]
    async fn lower_priority_number_wins_regardless_of_input_order() {
        let a = candidate("Bryce Vine", 20, 5, "visitomaha");
        let b = candidate("Bryce Vine", 20, 1, "waitingroom");

        for input in [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]] {
            let (events, summary) = run(input).await;
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].source_id, "waitingroom");
            assert_eq!(summary.duplicates_removed, 1);
        }
    }

    #[tokio::test]
    async fn winning_source_price_is_kept() {
        let mut cheap = candidate("Bryce Vine", 20, 5, "visitomaha");
        cheap.price = "$20".to_string();
        let mut exact = candidate("Bryce Vine", 20, 1, "waitingroom");
        exact.price = "$25\u{2013}$30".to_string();

        let (events, _) = run(vec![cheap, exact]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].price, "$25\u{2013}$30");
    }

    #[tokio::test]
    async fn same_title_different_dates_both_survive() {
        let a = candidate("Weekly Jazz Jam", 7, 5, "s");
        let b = candidate("Weekly Jazz Jam", 14, 5, "s");
        let (events, _) = run(vec![a, b]).await;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn vendor_event_id_dedups_exactly() {
        let mut a = candidate("Show A", 20, 1, "ticketmaster-api");
        a.vendor_event_id = Some("TM1".to_string());
        let mut b = candidate("Completely Different Name", 20, 1, "ticketmaster-api");
        b.vendor_event_id = Some("TM1".to_string());
        let (events, _) = run(vec![a, b]).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn enrichment_assigns_tags_emoji_and_ids() {
        let (events, _) = run(vec![candidate("Jazz & Blues Night", 20, 5, "s")]).await;
        let ev = &events[0];
        assert_eq!(ev.cat.as_str(), "concerts");
        assert!(ev.tags.contains(&"Jazz".to_string()));
        assert!(!ev.emoji.is_empty());
        assert_ne!(ev.id, 0);
    }

    #[tokio::test]
    async fn missing_urls_fall_back_to_venue_url() {
        let mut c = candidate("Gallery Opening", 20, 5, "bemis");
        c.venue_url = Some("https://www.bemiscenter.org/events".to_string());
        let (events, summary) = run(vec![c]).await;
        assert_eq!(
            events[0].url.as_deref(),
            Some("https://www.bemiscenter.org/events")
        );
        assert_eq!(summary.url_fallbacks, 1);
    }

    #[tokio::test]
    async fn dead_urls_fall_back_or_flag_invalid() {
        let dead = crate::urls::UrlCheck {
            valid: false,
            reason: "HTTP 404".to_string(),
        };

        // With a distinct venue URL available, the dead link is replaced.
        let (mut events, _) = run(vec![candidate("Show A", 10, 5, "s")]).await;
        let mut summary = ValidationSummary::default();
        events[0].url = Some("https://example.com/expired-listing".to_string());
        events[0].venue_url = Some("https://example.com/calendar".to_string());
        apply_url_check(&mut events[0], &dead, &mut summary);
        assert_eq!(events[0].url.as_deref(), Some("https://example.com/calendar"));
        assert_eq!(summary.urls_fixed, 1);

        // With no fallback, the record is kept but flagged invalid.
        let (mut events, _) = run(vec![candidate("Show B", 10, 5, "s")]).await;
        events[0].url = Some("https://example.com/expired-listing".to_string());
        events[0].url_valid = true;
        apply_url_check(&mut events[0], &dead, &mut summary);
        assert!(!events[0].url_valid);
        assert_eq!(events[0].url.as_deref(), Some("https://example.com/expired-listing"));
        assert_eq!(summary.urls_failed, 1);
    }

    #[tokio::test]
    async fn output_is_sorted_by_date() {
        let (events, _) = run(vec![
            candidate("Later", 30, 5, "a"),
            candidate("Sooner", 3, 5, "b"),
            candidate("Middle", 15, 5, "c"),
        ])
        .await;
        let dates: Vec<NaiveDate> = events.iter().map(|e| e.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }
}
