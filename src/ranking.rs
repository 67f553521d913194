//! The single place where one of two records describing the same event is
//! chosen over the other.
//!
//! Two policies live here deliberately: the per-run validator ranks by
//! source trust (nothing else is known yet), while the build-time merge
//! ranks by data completeness with ties going to structured-API records.
//! Keeping both in one module stops the formulas drifting apart.

use std::collections::HashSet;

use crate::constants::{TICKETMASTER_SOURCE_ID, TICKETOMAHA_SOURCE_ID};
use crate::types::EventRecord;

/// Records from the structured fetchers, presumed better-structured than
/// extraction output.
pub fn is_api_source(source_id: &str) -> bool {
    source_id == TICKETMASTER_SOURCE_ID || source_id == TICKETOMAHA_SOURCE_ID
}

/// Stable sort by ascending priority number; lower wins, input order breaks
/// ties. The validator walks candidates in this order so the first record
/// kept for a given (title, date) is the most trusted one.
pub fn sort_by_priority<T>(items: &mut [T], priority_of: impl Fn(&T) -> u8) {
    items.sort_by_key(|item| priority_of(item));
}

/// Data-completeness score for the build-time merge: an image and a real
/// (non-calendar) ticket URL are worth two points each, a known price and a
/// verified URL one each.
pub fn completeness_score(ev: &EventRecord, generic_urls: &HashSet<&str>) -> u32 {
    let mut score = 0;
    if ev.image.is_some() {
        score += 2;
    }
    if let Some(url) = &ev.url {
        if !generic_urls.contains(url.as_str()) {
            score += 2;
        }
    }
    if ev.has_real_price() {
        score += 1;
    }
    if ev.url_valid {
        score += 1;
    }
    score
}

/// Copy every useful field the winner lacks from the discarded record:
/// image, a better URL, price, validity, affiliate tag, the longer
/// description, tags, emoji.
pub fn merge_into(target: &mut EventRecord, donor: &EventRecord, generic_urls: &HashSet<&str>) {
    if target.image.is_none() && donor.image.is_some() {
        target.image = donor.image.clone();
    }

    let target_generic = target
        .url
        .as_deref()
        .map(|u| generic_urls.contains(u))
        .unwrap_or(true);
    let donor_real = donor
        .url
        .as_deref()
        .map(|u| !generic_urls.contains(u))
        .unwrap_or(false);
    if target_generic && donor_real {
        target.url = donor.url.clone();
    }

    if !target.has_real_price() && donor.has_real_price() {
        target.price = donor.price.clone();
    }
    if !target.url_valid && donor.url_valid {
        target.url_valid = donor.url_valid;
    }
    if target.affiliate_platform.is_none() && donor.affiliate_platform.is_some() {
        target.affiliate_platform = donor.affiliate_platform.clone();
    }
    if donor.desc.len() > target.desc.len() {
        target.desc = donor.desc.clone();
    }
    if target.tags.is_empty() && !donor.tags.is_empty() {
        target.tags = donor.tags.clone();
    }
    if target.emoji.is_empty() && !donor.emoji.is_empty() {
        target.emoji = donor.emoji.clone();
    }
    if target.vendor_event_id.is_none() && donor.vendor_event_id.is_some() {
        target.vendor_event_id = donor.vendor_event_id.clone();
    }
}
