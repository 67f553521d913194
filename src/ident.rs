//! Stable, content-derived event identifiers. Repeated runs regenerate the
//! same id for the same (title, date, venue, source), so the store converges
//! instead of accumulating duplicate identities.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::types::EventRecord;

fn hash_key(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Deterministic id over the identity fields.
pub fn stable_id(title: &str, date: &str, venue: &str, source_id: &str) -> u64 {
    hash_key(&format!("{title}|{date}|{venue}|{source_id}"))
}

/// Regenerate every record's id, resolving the rare collision by probing
/// with a disambiguating suffix. Returns how many ids changed.
pub fn assign_unique_ids(events: &mut [EventRecord]) -> usize {
    let mut seen: HashSet<u64> = HashSet::with_capacity(events.len());
    let mut changed = 0;
    for ev in events.iter_mut() {
        let date = ev.date.format("%Y-%m-%d").to_string();
        let base = format!("{}|{}|{}|{}", ev.title, date, ev.venue, ev.source_id);
        let mut id = hash_key(&base);
        let mut suffix = 1u32;
        while !seen.insert(id) {
            id = hash_key(&format!("{base}|{suffix}"));
            suffix += 1;
        }
        if ev.id != id {
            changed += 1;
        }
        ev.id = id;
    }
    changed
}
