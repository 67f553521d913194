//! Title normalization and the two similarity measures used by the
//! reconciliation passes. The per-run validator uses token Jaccard with a
//! containment shortcut; the build-time merge uses word overlap against the
//! smaller token set after noise-word stripping.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Lowercase, alphanumerics and spaces only, collapsed whitespace.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if c.is_whitespace() {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Key for exact-match dedup across runs: normalized title with spaces
/// removed, joined with the date.
pub fn dedupe_key(title: &str, date: &str) -> String {
    let squashed: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    format!("{squashed}|{date}")
}

/// Similarity of two already-normalized titles in [0, 1].
///
/// Full containment short-circuits to the length ratio; otherwise token
/// Jaccard. Containment catches "bryce vine" vs "bryce vine with special
/// guests" without paying for token sets.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if longer.is_empty() {
        return 1.0;
    }
    if !shorter.is_empty() && longer.contains(shorter) {
        return shorter.len() as f64 / longer.len() as f64;
    }

    let ta: HashSet<&str> = a.split(' ').filter(|t| !t.is_empty()).collect();
    let tb: HashSet<&str> = b.split(' ').filter(|t| !t.is_empty()).collect();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    intersection as f64 / union as f64
}

static NOISE_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(the|a|an|at|in|of|vs|v|and|mens|womens|omaha|nebraska|ne)\b").unwrap()
});

/// Aggressive normalization for the merge pass: apostrophes removed first so
/// "men's" collapses before the noise-word strip, then stop words, team
/// qualifiers, and metro names dropped.
pub fn merge_normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase().replace(['\u{2019}', '\''], "");
    let mut cleaned = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            cleaned.push(c);
        } else {
            cleaned.push(' ');
        }
    }
    let stripped = NOISE_WORDS.replace_all(&cleaned, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word overlap over the smaller token set, after merge normalization.
/// "Creighton Bluejays vs Providence Friars" matches
/// "Creighton Bluejays v Providence Friars" at 1.0.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let na = merge_normalize_title(a);
    let nb = merge_normalize_title(b);
    let wa: HashSet<&str> = na.split(' ').filter(|t| !t.is_empty()).collect();
    let wb: HashSet<&str> = nb.split(' ').filter(|t| !t.is_empty()).collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let overlap = wa.intersection(&wb).count();
    overlap as f64 / wa.len().min(wb.len()) as f64
}
