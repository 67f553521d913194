//! Venue alias resolution, merge-key normalization, and the metro-area city
//! table shared by both structured fetchers and the merge pass.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Known spellings mapped to canonical venue names.
pub static VENUE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("chi health center omaha", "CHI Health Center"),
        ("chi health center arena", "CHI Health Center"),
        ("chi health center", "CHI Health Center"),
        ("baxter arena", "Baxter Arena"),
        ("orpheum theater", "Orpheum Theater"),
        ("the orpheum theater", "Orpheum Theater"),
        ("orpheum theatre", "Orpheum Theater"),
        ("holland performing arts center", "Holland Center"),
        ("holland center", "Holland Center"),
        ("the admiral omaha", "The Admiral"),
        ("the admiral", "The Admiral"),
        ("admiral", "The Admiral"),
        ("slowdown", "The Slowdown"),
        ("the slowdown", "The Slowdown"),
        ("waiting room lounge", "The Waiting Room"),
        ("the waiting room", "The Waiting Room"),
        ("waiting room", "The Waiting Room"),
        ("reverb lounge", "Reverb Lounge"),
        ("mid-america center", "Mid-America Center"),
        ("stir concert cove", "Stir Concert Cove"),
        ("stir cove", "Stir Concert Cove"),
        ("the astro", "The Astro"),
        ("the astro theater", "The Astro"),
        ("liberty first credit union arena", "Liberty First Credit Union Arena"),
        ("werner park", "Werner Park"),
        ("henry doorly zoo", "Henry Doorly Zoo"),
        ("henry doorly zoo and aquarium", "Henry Doorly Zoo"),
        ("steelhouse omaha", "Steelhouse Omaha"),
        ("td ameritrade park", "Charles Schwab Field"),
        ("charles schwab field", "Charles Schwab Field"),
        ("charles schwab field omaha", "Charles Schwab Field"),
        ("sumtur amphitheater", "SumTur Amphitheater"),
        ("benson theatre", "Benson Theatre"),
        ("omaha community playhouse", "Omaha Community Playhouse"),
        ("the rose theater", "The Rose Theater"),
        ("joslyn art museum", "Joslyn Art Museum"),
        ("kiewit luminarium", "Kiewit Luminarium"),
        ("lauritzen gardens", "Lauritzen Gardens"),
        ("the durham museum", "The Durham Museum"),
        ("kaneko", "KANEKO"),
    ])
});

/// Resolve a raw venue name to its canonical form, or pass it through.
pub fn normalize_venue(name: &str) -> String {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return "TBD".to_string();
    }
    match VENUE_ALIASES.get(key.as_str()) {
        Some(canonical) => (*canonical).to_string(),
        None => name.trim().to_string(),
    }
}

static GENERIC_VENUE_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(center|arena|theatre|theater|lounge|park)\b").unwrap());

/// Grouping key for the merge pass: canonical alias, generic venue-type words
/// stripped, non-alphanumerics removed. "Waiting Room Lounge" and
/// "The Waiting Room" both key to "thewaitingroom".
pub fn venue_merge_key(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let canonical = VENUE_ALIASES
        .get(lower.as_str())
        .map(|c| c.to_lowercase())
        .unwrap_or(lower);
    let stripped = GENERIC_VENUE_WORDS.replace_all(&canonical, "");
    stripped
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Metro municipality names mapped to area labels; `None` marks cities we
/// deliberately exclude even though the geo radius reaches them.
pub static CITY_TO_AREA: Lazy<HashMap<&'static str, Option<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("omaha", Some("Omaha")),
        ("council bluffs", Some("Council Bluffs")),
        ("papillion", Some("Papillion")),
        ("la vista", Some("La Vista")),
        ("bellevue", Some("Bellevue")),
        ("ralston", Some("Ralston")),
        ("gretna", Some("Gretna")),
        ("elkhorn", Some("Omaha")),
        ("boys town", Some("Omaha")),
        ("carter lake", Some("Council Bluffs")),
        ("bennington", Some("Omaha")),
        ("springfield", Some("Papillion")),
        ("ashland", Some("Wider Net")),
        ("lincoln", None),
        ("fremont", None),
    ])
});

/// Map a municipality to its area label. `None` means the event falls
/// outside the metro and must be dropped.
pub fn area_for_city(city: &str) -> Option<&'static str> {
    let key = city.trim().to_lowercase();
    if let Some(area) = CITY_TO_AREA.get(key.as_str()) {
        return *area;
    }
    // Substring fallback for "Omaha, NE" style values.
    for (known, area) in CITY_TO_AREA.iter() {
        if area.is_some() && key.contains(known) {
            return *area;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_case_insensitively() {
        assert_eq!(normalize_venue("WAITING ROOM LOUNGE"), "The Waiting Room");
        assert_eq!(normalize_venue("Slowdown"), "The Slowdown");
    }

    #[test]
    fn unknown_venues_pass_through() {
        assert_eq!(normalize_venue("Bob's Garage"), "Bob's Garage");
        assert_eq!(normalize_venue(""), "TBD");
    }

    #[test]
    fn merge_key_unifies_alias_variants() {
        assert_eq!(venue_merge_key("Waiting Room Lounge"), venue_merge_key("The Waiting Room"));
        assert_eq!(venue_merge_key("CHI Health Center Omaha"), venue_merge_key("CHI Health Center"));
    }

    #[test]
    fn merge_key_strips_generic_words() {
        assert_eq!(venue_merge_key("Baxter Arena"), "baxter");
        assert_eq!(venue_merge_key("Some Theatre"), "some");
    }

    #[test]
    fn area_mapping_excludes_non_metro() {
        assert_eq!(area_for_city("Omaha"), Some("Omaha"));
        assert_eq!(area_for_city("Elkhorn"), Some("Omaha"));
        assert_eq!(area_for_city("Lincoln"), None);
        assert_eq!(area_for_city("Des Moines"), None);
    }

    #[test]
    fn area_mapping_matches_substrings() {
        assert_eq!(area_for_city("Omaha, NE"), Some("Omaha"));
    }
}
