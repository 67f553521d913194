//! Single categorization service used by every ingestion path.
//!
//! Keyword, genre, and segment tables live here and nowhere else, so a
//! candidate classifies the same way whether it arrived via extraction, the
//! discovery API, or the JSON-LD crawler.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::types::Category;

/// Bumped whenever a rule table changes; recorded in run logs so historical
/// classifications can be traced to the rules that produced them.
pub const RULES_VERSION: &str = "2025-08.1";

/// Keyword patterns checked in declaration order; first hit wins. Comedy
/// outranks concerts so "stand-up night at the Slowdown" lands correctly.
static CATEGORY_KEYWORDS: Lazy<Vec<(Category, Regex)>> = Lazy::new(|| {
    vec![
        (
            Category::Comedy,
            Regex::new(r"(?i)\b(comedy|comedian|stand.?up|improv|sketch|open mic|funny|humor|roast)\b").unwrap(),
        ),
        (
            Category::Sports,
            Regex::new(r"(?i)\b(basketball|football|soccer|hockey|baseball|volleyball|wrestling|boxing|mma|lancers|mavericks|storm chasers|union omaha|creighton|husker|bluejay)\b").unwrap(),
        ),
        (
            Category::Concerts,
            Regex::new(r"(?i)\b(concert|live music|band|singer|songwriter|dj|tour|acoustic|symphony|orchestra|jazz|blues|rock|country|hip.?hop|edm|folk|indie|pop|metal|punk|emo|r&b)\b").unwrap(),
        ),
        (
            Category::Festivals,
            Regex::new(r"(?i)\b(festival|fest|fiesta|fair|block party|celebration|parade|market|crawl|5k|run|walk|gala|fundraiser|taste of)\b").unwrap(),
        ),
        (
            Category::Family,
            Regex::new(r"(?i)\b(kids|children|family|zoo|safari|easter|halloween|christmas|holiday|sensory|storytime|puppet|magic show|camp|craft|workshop)\b").unwrap(),
        ),
        (
            Category::Arts,
            Regex::new(r"(?i)\b(art|gallery|exhibit|theater|theatre|play|musical|ballet|dance|opera|film|cinema|reading|poetry|lecture|book|author|museum)\b").unwrap(),
        ),
    ]
});

/// Genre names from structured sources (discovery API genres and sub-genres,
/// JSON-LD page genres) mapped into the fixed category set.
static GENRE_TO_CATEGORY: Lazy<HashMap<&'static str, Category>> = Lazy::new(|| {
    use Category::*;
    let mut m = HashMap::new();
    for genre in ["comedy", "stand-up comedy", "stand up", "stand-up", "improv"] {
        m.insert(genre, Comedy);
    }
    for genre in [
        "concert", "music", "rock", "pop", "hip-hop/rap", "hip-hop", "r&b", "country",
        "alternative", "jazz", "blues", "folk", "classical", "metal", "electronic", "latin",
        "reggae", "soul", "world", "punk", "indie", "new age", "symphony", "orchestra",
    ] {
        m.insert(genre, Concerts);
    }
    for genre in [
        "sports", "basketball", "football", "hockey", "baseball", "soccer", "volleyball",
        "wrestling", "boxing", "mma/fighting arts", "motorsports/racing", "golf", "tennis",
        "rodeo", "equestrian",
    ] {
        m.insert(genre, Sports);
    }
    for genre in [
        "children's music", "family", "children", "kids", "children's theatre",
        "circus & specialty acts", "ice shows", "magic & illusion", "puppetry",
    ] {
        m.insert(genre, Family);
    }
    for genre in [
        "theatre", "theater", "play", "dance", "opera", "ballet", "musical", "drama",
        "fine art", "art", "gallery", "exhibit", "film", "performance art", "spectacle",
        "variety",
    ] {
        m.insert(genre, Arts);
    }
    for genre in ["festival", "fair", "gala", "celebration", "community/civic"] {
        m.insert(genre, Festivals);
    }
    m
});

/// Discovery-API segment fallback, checked only when genre and sub-genre
/// both miss.
static SEGMENT_TO_CATEGORY: Lazy<HashMap<&'static str, Category>> = Lazy::new(|| {
    use Category::*;
    HashMap::from([
        ("music", Concerts),
        ("sports", Sports),
        ("arts & theatre", Arts),
        ("film", Arts),
        ("miscellaneous", Festivals),
        ("undefined", Concerts),
    ])
});

pub fn category_for_genre(genre: &str) -> Option<Category> {
    GENRE_TO_CATEGORY.get(genre.trim().to_lowercase().as_str()).copied()
}

pub fn category_for_segment(segment: &str) -> Option<Category> {
    SEGMENT_TO_CATEGORY.get(segment.trim().to_lowercase().as_str()).copied()
}

/// First keyword table hit over arbitrary text, if any.
pub fn keyword_category(text: &str) -> Option<Category> {
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(cat, _)| *cat)
}

/// Keyword classification over title + description + venue, with an optional
/// pre-assigned category taking precedence. Defaults to concerts.
pub fn classify(title: &str, desc: &str, venue: &str, presumed: Option<Category>) -> Category {
    if let Some(cat) = presumed {
        return cat;
    }
    keyword_category(&format!("{title} {desc} {venue}")).unwrap_or(Category::Concerts)
}

struct TagRule {
    tag: &'static str,
    pattern: Regex,
}

fn rule(tag: &'static str, pattern: &str) -> TagRule {
    TagRule {
        tag,
        pattern: Regex::new(pattern).unwrap(),
    }
}

static CONCERT_TAGS: Lazy<Vec<TagRule>> = Lazy::new(|| {
    vec![
        rule("Country", r"(?i)country|nashville"),
        rule("Rock", r"(?i)rock|punk|metal|hardcore"),
        rule("Jazz", r"(?i)jazz|blues|soul"),
        rule("EDM", r"(?i)edm|dj|electronic"),
        rule("Hip-Hop", r"(?i)hip.?hop|rap"),
        rule("Indie", r"(?i)indie|alternative"),
        rule("Folk", r"(?i)folk|acoustic|singer"),
        rule("Pop", r"(?i)pop"),
        rule("Orchestra", r"(?i)symphony|orchestra|classical"),
        rule("Tribute", r"(?i)tribute|cover"),
    ]
});

static COMEDY_TAGS: Lazy<Vec<TagRule>> = Lazy::new(|| {
    vec![
        rule("Improv", r"(?i)improv"),
        rule("Stand-Up", r"(?i)stand.?up"),
        rule("Open Mic", r"(?i)open mic"),
    ]
});

static SPORTS_TAGS: Lazy<Vec<TagRule>> = Lazy::new(|| {
    vec![
        rule("Basketball", r"(?i)basketball"),
        rule("Football", r"(?i)football"),
        rule("Soccer", r"(?i)soccer"),
        rule("Hockey", r"(?i)hockey"),
        rule("Baseball", r"(?i)baseball"),
        rule("Volleyball", r"(?i)volleyball"),
    ]
});

static FREE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)free|no cover|\$0").unwrap());

/// Genre tags inferred from the title per category. Never empty: categories
/// without a matching rule fall back to a generic tag.
pub fn infer_tags(title: &str, cat: Category) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let rules = match cat {
        Category::Concerts => Some((&*CONCERT_TAGS, "Live Music")),
        Category::Comedy => Some((&*COMEDY_TAGS, "Comedy")),
        Category::Sports => Some((&*SPORTS_TAGS, "")),
        _ => None,
    };
    if let Some((rules, fallback)) = rules {
        for r in rules {
            if r.pattern.is_match(title) {
                tags.push(r.tag.to_string());
            }
        }
        if tags.is_empty() && !fallback.is_empty() {
            tags.push(fallback.to_string());
        }
    }
    if FREE_TAG.is_match(title) {
        tags.push("Free".to_string());
    }
    if tags.is_empty() {
        tags.push("Event".to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presumed_category_wins() {
        assert_eq!(
            classify("Rock Night", "", "", Some(Category::Family)),
            Category::Family
        );
    }

    #[test]
    fn comedy_keywords_beat_concert_keywords() {
        // "open mic" appears in both worlds; comedy is checked first.
        assert_eq!(
            classify("Stand-Up Open Mic", "", "The Slowdown", None),
            Category::Comedy
        );
    }

    #[test]
    fn sports_franchises_classify_without_sport_words() {
        assert_eq!(
            classify("Creighton vs DePaul", "", "CHI Health Center", None),
            Category::Sports
        );
    }

    #[test]
    fn unmatched_text_defaults_to_concerts() {
        assert_eq!(classify("An Evening With Friends", "", "", None), Category::Concerts);
    }

    #[test]
    fn genre_chain_hits_specific_before_segment() {
        assert_eq!(category_for_genre("Hip-Hop/Rap"), Some(Category::Concerts));
        assert_eq!(category_for_genre("unheard-of-genre"), None);
        assert_eq!(category_for_segment("Arts & Theatre"), Some(Category::Arts));
    }

    #[test]
    fn concert_tags_accumulate() {
        let tags = infer_tags("Country Rock Tribute Night", Category::Concerts);
        assert!(tags.contains(&"Country".to_string()));
        assert!(tags.contains(&"Rock".to_string()));
        assert!(tags.contains(&"Tribute".to_string()));
    }

    #[test]
    fn tagless_title_gets_generic_tag() {
        assert_eq!(infer_tags("Quarterly Meetup", Category::Arts), vec!["Event"]);
        assert_eq!(
            infer_tags("Some Band", Category::Concerts),
            vec!["Live Music"]
        );
    }

    #[test]
    fn free_tag_appends() {
        let tags = infer_tags("Free Jazz in the Park", Category::Concerts);
        assert!(tags.contains(&"Jazz".to_string()));
        assert!(tags.contains(&"Free".to_string()));
    }
}
