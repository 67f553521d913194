//! Static catalog of scrape targets and ticketing-platform affiliations.
//! Defined at deploy time, never mutated at runtime.

use std::collections::HashMap;
use std::collections::HashSet;

use once_cell::sync::Lazy;

/// How a source's page content is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Rendering proxy first, direct GET as fallback.
    Rendered,
    /// Plain GET only; for sites that block or break the proxy.
    Direct,
}

/// A configured origin the pipeline draws candidate events from.
#[derive(Debug, Clone, Copy)]
pub struct Source {
    pub id: &'static str,
    pub name: &'static str,
    pub url: &'static str,
    pub area: &'static str,
    /// 1 = authoritative venue/API, 2 = aggregator/secondary.
    pub tier: u8,
    /// Dedup tie-break rank; lower wins conflicts.
    pub priority: u8,
    /// Category hints passed to extraction; "all" means no hint.
    pub cats: &'static [&'static str],
    pub strategy: FetchStrategy,
    /// Ticketing platform whose affiliate parameter applies to this source.
    pub ticket_platform: Option<&'static str>,
    /// Canonical venue name when the whole page belongs to one venue.
    pub venue: Option<&'static str>,
}

macro_rules! src {
    ($id:literal, $name:literal, $url:literal, $area:literal, t $tier:literal, p $priority:literal,
     cats [$($cat:literal),*] $(, platform $platform:literal)? $(, venue $venue:literal)?) => {
        Source {
            id: $id,
            name: $name,
            url: $url,
            area: $area,
            tier: $tier,
            priority: $priority,
            cats: &[$($cat),*],
            strategy: FetchStrategy::Rendered,
            ticket_platform: { let p: Option<&'static str> = None; $(let p = Some($platform);)? p },
            venue: { let v: Option<&'static str> = None; $(let v = Some($venue);)? v },
        }
    };
}

pub static SOURCES: Lazy<Vec<Source>> = Lazy::new(|| {
    vec![
        // Metro-wide aggregators
        src!("visitomaha", "Visit Omaha – Events", "https://www.visitomaha.com/events/", "All Metro", t 2, p 5, cats ["all"]),
        src!("reader", "The Reader – Events", "https://onebox.scenethink.com/the-reader", "All Metro", t 2, p 6, cats ["arts", "concerts"]),
        src!("familyfun", "Family Fun in Omaha", "https://familyfuninomaha.com/events/", "All Metro", t 2, p 7, cats ["family"]),
        src!("eventbrite", "Eventbrite – Omaha", "https://www.eventbrite.com/d/ne--omaha/events/", "All Metro", t 2, p 8, cats ["all"], platform "eventbrite"),
        // Major venues
        src!("chi", "CHI Health Center", "https://chihealthcenteromaha.com/calendar/", "Omaha", t 1, p 1, cats ["concerts", "sports"], platform "ticketmaster", venue "CHI Health Center"),
        src!("baxter", "Baxter Arena", "https://www.baxterarena.com/events/", "Omaha", t 1, p 1, cats ["sports", "concerts"], platform "ticketmaster", venue "Baxter Arena"),
        src!("opa", "Omaha Performing Arts", "https://o-pa.org/performances/", "Omaha", t 1, p 1, cats ["concerts", "arts"], platform "ticketmaster", venue "Orpheum Theater"),
        src!("admiral", "The Admiral", "https://admiralomaha.com/events/", "Omaha", t 1, p 1, cats ["concerts"], platform "etix", venue "The Admiral"),
        src!("slowdown", "The Slowdown", "https://theslowdown.com/events/", "Omaha", t 1, p 1, cats ["concerts"], platform "seetickets", venue "The Slowdown"),
        src!("waitingroom", "Waiting Room Lounge", "https://waitingroomlounge.com/events/", "Omaha", t 1, p 1, cats ["concerts"], platform "etix", venue "The Waiting Room"),
        src!("reverb", "Reverb Lounge", "https://reverblounge.com/events/", "Omaha", t 1, p 1, cats ["concerts"], platform "etix", venue "Reverb Lounge"),
        src!("filmstreams", "Film Streams", "https://filmstreams.org/films", "Omaha", t 1, p 2, cats ["arts"], venue "Film Streams"),
        // Museums & cultural
        src!("joslyn", "Joslyn Art Museum", "https://joslyn.org/calendar", "Omaha", t 1, p 2, cats ["arts"], venue "Joslyn Art Museum"),
        src!("bemis", "Bemis Center", "https://www.bemiscenter.org/events", "Omaha", t 1, p 3, cats ["arts"], venue "Bemis Center"),
        src!("kaneko", "KANEKO", "https://thekaneko.org/upcoming-and-current-programs/", "Omaha", t 1, p 3, cats ["arts"], venue "KANEKO"),
        src!("hotshops", "Hot Shops", "https://hotshopsartcenter.org/events/", "Omaha", t 2, p 4, cats ["arts"], venue "Hot Shops"),
        src!("playhouse", "Omaha Community Playhouse", "https://omahaplayhouse.com/calendar/", "Omaha", t 1, p 2, cats ["arts"], venue "Omaha Community Playhouse"),
        src!("rose", "The Rose Theater", "https://rosetheater.org/calendar/", "Omaha", t 1, p 2, cats ["family", "arts"], venue "The Rose Theater"),
        src!("riverfront", "The RiverFront Omaha", "https://theriverfrontomaha.com/events/", "Omaha", t 1, p 3, cats ["festivals", "family"]),
        src!("luminarium", "Kiewit Luminarium", "https://kiewitluminarium.org/events/", "Omaha", t 1, p 3, cats ["family"], venue "Kiewit Luminarium"),
        src!("lauritzen", "Lauritzen Gardens", "https://www.lauritzengardens.org/Calendar/", "Omaha", t 1, p 3, cats ["family"], venue "Lauritzen Gardens"),
        src!("durham", "The Durham Museum", "https://durhammuseum.org/calendar/", "Omaha", t 1, p 3, cats ["arts", "family"], venue "The Durham Museum"),
        src!("zoo", "Omaha Zoo – Special Events", "https://www.omahazoo.com/special-events", "Omaha", t 1, p 2, cats ["family"], venue "Henry Doorly Zoo"),
        // Omaha districts
        src!("aksarben", "Aksarben Village", "https://www.aksarbenvillage.com/events", "Omaha", t 2, p 5, cats ["festivals", "family"]),
        src!("midtown", "Midtown Crossing", "https://midtowncrossing.com/things-to-do/events/", "Omaha", t 2, p 5, cats ["festivals", "concerts"]),
        src!("oldmarket", "Old Market", "https://oldmarket.com/events", "Omaha", t 2, p 5, cats ["festivals", "arts"]),
        src!("blackstone", "Blackstone District", "https://www.blackstonedistrict.com/blackstone-calendar-events-omaha", "Omaha", t 2, p 5, cats ["festivals", "concerts"]),
        src!("benson", "Experience Benson", "https://www.experiencebenson.com/", "Omaha", t 2, p 6, cats ["festivals", "concerts"]),
        src!("bensontheatre", "Benson Theatre", "https://bensontheatre.org/calendar/", "Omaha", t 2, p 4, cats ["arts", "concerts"], venue "Benson Theatre"),
        // Council Bluffs
        src!("unleashcb", "Unleash CB", "https://www.unleashcb.com/events/calendar/", "Council Bluffs", t 2, p 5, cats ["all"]),
        src!("cbcity", "CB – Special Events", "https://www.councilbluffs-ia.gov/2300/Events", "Council Bluffs", t 2, p 6, cats ["festivals", "family"]),
        src!("midamerica", "Mid-America Center", "https://www.caesars.com/mid-america-center/upcoming-events", "Council Bluffs", t 1, p 2, cats ["concerts", "sports"], platform "ticketmaster", venue "Mid-America Center"),
        src!("stircove", "Stir Cove (Harrah's)", "https://www.caesars.com/harrahs-council-bluffs/shows", "Council Bluffs", t 1, p 2, cats ["concerts"], platform "ticketmaster", venue "Stir Concert Cove"),
        src!("paceevents", "PACE – Events", "https://www.paceartsiowa.org/events", "Council Bluffs", t 2, p 5, cats ["arts"]),
        src!("pacecal", "PACE – Calendar", "https://www.paceartsiowa.org/calendar", "Council Bluffs", t 2, p 5, cats ["arts"]),
        src!("iwcc", "Iowa Western Arts Center", "https://artscenter.iwcc.edu/calendar-of-events/", "Council Bluffs", t 2, p 5, cats ["arts"]),
        src!("cblibrary", "CB Public Library", "https://www.councilbluffslibrary.org/events/upcoming", "Council Bluffs", t 2, p 7, cats ["family"]),
        // Papillion / La Vista / Ralston
        src!("papillion", "City of Papillion", "https://www.papillion.org/calendar.aspx", "Papillion", t 2, p 5, cats ["family", "festivals"]),
        src!("sumtur", "SumTur Amphitheater", "https://www.papillion.org/calendar.aspx?CID=27", "Papillion", t 1, p 3, cats ["concerts", "festivals"], venue "SumTur Amphitheater"),
        src!("landing", "Papillion Landing", "https://www.papillionlanding.com/calendar.aspx?CID=34", "Papillion", t 2, p 6, cats ["family"]),
        src!("wernerspecial", "Werner Park – Special", "https://www.milb.com/omaha/ballpark/special-events", "Papillion", t 1, p 3, cats ["family", "sports"], venue "Werner Park"),
        src!("werneraxs", "Werner Park (AXS)", "https://www.axs.com/venues/130047/werner-park-papillion-tickets", "Papillion", t 2, p 4, cats ["concerts", "sports"], platform "axs", venue "Werner Park"),
        src!("lavista", "City of La Vista", "https://www.cityoflavista.org/Calendar.aspx", "La Vista", t 2, p 6, cats ["family", "festivals"]),
        src!("lavistacitycentre", "La Vista City Centre", "https://lavistacitycentre.com/community-events/", "La Vista", t 2, p 5, cats ["festivals", "family"]),
        src!("astro", "The Astro Theater", "https://lavistacitycentre.com/theastro/", "La Vista", t 1, p 1, cats ["concerts"], platform "ticketmaster", venue "The Astro"),
        src!("libertyfirst", "Liberty First CU Arena", "https://www.libertyfirstcreditunionarena.com/events", "Ralston", t 1, p 2, cats ["sports", "concerts"], platform "ticketmaster", venue "Liberty First Credit Union Arena"),
        // Gretna
        src!("gretnacal", "City of Gretna", "https://www.gretnane.org/calendar.aspx?CID=19", "Gretna", t 2, p 6, cats ["family", "festivals"]),
        src!("gretnadays", "Gretna Days Festival", "https://gretnadays.com/", "Gretna", t 2, p 5, cats ["festivals"]),
        src!("musiccrossing", "Music at the Crossing", "https://www.gretnane.org/264/Music-at-the-Crossing", "Gretna", t 2, p 5, cats ["concerts"]),
        // Wider net
        src!("visitne", "Visit Nebraska", "https://visitnebraska.com/events/calendar", "Wider Net", t 2, p 9, cats ["all"]),
        src!("traveliowa", "Travel Iowa", "https://www.traveliowa.com/calendar/", "Wider Net", t 2, p 9, cats ["all"]),
    ]
});

pub fn find_source(id: &str) -> Option<&'static Source> {
    SOURCES.iter().find(|s| s.id == id)
}

/// Registry filters backing the CLI flags.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub ids: Option<Vec<String>>,
    pub area: Option<String>,
    pub tier: Option<u8>,
}

impl SourceFilter {
    pub fn apply(&self, sources: &[Source]) -> Vec<Source> {
        sources
            .iter()
            .filter(|s| match &self.ids {
                Some(ids) => ids.iter().any(|id| id.eq_ignore_ascii_case(s.id)),
                None => true,
            })
            .filter(|s| match &self.area {
                Some(area) => s.area.to_lowercase().contains(&area.to_lowercase()),
                None => true,
            })
            .filter(|s| match self.tier {
                Some(tier) => s.tier == tier,
                None => true,
            })
            .copied()
            .collect()
    }
}

/// Calendar URL per source id; these count as "generic" URLs during merge
/// scoring and URL upgrades.
pub static VENUE_URL_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| SOURCES.iter().map(|s| (s.id, s.url)).collect());

pub static GENERIC_URLS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| SOURCES.iter().map(|s| s.url).collect());

/// A ticketing platform we hold an affiliate relationship with.
#[derive(Debug, Clone, Copy)]
pub struct AffiliatePlatform {
    pub id: &'static str,
    /// Query parameter carrying the affiliate id.
    pub param: &'static str,
    pub domains: &'static [&'static str],
}

pub static AFFILIATE_PLATFORMS: &[AffiliatePlatform] = &[
    AffiliatePlatform {
        id: "ticketmaster",
        param: "at_aid",
        domains: &["ticketmaster.com", "livenation.com"],
    },
    AffiliatePlatform {
        id: "etix",
        param: "partner",
        domains: &["etix.com"],
    },
    AffiliatePlatform {
        id: "axs",
        param: "aff",
        domains: &["axs.com"],
    },
    AffiliatePlatform {
        id: "eventbrite",
        param: "aff",
        domains: &["eventbrite.com"],
    },
    AffiliatePlatform {
        id: "seetickets",
        param: "ref",
        domains: &["seetickets.us"],
    },
];
