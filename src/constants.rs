//! Shared constants for the ingestion pipeline.

/// How far ahead of today an event date may fall and still be considered live.
pub const LOOKAHEAD_DAYS: i64 = 90;

/// Source ids for the structured fetchers. These records bypass extraction.
pub const TICKETMASTER_SOURCE_ID: &str = "ticketmaster-api";
pub const TICKETOMAHA_SOURCE_ID: &str = "ticketomaha-api";

/// User agent advertised on direct fetches and URL liveness checks.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; GOGuideBot/1.0; +https://theomahaguide.com)";

/// Title similarity above this marks a same-day candidate a duplicate
/// during the per-run validation pass.
pub const DEDUP_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Word-overlap similarity threshold for the build-time fuzzy merge pass.
pub const MERGE_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Rolling history window for per-source and per-run health records.
pub const HEALTH_MAX_HISTORY: usize = 30;

/// Alert when more than this fraction of attempted sources fail.
pub const FAILURE_RATE_THRESHOLD: f64 = 0.2;

/// Alert when the final catalog holds fewer events than this.
pub const MIN_EVENTS_THRESHOLD: usize = 10;

/// Content below these sizes is treated as a failed fetch rather than a page.
pub const MIN_RENDERED_CONTENT_BYTES: usize = 100;
pub const MIN_DIRECT_CONTENT_BYTES: usize = 50;

/// Extraction input truncation: solo calls and per-source share of a
/// batched call.
pub const EXTRACT_MAX_CHARS_SOLO: usize = 12_000;
pub const EXTRACT_MAX_CHARS_BATCHED: usize = 6_000;

/// Sources above this content size get a solo extraction call.
pub const SOLO_CONTENT_BYTES: usize = 8_000;
