//! End-to-end pipeline scenarios over a temp data directory: cached page
//! content, a stubbed extraction backend, and a stubbed structured fetcher,
//! so no network is involved.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};

use go_pipeline::config::{Secrets, Settings};
use go_pipeline::extractor::{EventExtractor, ExtractedEvent, ExtractionHints};
use go_pipeline::pipeline::{Pipeline, RunOptions};
use go_pipeline::registry::SourceFilter;
use go_pipeline::scraper::{content_digest, CachedPage};
use go_pipeline::store::{put_typed, JsonFileStore};
use go_pipeline::types::{Candidate, Category, StructuredFetcher};

fn days_ahead(n: i64) -> String {
    (Utc::now().date_naive() + Duration::days(n)).to_string()
}

fn seed_cache(data_dir: &std::path::Path, source_id: &str) {
    let cache = JsonFileStore::open(data_dir.join("cache")).unwrap();
    let content = format!("cached page content for {source_id} with plenty of text in it");
    put_typed(
        &cache,
        source_id,
        &CachedPage {
            source_id: source_id.to_string(),
            url: format!("https://example.com/{source_id}"),
            byte_len: content.len(),
            content_digest: content_digest(&content),
            content,
        },
    )
    .unwrap();
}

fn test_pipeline(data_dir: &std::path::Path) -> Pipeline {
    let mut settings = Settings::default();
    settings.data_dir = data_dir.to_str().unwrap().to_string();
    settings.extractor.call_delay_ms = 0;
    Pipeline::new(settings, Secrets::default()).unwrap()
}

fn run_options(sources: &[&str]) -> RunOptions {
    RunOptions {
        filter: SourceFilter {
            ids: Some(sources.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        },
        skip_scrape: true,
        skip_url_check: true,
        ..Default::default()
    }
}

/// Returns canned events per source; which sources produce what is driven
/// by the hint names so solo and batched calls both resolve.
struct StubExtractor {
    events: Vec<(&'static str, ExtractedEvent)>,
}

#[async_trait]
impl EventExtractor for StubExtractor {
    async fn extract(
        &self,
        text: &str,
        hints: &ExtractionHints,
    ) -> go_pipeline::error::Result<Vec<ExtractedEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|(marker, _)| hints.source_name.contains(marker) || text.contains(marker))
            .map(|(_, e)| e.clone())
            .collect())
    }
}

fn extracted(title: &str, venue: &str, date: String) -> ExtractedEvent {
    ExtractedEvent {
        title: title.to_string(),
        venue: venue.to_string(),
        area: "Omaha".to_string(),
        date,
        time: "8:00 PM".to_string(),
        price: "TBD".to_string(),
        desc: String::new(),
        url: None,
        cat: None,
    }
}

struct StubFetcher {
    events: Vec<Candidate>,
}

#[async_trait]
impl StructuredFetcher for StubFetcher {
    fn fetcher_id(&self) -> &'static str {
        "ticketmaster-api"
    }

    async fn fetch_events(&self) -> go_pipeline::error::Result<Vec<Candidate>> {
        Ok(self.events.clone())
    }
}

#[tokio::test]
async fn duplicate_titles_keep_the_higher_trust_source_and_its_price() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_cache(dir.path(), "waitingroom");
    seed_cache(dir.path(), "visitomaha");

    let mut pipeline = test_pipeline(dir.path());
    let date = days_ahead(20);
    let mut from_venue = extracted("Bryce Vine", "The Waiting Room", date.clone());
    from_venue.price = "$25".to_string();
    let mut from_aggregator = extracted("Bryce Vine", "Waiting Room Lounge", date.clone());
    from_aggregator.price = "$29.50".to_string();

    pipeline.set_extractor(Box::new(StubExtractor {
        events: vec![
            ("Waiting Room Lounge", from_venue),
            ("visitomaha", from_aggregator),
        ],
    }));
    pipeline.set_fetchers(vec![]);

    let report = pipeline
        .run(run_options(&["waitingroom", "visitomaha"]))
        .await?;

    assert_eq!(report.validation.duplicates_removed, 1);
    let events = pipeline.load_events();
    assert_eq!(events.len(), 1);
    // waitingroom is priority 1, visitomaha priority 5
    assert_eq!(events[0].source_id, "waitingroom");
    assert_eq!(events[0].price, "$25");
    Ok(())
}

#[tokio::test]
async fn api_and_extracted_records_for_one_game_merge_into_one() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_cache(dir.path(), "chi");

    let mut pipeline = test_pipeline(dir.path());
    let date = days_ahead(12);

    let api_candidate = Candidate {
        title: "Creighton vs DePaul".to_string(),
        venue: "CHI Health Center".to_string(),
        area: "Omaha".to_string(),
        date: date.clone(),
        time: "7:00 PM".to_string(),
        price: "$18\u{2013}$85".to_string(),
        desc: "Creighton Bluejays at CHI Health Center".to_string(),
        url: Some("https://www.ticketmaster.com/event/ABC123".to_string()),
        image: Some("https://img/game.jpg".to_string()),
        cat: Some(Category::Sports),
        source_id: "ticketmaster-api".to_string(),
        source_priority: 1,
        venue_url: None,
        vendor_event_id: Some("ABC123".to_string()),
        url_valid: true,
        affiliate_platform: Some("ticketmaster".to_string()),
    };

    let mut scraped = extracted(
        "Creighton Bluejays vs DePaul Blue Demons",
        "CHI Health Center Omaha",
        date.clone(),
    );
    scraped.desc = "Big East basketball: the Bluejays host DePaul downtown.".to_string();

    pipeline.set_extractor(Box::new(StubExtractor {
        events: vec![("CHI Health Center", scraped)],
    }));
    pipeline.set_fetchers(vec![Box::new(StubFetcher {
        events: vec![api_candidate],
    })]);

    let report = pipeline.run(run_options(&["chi"])).await?;

    assert_eq!(report.catalog_events, 1);
    let events = pipeline.load_events();
    assert_eq!(events.len(), 1);
    let survivor = &events[0];
    // The structured-API record wins on completeness and carries the union:
    // its image and ticket URL plus the extracted record's longer description.
    assert_eq!(survivor.source_id, "ticketmaster-api");
    assert_eq!(survivor.image.as_deref(), Some("https://img/game.jpg"));
    assert_eq!(
        survivor.url.as_deref(),
        Some("https://www.ticketmaster.com/event/ABC123")
    );
    assert_eq!(
        survivor.desc,
        "Big East basketball: the Bluejays host DePaul downtown."
    );
    Ok(())
}

#[tokio::test]
async fn far_future_events_never_reach_the_catalog() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_cache(dir.path(), "slowdown");

    let mut pipeline = test_pipeline(dir.path());
    pipeline.set_extractor(Box::new(StubExtractor {
        events: vec![
            ("Slowdown", extracted("Distant Tour", "The Slowdown", days_ahead(95))),
            ("Slowdown", extracted("Near Show", "The Slowdown", days_ahead(9))),
        ],
    }));
    pipeline.set_fetchers(vec![]);

    let report = pipeline.run(run_options(&["slowdown"])).await?;

    assert_eq!(report.validation.rejected_too_far, 1);
    let events = pipeline.load_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "Near Show");
    Ok(())
}

#[tokio::test]
async fn chronic_source_failure_raises_exactly_one_chronic_alert_line() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // "slowdown" has cache and succeeds; "chi" has none and fails every run.
    seed_cache(dir.path(), "slowdown");

    let mut pipeline = test_pipeline(dir.path());
    pipeline.set_extractor(Box::new(StubExtractor {
        events: vec![(
            "Slowdown",
            extracted("House Show", "The Slowdown", days_ahead(8)),
        )],
    }));
    pipeline.set_fetchers(vec![]);

    let mut last_report = None;
    for _ in 0..5 {
        last_report = Some(pipeline.run(run_options(&["slowdown", "chi"])).await?);
    }
    let report = last_report.unwrap();

    let chronic: Vec<&String> = report
        .alerts
        .iter()
        .filter(|a| a.contains("Chronically failing"))
        .collect();
    assert_eq!(chronic.len(), 1);
    assert!(chronic[0].contains("chi"));
    // Other thresholds also trip (tier-1 failure, 50% failure rate), so the
    // alert list is longer than the chronic line alone.
    assert!(report.alerts.len() > 1);
    Ok(())
}

#[tokio::test]
async fn catalog_invariants_hold_after_a_run() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_cache(dir.path(), "slowdown");
    seed_cache(dir.path(), "reverb");

    let mut pipeline = test_pipeline(dir.path());
    pipeline.set_extractor(Box::new(StubExtractor {
        events: vec![
            ("Slowdown", extracted("Indie Night", "The Slowdown", days_ahead(3))),
            ("Reverb", extracted("Synth Evening", "Reverb Lounge", days_ahead(5))),
            ("Reverb", extracted("Jazz Brunch", "Reverb Lounge", days_ahead(2))),
        ],
    }));
    pipeline.set_fetchers(vec![]);

    pipeline.run(run_options(&["slowdown", "reverb"])).await?;

    let catalog_path = dir.path().join("catalog.json");
    assert!(catalog_path.exists());
    let catalog: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&catalog_path)?)?;
    let events = catalog["events"].as_array().unwrap();
    assert_eq!(events.len(), 3);

    let today = Utc::now().date_naive();
    let horizon = today + Duration::days(90);
    let mut ids = std::collections::HashSet::new();
    for ev in events {
        let date: chrono::NaiveDate = ev["date"].as_str().unwrap().parse()?;
        assert!(date >= today && date <= horizon);
        assert!(Category::parse(ev["cat"].as_str().unwrap()).is_some());
        assert!(ids.insert(ev["id"].as_u64().unwrap()));
        // every record kept a usable link (venue calendar fallback at worst)
        assert!(ev["url"].as_str().is_some());
    }
    assert_eq!(catalog["meta"]["event_count"].as_u64().unwrap(), 3);

    // dates ascending per the consumer contract
    let dates: Vec<&str> = events.iter().map(|e| e["date"].as_str().unwrap()).collect();
    let mut sorted = dates.clone();
    sorted.sort();
    assert_eq!(dates, sorted);
    Ok(())
}

#[tokio::test]
async fn dry_run_leaves_no_trace() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_cache(dir.path(), "slowdown");

    let mut pipeline = test_pipeline(dir.path());
    pipeline.set_extractor(Box::new(StubExtractor {
        events: vec![(
            "Slowdown",
            extracted("Ephemeral Show", "The Slowdown", days_ahead(4)),
        )],
    }));
    pipeline.set_fetchers(vec![]);

    let mut options = run_options(&["slowdown"]);
    options.dry_run = true;
    let report = pipeline.run(options).await?;

    assert_eq!(report.validation.output, 1);
    assert!(pipeline.load_events().is_empty());
    assert!(!dir.path().join("catalog.json").exists());
    Ok(())
}

#[tokio::test]
async fn second_prebuild_is_a_fixed_point() -> Result<()> {
    let dir = tempfile::tempdir()?;
    seed_cache(dir.path(), "slowdown");
    seed_cache(dir.path(), "chi");

    let mut pipeline = test_pipeline(dir.path());
    let date = days_ahead(6);
    pipeline.set_extractor(Box::new(StubExtractor {
        events: vec![
            ("Slowdown", extracted("Indie Night", "The Slowdown", date.clone())),
            ("CHI Health Center", extracted("Creighton Bluejays Basketball", "CHI Health Center", date.clone())),
        ],
    }));
    pipeline.set_fetchers(vec![Box::new(StubFetcher {
        events: vec![Candidate {
            title: "Creighton Men's Basketball".to_string(),
            venue: "CHI Health Center".to_string(),
            area: "Omaha".to_string(),
            date: date.clone(),
            time: "7:00 PM".to_string(),
            price: "$22".to_string(),
            desc: String::new(),
            url: Some("https://www.ticketmaster.com/event/XYZ".to_string()),
            image: Some("https://img/cu.jpg".to_string()),
            cat: Some(Category::Sports),
            source_id: "ticketmaster-api".to_string(),
            source_priority: 1,
            venue_url: None,
            vendor_event_id: Some("XYZ".to_string()),
            url_valid: true,
            affiliate_platform: Some("ticketmaster".to_string()),
        }],
    })]);

    pipeline.run(run_options(&["slowdown", "chi"])).await?;
    let after_run: Vec<u64> = pipeline.load_events().iter().map(|e| e.id).collect();

    pipeline.prebuild()?;
    let after_first: Vec<u64> = pipeline.load_events().iter().map(|e| e.id).collect();
    pipeline.prebuild()?;
    let after_second: Vec<u64> = pipeline.load_events().iter().map(|e| e.id).collect();

    assert_eq!(after_run, after_first);
    assert_eq!(after_first, after_second);
    Ok(())
}
