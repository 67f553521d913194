//! Orchestration of a full ingestion run: registry filtering, scraping,
//! structured fetchers, extraction, validation, persistence, health
//! recording, alerting, and the build-time merge + catalog freeze.

use chrono::Utc;
use metrics::{counter, histogram};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::alerts::{evaluate, AlertChannels};
use crate::apis;
use crate::catalog;
use crate::config::{Secrets, Settings};
use crate::error::{PipelineError, Result};
use crate::extractor::{extract_all, AnthropicExtractor, EventExtractor, ScrapedPage};
use crate::health::{HealthStore, RunRecord, SourceOutcome};
use crate::merge::{merge_pass, MergeSummary};
use crate::registry::{Source, SourceFilter, SOURCES};
use crate::scraper::Scraper;
use crate::similarity::dedupe_key;
use crate::store::{get_typed, put_typed, JsonFileStore, KvStore, RunLock};
use crate::types::{AcquisitionMethod, Candidate, EventRecord, ScrapeResult, StructuredFetcher};
use crate::validator::{validate, ValidationOptions, ValidationSummary};

const EVENTS_KEY: &str = "events";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub filter: SourceFilter,
    /// Print results without persisting anything.
    pub dry_run: bool,
    pub skip_url_check: bool,
    /// Re-parse cached content only; no scraping network traffic.
    pub skip_scrape: bool,
    /// Union with the existing store instead of replacing it.
    pub merge_with_store: bool,
    pub concurrency: Option<usize>,
}

#[derive(Debug)]
pub struct RunReport {
    pub run: RunRecord,
    pub validation: ValidationSummary,
    pub merge: Option<MergeSummary>,
    pub alerts: Vec<String>,
    pub catalog_events: usize,
}

pub struct Pipeline {
    settings: Settings,
    secrets: Secrets,
    cache: Arc<dyn KvStore>,
    store: Arc<dyn KvStore>,
    health: HealthStore,
    channels: AlertChannels,
    client: reqwest::Client,
    extractor_override: Option<Box<dyn EventExtractor>>,
    fetchers_override: Option<Vec<Box<dyn StructuredFetcher>>>,
}

impl Pipeline {
    pub fn new(settings: Settings, secrets: Secrets) -> Result<Self> {
        let cache: Arc<dyn KvStore> =
            Arc::new(JsonFileStore::open(format!("{}/cache", settings.data_dir))?);
        let store: Arc<dyn KvStore> = Arc::new(JsonFileStore::open(&settings.data_dir)?);
        let health = HealthStore::new(Arc::clone(&store));
        let channels = AlertChannels::new(
            secrets.slack_webhook_url.clone(),
            secrets.discord_webhook_url.clone(),
        );
        Ok(Self {
            settings,
            secrets,
            cache,
            store,
            health,
            channels,
            client: reqwest::Client::new(),
            extractor_override: None,
            fetchers_override: None,
        })
    }

    /// Swap the extraction backend (tests, per-source deterministic parsers).
    pub fn set_extractor(&mut self, extractor: Box<dyn EventExtractor>) {
        self.extractor_override = Some(extractor);
    }

    /// Swap the structured fetcher set (tests run with none).
    pub fn set_fetchers(&mut self, fetchers: Vec<Box<dyn StructuredFetcher>>) {
        self.fetchers_override = Some(fetchers);
    }

    pub fn channels(&self) -> &AlertChannels {
        &self.channels
    }

    pub fn health_report(&self) -> String {
        crate::health::generate_report(&self.health.load())
    }

    pub fn load_events(&self) -> Vec<EventRecord> {
        get_typed(self.store.as_ref(), EVENTS_KEY)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn save_events(&self, events: &[EventRecord]) -> Result<()> {
        put_typed(self.store.as_ref(), EVENTS_KEY, &events)
    }

    fn default_fetchers(&self) -> Vec<Box<dyn StructuredFetcher>> {
        vec![
            Box::new(apis::ticketmaster::TicketmasterFetcher::new(
                self.secrets.ticketmaster_api_key.clone(),
                Arc::clone(&self.cache),
                self.settings.ticketmaster.clone(),
            )),
            Box::new(apis::ticketomaha::TicketOmahaFetcher::new(
                Arc::clone(&self.cache),
                self.settings.ticketomaha.clone(),
            )),
        ]
    }

    /// Serve cached content only, for `--skip-scrape` runs.
    fn cached_only(&self, sources: &[Source]) -> Vec<ScrapeResult> {
        let scraper = Scraper::new(
            Arc::clone(&self.cache),
            self.settings.scraper.clone(),
            None,
        );
        sources
            .iter()
            .map(|s| match scraper.read_cached(s.id) {
                Some(page) => ScrapeResult {
                    source_id: s.id.to_string(),
                    bytes: page.byte_len,
                    content: Some(page.content),
                    method: AcquisitionMethod::CacheStale,
                    errors: Vec::new(),
                },
                None => ScrapeResult::failed(s.id, Vec::new()),
            })
            .collect()
    }

    /// One full ingestion run. Fatal errors (missing extraction credential,
    /// zero successful scrapes, concurrent run) surface as `Err`; everything
    /// else degrades and is reported through health and alerts.
    #[instrument(skip_all)]
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let _lock = RunLock::acquire(&self.settings.data_dir)?;
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        counter!("pipeline_runs_total").increment(1);

        // The extraction credential is required before any network spend.
        let default_extractor;
        let extractor: &dyn EventExtractor = match &self.extractor_override {
            Some(boxed) => boxed.as_ref(),
            None => {
                default_extractor = AnthropicExtractor::new(
                    self.secrets.require_anthropic()?.to_string(),
                    self.settings.extractor.clone(),
                );
                &default_extractor
            }
        };

        let sources = options.filter.apply(&SOURCES);
        info!(
            "run {}: {} of {} sources selected (categorization rules {})",
            run_id,
            sources.len(),
            SOURCES.len(),
            crate::categorize::RULES_VERSION
        );

        // Phase 1: acquire content.
        let scraped = if options.skip_scrape {
            info!("skipping scrape, serving cached content only");
            self.cached_only(&sources)
        } else {
            let mut scraper_settings = self.settings.scraper.clone();
            if let Some(concurrency) = options.concurrency {
                scraper_settings.concurrency = concurrency;
            }
            let scraper = Arc::new(Scraper::new(
                Arc::clone(&self.cache),
                scraper_settings,
                self.secrets.reader_api_key.clone(),
            ));
            scraper.scrape_all(&sources).await
        };

        let succeeded = scraped.iter().filter(|r| r.content.is_some()).count();
        let failed_ids: Vec<&str> = scraped
            .iter()
            .filter(|r| r.content.is_none())
            .map(|r| r.source_id.as_str())
            .collect();
        info!("scraped {}/{} sources", succeeded, sources.len());
        if !failed_ids.is_empty() {
            warn!("failed sources: {}", failed_ids.join(", "));
        }
        if succeeded == 0 && !sources.is_empty() {
            return Err(PipelineError::AllSourcesFailed);
        }

        // Phase 2: structured fetchers, each independently degradable.
        let default_fetchers;
        let fetchers: &[Box<dyn StructuredFetcher>] = match &self.fetchers_override {
            Some(fetchers) => fetchers,
            None => {
                default_fetchers = self.default_fetchers();
                &default_fetchers
            }
        };
        let mut candidates: Vec<Candidate> = Vec::new();
        for fetcher in fetchers {
            match fetcher.fetch_events().await {
                Ok(events) => {
                    info!("{}: {} events", fetcher.fetcher_id(), events.len());
                    counter!("fetcher_events_total").increment(events.len() as u64);
                    candidates.extend(events);
                }
                Err(e) => {
                    error!(
                        "{} failed, continuing without it: {}",
                        fetcher.fetcher_id(),
                        e
                    );
                }
            }
        }

        // Phase 3: extraction over scraped pages.
        let pages = ScrapedPage::from_results(&sources, &scraped);
        let extracted = extract_all(extractor, &pages, &self.settings.extractor).await;
        info!("extracted {} raw candidates", extracted.len());
        let raw_total = candidates.len() + extracted.len();
        candidates.extend(extracted);

        // Phase 4: validation.
        let today = Utc::now().date_naive();
        let (validated, validation) = validate(
            candidates,
            &self.client,
            &self.secrets,
            today,
            ValidationOptions {
                skip_url_check: options.skip_url_check,
            },
        )
        .await;

        if options.dry_run {
            info!("dry run: skipping persistence, health, and prebuild");
            let run_record = RunRecord {
                run_id,
                timestamp: Utc::now(),
                total_sources: sources.len(),
                sources_succeeded: succeeded,
                sources_failed: sources.len() - succeeded,
                raw_events: raw_total,
                final_events: validated.len(),
                duration_secs: started.elapsed().as_secs_f64(),
            };
            return Ok(RunReport {
                run: run_record,
                validation,
                merge: None,
                alerts: Vec::new(),
                catalog_events: validated.len(),
            });
        }

        // Phase 5: persist the validated set (optionally unioned with the
        // existing store on a title+date key, expired records dropped).
        let final_events = if options.merge_with_store {
            let existing_fresh: Vec<EventRecord> = self
                .load_events()
                .into_iter()
                .filter(|e| e.date >= today)
                .collect();
            let seen: HashSet<String> = existing_fresh
                .iter()
                .map(|e| dedupe_key(&e.title, &e.date.to_string()))
                .collect();
            let new_only: Vec<EventRecord> = validated
                .iter()
                .filter(|e| !seen.contains(&dedupe_key(&e.title, &e.date.to_string())))
                .cloned()
                .collect();
            info!(
                "store merge: {} existing + {} new",
                existing_fresh.len(),
                new_only.len()
            );
            let mut combined = existing_fresh;
            combined.extend(new_only);
            combined.sort_by(|a, b| a.date.cmp(&b.date));
            combined
        } else {
            validated
        };
        self.save_events(&final_events)?;
        info!("saved {} events to store", final_events.len());

        // Phase 6: health recording + alert evaluation.
        let run_record = RunRecord {
            run_id,
            timestamp: Utc::now(),
            total_sources: sources.len(),
            sources_succeeded: succeeded,
            sources_failed: sources.len() - succeeded,
            raw_events: raw_total,
            final_events: final_events.len(),
            duration_secs: started.elapsed().as_secs_f64(),
        };
        let outcomes = source_outcomes(&sources, &scraped, &final_events);
        let state = self.health.record_run(run_record.clone(), &outcomes)?;

        let alerts = evaluate(&run_record, &outcomes, &state);
        if !alerts.is_empty() {
            if self.channels.configured() {
                self.channels.dispatch(&alerts).await;
            } else {
                for line in &alerts {
                    info!("ALERT (no channel configured): {}", line);
                }
            }
        }

        // Phase 7: build-time merge over the accumulated store, then freeze
        // the catalog artifact for the presentation layer.
        let (merged, merge_summary) = merge_pass(self.load_events(), today);
        self.save_events(&merged)?;
        let frozen = catalog::freeze(merged, Some(run_record.timestamp));
        let catalog_events = frozen.meta.event_count;
        catalog::write(&frozen, format!("{}/catalog.json", self.settings.data_dir))?;
        info!("catalog frozen: {} events", catalog_events);

        histogram!("pipeline_duration_seconds").record(run_record.duration_secs);
        Ok(RunReport {
            run: run_record,
            validation,
            merge: Some(merge_summary),
            alerts,
            catalog_events,
        })
    }

    /// Standalone build step: merge the accumulated store and freeze the
    /// catalog without re-ingesting.
    pub fn prebuild(&self) -> Result<usize> {
        let today = Utc::now().date_naive();
        let (merged, summary) = merge_pass(self.load_events(), today);
        self.save_events(&merged)?;

        let last_pipeline = self.health.load().runs.first().map(|r| r.timestamp);
        let frozen = catalog::freeze(merged, last_pipeline);
        let count = frozen.meta.event_count;
        catalog::write(&frozen, format!("{}/catalog.json", self.settings.data_dir))?;
        info!(
            "prebuild: {} -> {} events frozen to catalog",
            summary.input, count
        );
        Ok(count)
    }
}

/// Fold per-source scrape results and per-source surviving-event counts into
/// the health outcome rows.
fn source_outcomes(
    sources: &[Source],
    scraped: &[ScrapeResult],
    final_events: &[EventRecord],
) -> Vec<SourceOutcome> {
    scraped
        .iter()
        .map(|r| {
            let tier = sources
                .iter()
                .find(|s| s.id == r.source_id)
                .map(|s| s.tier)
                .unwrap_or(2);
            SourceOutcome {
                source_id: r.source_id.clone(),
                tier,
                success: r.content.is_some(),
                method: r.method,
                event_count: final_events
                    .iter()
                    .filter(|e| e.source_id == r.source_id)
                    .count(),
                errors: r.errors.clone(),
            }
        })
        .collect()
}
