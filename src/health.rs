//! Rolling health history: per-source and per-run outcomes appended after
//! every pipeline run, bounded to a fixed window, plus the report rendered
//! by the `report` subcommand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::HEALTH_MAX_HISTORY;
use crate::error::Result;
use crate::store::{get_typed, put_typed, KvStore};
use crate::types::{AcquisitionMethod, FetchError};

const HEALTH_KEY: &str = "health";

/// How one source fared in one run, as reported by the orchestrator.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source_id: String,
    pub tier: u8,
    pub success: bool,
    pub method: AcquisitionMethod,
    pub event_count: usize,
    pub errors: Vec<FetchError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRunEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub method: String,
    pub events: usize,
    #[serde(default)]
    pub errors: Vec<FetchError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceHealth {
    /// Newest first, bounded to the history window.
    pub history: Vec<SourceRunEntry>,
    pub total_runs: u64,
    pub total_events: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_sources: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub raw_events: usize,
    pub final_events: usize,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthState {
    pub sources: HashMap<String, SourceHealth>,
    /// Newest first, bounded to the history window.
    pub runs: Vec<RunRecord>,
}

impl HealthState {
    /// Sources that failed in at least 4 of their last 5 recorded runs.
    pub fn chronically_failing(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sources
            .iter()
            .filter(|(_, h)| {
                h.history.len() >= 5
                    && h.history.iter().take(5).filter(|e| !e.success).count() >= 4
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Sources failing 3+ of their last 5 runs: not yet chronic, flagged in
    /// the report as declining.
    pub fn declining(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sources
            .iter()
            .filter(|(_, h)| {
                h.history.len() >= 5
                    && h.history.iter().take(5).filter(|e| !e.success).count() >= 3
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Typed wrapper over the key-value store for health state.
pub struct HealthStore {
    store: Arc<dyn KvStore>,
}

impl HealthStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> HealthState {
        get_typed(self.store.as_ref(), HEALTH_KEY)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Append one run's outcomes, evict beyond the window, persist, and
    /// return the updated state.
    pub fn record_run(&self, run: RunRecord, outcomes: &[SourceOutcome]) -> Result<HealthState> {
        let mut state = self.load();

        for outcome in outcomes {
            let entry = SourceRunEntry {
                timestamp: run.timestamp,
                success: outcome.success,
                method: outcome.method.as_str().to_string(),
                events: outcome.event_count,
                errors: outcome.errors.clone(),
            };
            let health = state.sources.entry(outcome.source_id.clone()).or_default();
            health.history.insert(0, entry);
            health.history.truncate(HEALTH_MAX_HISTORY);
            health.total_runs += 1;
            health.total_events += outcome.event_count as u64;
            if !outcome.success {
                health.failures += 1;
            }
        }

        state.runs.insert(0, run);
        state.runs.truncate(HEALTH_MAX_HISTORY);

        put_typed(self.store.as_ref(), HEALTH_KEY, &state)?;
        Ok(state)
    }
}

/// Human-readable reliability report over the rolling history.
pub fn generate_report(state: &HealthState) -> String {
    let mut report = Vec::new();
    report.push("PIPELINE HEALTH REPORT".to_string());
    report.push("======================".to_string());

    if let Some(last) = state.runs.first() {
        let avg: f64 = state.runs.iter().map(|r| r.final_events as f64).sum::<f64>()
            / state.runs.len() as f64;
        report.push(format!("Last run: {}", last.timestamp.to_rfc3339()));
        report.push(format!(
            "  Sources: {}/{} succeeded, {} failed",
            last.sources_succeeded, last.total_sources, last.sources_failed
        ));
        report.push(format!(
            "  Events: {} raw -> {} final",
            last.raw_events, last.final_events
        ));
        report.push(format!("  Duration: {:.1}s", last.duration_secs));
        report.push(format!("  Avg events per run: {avg:.0}"));
    } else {
        report.push("No runs recorded yet.".to_string());
    }

    report.push(String::new());
    report.push(format!("Source reliability (last {HEALTH_MAX_HISTORY} runs):"));
    let mut entries: Vec<(&String, &SourceHealth)> = state.sources.iter().collect();
    entries.sort_by(|a, b| {
        let rate = |h: &SourceHealth| h.failures as f64 / h.total_runs.max(1) as f64;
        rate(b.1)
            .partial_cmp(&rate(a.1))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    for (id, health) in entries {
        let success_rate =
            (1.0 - health.failures as f64 / health.total_runs.max(1) as f64) * 100.0;
        let avg_events = health.total_events as f64 / health.total_runs.max(1) as f64;
        report.push(format!(
            "  {id}: {success_rate:.0}% success, ~{avg_events:.1} events/run ({} runs)",
            health.total_runs
        ));
    }

    let failed_last: Vec<(&String, &SourceHealth)> = state
        .sources
        .iter()
        .filter(|(_, h)| h.history.first().map(|e| !e.success).unwrap_or(false))
        .collect();
    if !failed_last.is_empty() {
        report.push(String::new());
        report.push("Failed last run:".to_string());
        let mut failed_last = failed_last;
        failed_last.sort_by_key(|(id, _)| id.as_str());
        for (id, health) in failed_last {
            let cause = health
                .history
                .first()
                .and_then(|e| e.errors.first())
                .map(|e| e.error.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            report.push(format!("  {id}: {cause}"));
        }
    }

    let declining = state.declining();
    if !declining.is_empty() {
        report.push(String::new());
        report.push("Declining reliability (3+ failures in last 5 runs):".to_string());
        for id in declining {
            report.push(format!("  {id}"));
        }
    }

    report.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;

    fn outcome(id: &str, success: bool) -> SourceOutcome {
        SourceOutcome {
            source_id: id.to_string(),
            tier: 1,
            success,
            method: if success {
                AcquisitionMethod::Rendered
            } else {
                AcquisitionMethod::Failed
            },
            event_count: if success { 7 } else { 0 },
            errors: if success {
                Vec::new()
            } else {
                vec![FetchError {
                    method: "rendered".to_string(),
                    error: "HTTP 503".to_string(),
                }]
            },
        }
    }

    fn run_record(final_events: usize) -> RunRecord {
        RunRecord {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total_sources: 2,
            sources_succeeded: 1,
            sources_failed: 1,
            raw_events: 12,
            final_events,
            duration_secs: 42.0,
        }
    }

    fn store() -> (tempfile::TempDir, HealthStore) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        (dir, HealthStore::new(kv))
    }

    #[test]
    fn record_run_appends_newest_first() {
        let (_dir, health) = store();
        health
            .record_run(run_record(10), &[outcome("chi", true)])
            .unwrap();
        let state = health
            .record_run(run_record(20), &[outcome("chi", false)])
            .unwrap();

        assert_eq!(state.runs.len(), 2);
        assert_eq!(state.runs[0].final_events, 20);
        let chi = &state.sources["chi"];
        assert_eq!(chi.total_runs, 2);
        assert_eq!(chi.failures, 1);
        assert!(!chi.history[0].success);
    }

    #[test]
    fn history_window_is_bounded() {
        let (_dir, health) = store();
        for i in 0..(HEALTH_MAX_HISTORY + 5) {
            health
                .record_run(run_record(i), &[outcome("chi", true)])
                .unwrap();
        }
        let state = health.load();
        assert_eq!(state.runs.len(), HEALTH_MAX_HISTORY);
        assert_eq!(state.sources["chi"].history.len(), HEALTH_MAX_HISTORY);
        // newest retained
        assert_eq!(state.runs[0].final_events, HEALTH_MAX_HISTORY + 4);
        // lifetime counters keep counting past the window
        assert_eq!(state.sources["chi"].total_runs, (HEALTH_MAX_HISTORY + 5) as u64);
    }

    #[test]
    fn chronic_failure_requires_four_of_five() {
        let (_dir, health) = store();
        // 1 success then 4 failures -> newest-first window is FFFF S
        health.record_run(run_record(5), &[outcome("chi", true)]).unwrap();
        for _ in 0..4 {
            health.record_run(run_record(5), &[outcome("chi", false)]).unwrap();
        }
        let state = health.load();
        assert_eq!(state.chronically_failing(), vec!["chi".to_string()]);

        // A fresh success pushes the window to S FFFF -> still chronic (4/5)
        let state = health.record_run(run_record(5), &[outcome("chi", true)]).unwrap();
        assert_eq!(state.chronically_failing(), vec!["chi".to_string()]);

        // Another success -> SSFFF, 3/5: declining but no longer chronic
        let state = health.record_run(run_record(5), &[outcome("chi", true)]).unwrap();
        assert!(state.chronically_failing().is_empty());
        assert_eq!(state.declining(), vec!["chi".to_string()]);
    }

    #[test]
    fn short_history_is_never_chronic() {
        let (_dir, health) = store();
        for _ in 0..4 {
            health.record_run(run_record(5), &[outcome("chi", false)]).unwrap();
        }
        assert!(health.load().chronically_failing().is_empty());
    }

    #[test]
    fn report_renders_reliability_and_failures() {
        let (_dir, health) = store();
        let state = health
            .record_run(run_record(15), &[outcome("chi", true), outcome("zoo", false)])
            .unwrap();
        let report = generate_report(&state);
        assert!(report.contains("chi: 100% success"));
        assert!(report.contains("zoo: 0% success"));
        assert!(report.contains("Failed last run:"));
        assert!(report.contains("zoo: HTTP 503"));
        assert!(report.contains("15 final"));
    }
}
