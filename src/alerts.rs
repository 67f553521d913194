//! Threshold evaluation over a just-completed run plus webhook dispatch.
//! Alert lines are always computed and logged; delivery only happens when a
//! channel is configured, and a failure on one channel never blocks another.

use serde_json::json;
use tracing::{info, warn};

use crate::constants::{FAILURE_RATE_THRESHOLD, MIN_EVENTS_THRESHOLD};
use crate::health::{HealthState, RunRecord, SourceOutcome};

/// Evaluate the four advisory conditions against the just-completed run and
/// the updated history (current run already appended at the head).
pub fn evaluate(run: &RunRecord, outcomes: &[SourceOutcome], state: &HealthState) -> Vec<String> {
    let mut alerts = Vec::new();

    let failure_rate = run.sources_failed as f64 / run.total_sources.max(1) as f64;
    if failure_rate > FAILURE_RATE_THRESHOLD {
        alerts.push(format!(
            "High failure rate: {}/{} sources failed ({:.0}%)",
            run.sources_failed,
            run.total_sources,
            failure_rate * 100.0
        ));
    }

    let tier1_failures: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.success && o.tier == 1)
        .map(|o| o.source_id.as_str())
        .collect();
    if !tier1_failures.is_empty() {
        alerts.push(format!("Tier-1 sources down: {}", tier1_failures.join(", ")));
    }

    if let Some(previous) = state.runs.get(1) {
        let prev = previous.final_events;
        if prev > 0 && (run.final_events as f64) < prev as f64 * 0.5 {
            alerts.push(format!(
                "Event count dropped: {} -> {} ({:.0}% decrease)",
                prev,
                run.final_events,
                (1.0 - run.final_events as f64 / prev as f64) * 100.0
            ));
        }
    }

    if run.final_events < MIN_EVENTS_THRESHOLD {
        alerts.push(format!("Very few events: only {} found", run.final_events));
    }

    let chronic = state.chronically_failing();
    if !chronic.is_empty() {
        alerts.push(format!(
            "Chronically failing sources (4+ fails in last 5 runs): {}",
            chronic.join(", ")
        ));
    }

    alerts
}

/// The configured webhook channels.
pub struct AlertChannels {
    client: reqwest::Client,
    slack_url: Option<String>,
    discord_url: Option<String>,
}

impl AlertChannels {
    pub fn new(slack_url: Option<String>, discord_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            slack_url,
            discord_url,
        }
    }

    pub fn configured(&self) -> bool {
        self.slack_url.is_some() || self.discord_url.is_some()
    }

    async fn post(&self, url: &str, payload: serde_json::Value) {
        match self.client.post(url).json(&payload).send().await {
            Ok(res) if !res.status().is_success() => {
                warn!("webhook returned {}", res.status().as_u16());
            }
            Ok(_) => {}
            Err(e) => warn!("webhook delivery failed: {}", e),
        }
    }

    fn slack_payload(alerts: &[String]) -> serde_json::Value {
        json!({
            "text": "GO Guide pipeline alert",
            "blocks": [
                {"type": "header", "text": {"type": "plain_text", "text": "GO Guide pipeline alert"}},
                {"type": "section", "text": {"type": "mrkdwn", "text": alerts.join("\n")}},
            ],
        })
    }

    fn discord_payload(alerts: &[String]) -> serde_json::Value {
        json!({
            "content": null,
            "embeds": [{
                "title": "GO Guide pipeline alert",
                "description": alerts.join("\n"),
                "color": 15158332,
            }],
        })
    }

    /// Send a combined message to every configured channel independently.
    pub async fn dispatch(&self, alerts: &[String]) {
        if alerts.is_empty() {
            return;
        }
        for line in alerts {
            info!("ALERT: {}", line);
        }
        if let Some(url) = &self.slack_url {
            self.post(url, Self::slack_payload(alerts)).await;
            info!("alert sent to Slack");
        }
        if let Some(url) = &self.discord_url {
            self.post(url, Self::discord_payload(alerts)).await;
            info!("alert sent to Discord");
        }
    }

    /// Crash-path alert, fired before the process exits non-zero.
    pub async fn critical(&self, message: &str) {
        let alerts = vec![format!("Pipeline crashed: {message}")];
        if let Some(url) = &self.slack_url {
            self.post(url, Self::slack_payload(&alerts)).await;
        }
        if let Some(url) = &self.discord_url {
            self.post(url, Self::discord_payload(&alerts)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{SourceHealth, SourceRunEntry};
    use crate::types::AcquisitionMethod;
    use chrono::Utc;
    use uuid::Uuid;

    fn run(total: usize, failed: usize, final_events: usize) -> RunRecord {
        RunRecord {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total_sources: total,
            sources_succeeded: total - failed,
            sources_failed: failed,
            raw_events: final_events * 2,
            final_events,
            duration_secs: 10.0,
        }
    }

    fn outcome(id: &str, tier: u8, success: bool) -> SourceOutcome {
        SourceOutcome {
            source_id: id.to_string(),
            tier,
            success,
            method: AcquisitionMethod::Rendered,
            event_count: 0,
            errors: Vec::new(),
        }
    }

    fn state_with_chronic(id: &str) -> HealthState {
        let mut state = HealthState::default();
        let mut health = SourceHealth::default();
        for success in [false, false, false, false, true] {
            health.history.push(SourceRunEntry {
                timestamp: Utc::now(),
                success,
                method: "rendered".to_string(),
                events: 0,
                errors: Vec::new(),
            });
        }
        health.total_runs = 5;
        health.failures = 4;
        state.sources.insert(id.to_string(), health);
        state
    }

    #[test]
    fn quiet_run_produces_no_alerts() {
        let state = HealthState::default();
        let alerts = evaluate(&run(10, 1, 50), &[outcome("zoo", 2, false)], &state);
        assert!(alerts.is_empty());
    }

    #[test]
    fn failure_rate_over_threshold_alerts() {
        let state = HealthState::default();
        let alerts = evaluate(&run(10, 3, 50), &[], &state);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("High failure rate"));
    }

    #[test]
    fn tier1_failure_alerts_by_name() {
        let state = HealthState::default();
        let alerts = evaluate(
            &run(10, 1, 50),
            &[outcome("chi", 1, false), outcome("zoo", 2, true)],
            &state,
        );
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Tier-1 sources down: chi"));
    }

    #[test]
    fn event_count_collapse_alerts() {
        let mut state = HealthState::default();
        state.runs.push(run(10, 0, 20)); // current
        state.runs.push(run(10, 0, 100)); // previous
        let alerts = evaluate(&run(10, 0, 20), &[], &state);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Event count dropped: 100 -> 20"));
    }

    #[test]
    fn too_few_events_alerts() {
        let state = HealthState::default();
        let alerts = evaluate(&run(10, 0, 3), &[], &state);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Very few events: only 3"));
    }

    #[test]
    fn chronic_failure_emits_exactly_one_line_even_with_other_alerts() {
        let state = state_with_chronic("gretnacal");
        // Trip failure-rate and min-events too.
        let alerts = evaluate(&run(10, 5, 2), &[], &state);
        let chronic_lines: Vec<&String> = alerts
            .iter()
            .filter(|a| a.contains("Chronically failing"))
            .collect();
        assert_eq!(chronic_lines.len(), 1);
        assert!(chronic_lines[0].contains("gretnacal"));
        assert!(alerts.len() >= 3);
    }
}
