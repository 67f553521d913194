//! The frozen build artifact handed to the presentation layer: the merged
//! event array plus build metadata, overwritten wholesale at build time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::EventRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMeta {
    pub build_time: DateTime<Utc>,
    /// Timestamp of the last full ingestion run feeding this catalog.
    pub last_pipeline: Option<DateTime<Utc>>,
    pub event_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub meta: BuildMeta,
    pub events: Vec<EventRecord>,
}

/// Snapshot the merged store. Events arrive already merged and id-stamped;
/// this only fixes the ordering contract and stamps metadata.
pub fn freeze(mut events: Vec<EventRecord>, last_pipeline: Option<DateTime<Utc>>) -> Catalog {
    events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.title.cmp(&b.title)));
    Catalog {
        meta: BuildMeta {
            build_time: Utc::now(),
            last_pipeline,
            event_count: events.len(),
        },
        events,
    }
}

/// Consumer-facing invariants, checked before the artifact is written.
pub fn verify(catalog: &Catalog) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(catalog.events.len());
    for ev in &catalog.events {
        if !seen.insert(ev.id) {
            return Err(PipelineError::Api {
                message: format!("duplicate id {} in catalog ({})", ev.id, ev.title),
            });
        }
    }
    if catalog.meta.event_count != catalog.events.len() {
        return Err(PipelineError::Api {
            message: "catalog metadata count mismatch".to_string(),
        });
    }
    Ok(())
}

pub fn write<P: AsRef<Path>>(catalog: &Catalog, path: P) -> Result<()> {
    verify(catalog)?;
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(catalog)?)?;
    Ok(())
}
