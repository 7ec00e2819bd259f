//! Collection session: what one coordinator run leaves behind, and resume

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use listharvest_core::{Checkpoint, CheckpointStore};
use serde::Serialize;

use crate::dedup::Deduplicator;
use crate::record::ValidatedRecord;
use crate::state::{WorkUnit, WorkerState};
use crate::worker::FatalWorkerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    UnitsExhausted,
    AllWorkersFailed,
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TargetReached => "target_reached",
            Self::UnitsExhausted => "units_exhausted",
            Self::AllWorkersFailed => "all_workers_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn new_session_id() -> String {
    chrono::Utc::now()
        .format("session-%Y%m%d-%H%M%S%3f")
        .to_string()
}

/// Final state of one coordinator run
pub struct CollectionSession {
    pub session_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub target_count: usize,
    /// Every planned unit with its final status
    pub units: Vec<WorkUnit>,
    pub dedup: Deduplicator,
    /// Per-worker accepted records, indexed by worker id
    pub shards: Vec<Vec<ValidatedRecord>>,
    /// Records carried over from earlier checkpoints
    pub restored: Vec<ValidatedRecord>,
    pub workers: Vec<WorkerState>,
    /// Validation rejections by reason, summed over workers
    pub rejections: BTreeMap<String, usize>,
    pub failures: Vec<FatalWorkerError>,
    pub abandoned_units: usize,
    pub stop_reason: StopReason,
}

impl CollectionSession {
    pub fn elapsed(&self) -> std::time::Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Dedup state and records recovered from checkpoint files
#[derive(Debug, Default)]
pub struct Restored {
    pub dedup: Deduplicator,
    pub records: Vec<ValidatedRecord>,
    pub checkpoints: usize,
    /// Restored records dropped as duplicates of earlier ones
    pub dropped: usize,
}

impl Restored {
    /// Numeric identifiers of restored records, for the planner's history
    pub fn history_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.records.iter().filter_map(ValidatedRecord::numeric_id)
    }
}

/// Load every checkpoint under `root` into a fresh deduplicator
pub fn restore(root: &Path) -> anyhow::Result<Restored> {
    let checkpoints: Vec<Checkpoint<ValidatedRecord>> = CheckpointStore::load_all(root)
        .with_context(|| format!("Failed to read checkpoints under {}", root.display()))?;

    let mut restored = Restored {
        checkpoints: checkpoints.len(),
        ..Restored::default()
    };
    for cp in checkpoints {
        restored.dedup.preload_processed(cp.processed);
        for record in cp.records {
            if restored
                .dedup
                .try_insert(&record.canonical_key, &record.signature)
            {
                restored.records.push(record);
            } else {
                restored.dropped += 1;
            }
        }
    }

    if restored.checkpoints > 0 {
        log::info!(
            "Restored {} records and {} processed candidates from {} checkpoints ({} duplicates dropped)",
            restored.records.len(),
            restored.dedup.processed_count(),
            restored.checkpoints,
            restored.dropped
        );
    }
    Ok(restored)
}
