//! Work units and worker state types

use std::sync::{Arc, Mutex};

use listharvest_core::{ErrorKind, SlotStatus};
use serde::{Deserialize, Serialize};

/// Lifecycle of a work unit in the queue
pub type UnitStatus = SlotStatus;

/// Result ordering requested from the catalog's search
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Newest,
    PriceAsc,
    PriceDesc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::PriceAsc => "price_asc",
            Self::PriceDesc => "price_desc",
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price band `[min, max)`; `max = None` is open-ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueBucket {
    pub min: u64,
    pub max: Option<u64>,
}

impl std::fmt::Display for ValueBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}-{}", self.min, max),
            None => write!(f, "{}+", self.min),
        }
    }
}

/// One search to page through
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub bucket: ValueBucket,
    pub category: String,
    pub sort: SortOrder,
    /// Pages `1..=max_pages` are fetched at most
    pub max_pages: u32,
}

/// What a unit enumerates
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSpec {
    /// Identifiers `[start, end)`
    IdRange { start: u64, end: u64 },
    Query(QueryDescriptor),
}

impl std::fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdRange { start, end } => write!(f, "ids[{start}, {end})"),
            Self::Query(q) => write!(
                f,
                "query[{} {} {} ≤{}p]",
                q.category, q.bucket, q.sort, q.max_pages
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: usize,
    pub target: TargetSpec,
    /// Higher = earlier
    pub priority: u32,
    pub assigned: Option<usize>,
    pub status: UnitStatus,
}

impl WorkUnit {
    pub fn new(id: usize, target: TargetSpec, priority: u32) -> Self {
        Self {
            id,
            target,
            priority,
            assigned: None,
            status: UnitStatus::Queued,
        }
    }
}

impl std::fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit_{:04} {}", self.id, self.target)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    CoolingDown,
    Done,
    Failed,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Allowed moves: idle→running, running↔cooling-down, running→idle
    /// between units, and any live status to done or failed.
    pub fn can_transition(self, to: Self) -> bool {
        use WorkerStatus::*;
        match (self, to) {
            (Done | Failed, _) => false,
            (_, Done | Failed) => true,
            (Idle, Running) | (Running, CoolingDown) | (CoolingDown, Running) => true,
            (Running, Idle) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::CoolingDown => "cooling_down",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-worker counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounts {
    /// Extraction attempts, retries included
    pub attempted: usize,
    pub valid: usize,
    /// Rejected by validation
    pub rejected: usize,
    pub duplicates: usize,
    pub near_duplicates: usize,
    /// Candidate had no listing behind it
    pub not_found: usize,
    pub mismatched: usize,
    pub retried: usize,
    /// Skipped after retries were exhausted
    pub skipped: usize,
    /// Already processed in an earlier session or by another worker
    pub resumed: usize,
}

impl WorkerCounts {
    pub fn add(&mut self, other: &Self) {
        self.attempted += other.attempted;
        self.valid += other.valid;
        self.rejected += other.rejected;
        self.duplicates += other.duplicates;
        self.near_duplicates += other.near_duplicates;
        self.not_found += other.not_found;
        self.mismatched += other.mismatched;
        self.retried += other.retried;
        self.skipped += other.skipped;
        self.resumed += other.resumed;
    }
}

/// Snapshot of one worker, published after every change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub worker_id: usize,
    pub status: WorkerStatus,
    pub counts: WorkerCounts,
    pub current_delay_ms: u64,
    /// Share of successful fetches in the rate limiter's rolling window
    pub success_rate: f64,
    pub last_error: Option<ErrorKind>,
    pub current_unit: Option<usize>,
    pub units_done: usize,
}

impl WorkerState {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            status: WorkerStatus::Idle,
            counts: WorkerCounts::default(),
            current_delay_ms: 0,
            success_rate: 1.0,
            last_error: None,
            current_unit: None,
            units_done: 0,
        }
    }

    /// Apply a status change if allowed; returns whether it happened
    pub fn transition(&mut self, to: WorkerStatus) -> bool {
        if self.status == to {
            return true;
        }
        if !self.status.can_transition(to) {
            log::debug!(
                "worker_{:02}: ignoring transition {} -> {}",
                self.worker_id,
                self.status,
                to
            );
            return false;
        }
        self.status = to;
        true
    }
}

/// Latest published state of every worker.
///
/// Workers swap in a fresh `Arc` after each change; readers clone the `Arc`
/// and never observe a half-updated state.
pub struct SnapshotBoard {
    slots: Vec<Mutex<Arc<WorkerState>>>,
}

impl SnapshotBoard {
    pub fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers)
                .map(|id| Mutex::new(Arc::new(WorkerState::new(id))))
                .collect(),
        }
    }

    pub fn publish(&self, state: WorkerState) {
        if let Some(slot) = self.slots.get(state.worker_id) {
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(state);
        }
    }

    pub fn get(&self, worker_id: usize) -> Option<Arc<WorkerState>> {
        self.slots
            .get(worker_id)
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn all(&self) -> Vec<Arc<WorkerState>> {
        self.slots
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
