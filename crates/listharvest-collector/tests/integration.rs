//! Integration tests for listharvest-collector
//!
//! A scripted in-memory catalog stands in for the HTTP extractor; pacing
//! and backoff are scaled down to milliseconds.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use listharvest_collector::{
    BatchCoordinator, Candidate, Extraction, HarvestConfig, PageExtractor, QueryDescriptor,
    RawRecord, StopReason, SuccessHistory, TargetSpec, WorkUnit, consolidate, restore,
};
use listharvest_core::{FetchError, ProgressContext, SharedProgress};
use tempfile::TempDir;

type Script = dyn Fn(u64, u32) -> Result<Extraction, FetchError> + Send + Sync;

/// Catalog whose answer depends on the identifier and the attempt number
struct ScriptedCatalog {
    script: Box<Script>,
    attempts: Mutex<HashMap<u64, u32>>,
}

impl ScriptedCatalog {
    fn new(script: impl Fn(u64, u32) -> Result<Extraction, FetchError> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Every identifier is a distinct valid listing
    fn healthy() -> Self {
        Self::new(|id, _| Ok(listing(id)))
    }

    fn attempts_for(&self, id: u64) -> u32 {
        self.attempts.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> u32 {
        self.attempts.lock().unwrap().values().sum()
    }
}

impl PageExtractor for ScriptedCatalog {
    fn extract(&self, candidate: &Candidate) -> Result<Extraction, FetchError> {
        let id = match candidate {
            Candidate::Identifier(id) => *id,
            Candidate::Listing(r) => r.rsplit('/').next().and_then(|s| s.parse().ok()).unwrap_or(0),
        };
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(id).or_insert(0);
            *n += 1;
            *n
        };
        (self.script)(id, attempt)
    }

    fn search(&self, _: &QueryDescriptor, _: u32) -> Result<Vec<String>, FetchError> {
        Ok(Vec::new())
    }
}

fn listing(n: u64) -> Extraction {
    Extraction::Found(RawRecord {
        price: Some(50_000.0 + n as f64 * 5_000.0),
        area: Some(80.0),
        category: Some("flat".into()),
        location: Some("Porto".into()),
        rooms: Some(2),
        ..RawRecord::new(format!("https://catalog.example/listing/{n}"))
    })
}

fn config(workers: usize, target: usize, checkpoints: Option<&Path>) -> HarvestConfig {
    let mut c = HarvestConfig::default();
    c.workers.count = workers;
    c.workers.stagger_ms = 0;
    c.collection.target_count = target;
    c.collection.batch_size = 3;
    c.rate_limit.base_delay = 0.001;
    c.rate_limit.min_delay = 0.0;
    c.rate_limit.max_delay = 0.004;
    c.rate_limit.seed = Some(7);
    c.retry.retry_limit = 2;
    c.retry.backoff_base = 0.001;
    c.retry.backoff_max = 0.002;
    c.retry.cooldown = 0.001;
    c.progress.interval_ms = 20;
    match checkpoints {
        Some(dir) => c.checkpoint.dir = dir.to_path_buf(),
        None => c.checkpoint.enabled = false,
    }
    c
}

fn ranges(bounds: &[(u64, u64)]) -> Vec<WorkUnit> {
    let n = bounds.len();
    bounds
        .iter()
        .enumerate()
        .map(|(i, &(start, end))| WorkUnit::new(i, TargetSpec::IdRange { start, end }, (n - i) as u32))
        .collect()
}

fn hidden() -> SharedProgress {
    Arc::new(ProgressContext::hidden())
}

#[test]
fn single_worker_counts_exact_repeats() {
    // ids 8 and 9 point at the same listings as 0 and 1
    let catalog = ScriptedCatalog::new(|id, _| Ok(listing(id % 8)));
    let cfg = config(1, 100, None);
    let session = BatchCoordinator::new(&cfg, &catalog, hidden())
        .run(ranges(&[(0, 10)]), 1, 100)
        .unwrap();
    let (records, stats) = consolidate(&session);

    assert_eq!(records.len(), 8);
    assert_eq!(stats.totals.duplicates, 2);
    assert_eq!(session.stop_reason, StopReason::UnitsExhausted);
}

#[test]
fn overlapping_ranges_never_duplicate() {
    let catalog = ScriptedCatalog::healthy();
    let cfg = config(2, 1_000, None);
    let session = BatchCoordinator::new(&cfg, &catalog, hidden())
        .run(ranges(&[(0, 20), (10, 30), (5, 25)]), 2, 1_000)
        .unwrap();
    let (records, stats) = consolidate(&session);

    let keys: HashSet<&str> = records.iter().map(|r| r.canonical_key.as_str()).collect();
    assert_eq!(keys.len(), records.len());
    assert_eq!(records.len(), 30);
    assert_eq!(stats.repeated_fingerprints, 0);

    // per-worker accepted counts add up to the dataset
    let accepted: usize = session.workers.iter().map(|w| w.counts.valid).sum();
    assert_eq!(accepted, records.len());
}

#[test]
fn exhausted_queue_stops_short_of_target() {
    let catalog = ScriptedCatalog::healthy();
    let cfg = config(2, 100, None);
    let session = BatchCoordinator::new(&cfg, &catalog, hidden())
        .run(ranges(&[(0, 5), (5, 8)]), 2, 100)
        .unwrap();
    let (records, stats) = consolidate(&session);

    assert_eq!(session.stop_reason, StopReason::UnitsExhausted);
    assert_eq!(records.len(), 8);
    assert!(stats.collected < stats.target_count);
    assert_eq!(stats.units_done, 2);
    assert_eq!(stats.stop_reason, "units_exhausted");
}

#[test]
fn fatal_worker_unit_is_reassigned() {
    // the first request for id 3 is unrecoverable; later ones succeed
    let tripped = AtomicBool::new(false);
    let catalog = ScriptedCatalog::new(move |id, _| {
        if id == 3 && !tripped.swap(true, Ordering::SeqCst) {
            return Err(FetchError::Fatal("account blocked".into()));
        }
        Ok(listing(id))
    });
    let cfg = config(2, 20, None);
    let session = BatchCoordinator::new(&cfg, &catalog, hidden())
        .run(ranges(&[(0, 10), (10, 20)]), 2, 20)
        .unwrap();
    let (records, stats) = consolidate(&session);

    assert_eq!(session.stop_reason, StopReason::TargetReached);
    assert_eq!(records.len(), 20);
    assert_eq!(session.failures.len(), 1);
    assert_eq!(session.failures[0].unit_id, 0);
    assert_eq!(stats.workers_failed, 1);
    assert_eq!(stats.units_abandoned, 0);
    // candidates handled before the failure were not fetched again
    assert_eq!(catalog.attempts_for(0), 1);
    assert_eq!(catalog.attempts_for(3), 2);
}

#[test]
fn every_worker_failing_abandons_reclaimed_units() {
    let catalog = ScriptedCatalog::new(|_, _| Err(FetchError::Fatal("gone".into())));
    let cfg = config(2, 10, None);
    let session = BatchCoordinator::new(&cfg, &catalog, hidden())
        .run(ranges(&[(0, 5), (5, 10), (10, 15)]), 2, 10)
        .unwrap();
    let (records, stats) = consolidate(&session);

    assert_eq!(session.stop_reason, StopReason::AllWorkersFailed);
    assert!(records.is_empty());
    assert_eq!(stats.workers_failed, 2);
    assert_eq!(stats.units_abandoned, 2);
}

#[test]
fn retries_never_exceed_limit() {
    let catalog = ScriptedCatalog::new(|id, _| {
        if id % 3 == 0 {
            Err(FetchError::Timeout)
        } else {
            Ok(listing(id))
        }
    });
    let cfg = config(2, 1_000, None);
    let session = BatchCoordinator::new(&cfg, &catalog, hidden())
        .run(ranges(&[(0, 12), (12, 24)]), 2, 1_000)
        .unwrap();
    let (records, stats) = consolidate(&session);

    for id in 0..24 {
        assert!(catalog.attempts_for(id) <= cfg.retry.retry_limit + 1, "id {id}");
    }
    assert_eq!(catalog.attempts_for(0), cfg.retry.retry_limit + 1);
    assert_eq!(records.len(), 16);
    assert_eq!(stats.totals.skipped, 8);
}

#[test]
fn abort_before_run_cancels() {
    let catalog = ScriptedCatalog::healthy();
    let cfg = config(2, 1_000, None);
    let coordinator = BatchCoordinator::new(&cfg, &catalog, hidden());
    coordinator.abort();
    let session = coordinator.run(ranges(&[(0, 1_000)]), 2, 1_000).unwrap();

    assert_eq!(session.stop_reason, StopReason::Cancelled);
    assert!(catalog.total_calls() < 1_000);
}

#[test]
fn resume_skips_checkpointed_candidates() {
    let dir = TempDir::new().unwrap();

    // First session stops at the target and leaves checkpoints behind
    let first = ScriptedCatalog::healthy();
    let cfg = config(1, 4, Some(dir.path()));
    let session = BatchCoordinator::new(&cfg, &first, hidden())
        .run(ranges(&[(0, 10)]), 1, 4)
        .unwrap();
    assert_eq!(session.stop_reason, StopReason::TargetReached);
    let first_calls = first.total_calls();
    assert!(first_calls >= 4);

    // Second session restores and finishes the range
    let restored = restore(dir.path()).unwrap();
    let restored_count = restored.records.len();
    assert!(restored_count >= 4);

    let second = ScriptedCatalog::healthy();
    let cfg = config(1, 100, Some(dir.path()));
    let session = BatchCoordinator::new(&cfg, &second, hidden())
        .with_restored(restored)
        .run(ranges(&[(0, 10)]), 1, 100)
        .unwrap();
    let (records, stats) = consolidate(&session);

    assert_eq!(records.len(), 10);
    assert_eq!(stats.restored, restored_count);
    assert_eq!(second.total_calls() + first_calls, 10);
    for id in 0..4 {
        assert_eq!(second.attempts_for(id), 0, "id {id} fetched twice");
    }
}

#[test]
fn checkpoint_files_written_per_worker() {
    let dir = TempDir::new().unwrap();
    let catalog = ScriptedCatalog::healthy();
    let cfg = config(2, 1_000, Some(dir.path()));
    let session = BatchCoordinator::new(&cfg, &catalog, hidden())
        .run(ranges(&[(0, 7), (7, 14)]), 2, 1_000)
        .unwrap();

    let session_dir = dir.path().join(&session.session_id);
    for worker in 0..2 {
        let path = session_dir.join(format!("worker_{worker:02}.json"));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["worker_id"], worker);
        assert_eq!(json["session_id"], session.session_id.as_str());
    }
}

#[test]
fn run_plans_from_history() {
    let dir = TempDir::new().unwrap();
    let catalog = ScriptedCatalog::healthy();
    let mut cfg = config(2, 5, Some(dir.path()));
    cfg.planner.prefix_digits = 3;
    cfg.planner.exploration_ranges = 0;
    cfg.planner.query.buckets.clear();

    // 1001 and 1002 cluster into [1000, 1010)
    let history = SuccessHistory::from_ids([1_001, 1_002]);
    let outcome = listharvest_collector::run(&cfg, &catalog, history, hidden()).unwrap();

    assert_eq!(outcome.stop_reason, StopReason::TargetReached);
    assert!(outcome.records.len() >= 5);
    assert!(
        outcome
            .records
            .iter()
            .all(|r| (1_000..1_010).contains(&r.numeric_id().unwrap()))
    );
}

/// Remembers when each worker thread made its first request
struct FirstCalls(Mutex<HashMap<ThreadId, Instant>>);

impl PageExtractor for FirstCalls {
    fn extract(&self, candidate: &Candidate) -> Result<Extraction, FetchError> {
        self.0
            .lock()
            .unwrap()
            .entry(std::thread::current().id())
            .or_insert_with(Instant::now);
        let Candidate::Identifier(id) = candidate else {
            return Ok(Extraction::NotFound);
        };
        Ok(listing(*id))
    }

    fn search(&self, _: &QueryDescriptor, _: u32) -> Result<Vec<String>, FetchError> {
        Ok(Vec::new())
    }
}

#[test]
fn worker_starts_are_staggered() {
    let catalog = FirstCalls(Mutex::new(HashMap::new()));
    let mut cfg = config(3, 1_000, None);
    cfg.workers.stagger_ms = 60;
    let session = BatchCoordinator::new(&cfg, &catalog, hidden())
        .run(ranges(&[(0, 10), (10, 20), (20, 30)]), 3, 1_000)
        .unwrap();
    assert_eq!(session.stop_reason, StopReason::UnitsExhausted);

    let mut starts: Vec<Instant> = catalog.0.lock().unwrap().values().copied().collect();
    starts.sort();
    assert_eq!(starts.len(), 3);
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(45), "gap {gap:?}");
    }
}
