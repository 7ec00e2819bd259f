//! Batch worker: expands one work unit into candidates and collects them
//!
//! Per candidate: wait out the rate-limiter delay, extract, validate, then
//! pass through the shared deduplicator. Failures are classified and the
//! retry policy decides between backoff, cooldown, skip and abort.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use listharvest_core::{
    CancellationFlag, CheckpointStore, ErrorKind, FetchError, Outcome, RateLimiter,
    RetryDecision, RetryPolicy, classify, fmt_num, fmt_secs,
};

use crate::dedup::{Deduplicator, InsertOutcome};
use crate::extractor::{Extraction, PageExtractor};
use crate::record::{Candidate, ValidatedRecord};
use crate::state::{SnapshotBoard, TargetSpec, WorkUnit, WorkerState, WorkerStatus};
use crate::validator::Validator;

/// Longest uninterrupted sleep; cancellation is polled in between
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Session-wide collaborators shared by every worker
pub struct WorkerShared<'a> {
    pub extractor: &'a dyn PageExtractor,
    pub validator: &'a Validator,
    pub dedup: &'a Deduplicator,
    pub board: &'a SnapshotBoard,
    pub checkpoints: Option<&'a CheckpointStore>,
    pub cancel: &'a CancellationFlag,
    pub policy: RetryPolicy,
    /// Processed candidates between checkpoints
    pub batch_size: usize,
}

/// Why a worker stopped for good
#[derive(Debug, Clone, PartialEq)]
pub enum FatalCause {
    /// Error classified as fatal
    Unrecoverable(FetchError),
    /// Too many consecutive candidates ran out of retries
    RetriesExhausted { streak: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FatalWorkerError {
    pub worker_id: usize,
    pub unit_id: usize,
    pub cause: FatalCause,
}

impl std::fmt::Display for FatalWorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "worker_{:02} failed on unit_{:04}: ",
            self.worker_id, self.unit_id
        )?;
        match &self.cause {
            FatalCause::Unrecoverable(e) => write!(f, "unrecoverable error: {e}"),
            FatalCause::RetriesExhausted { streak } => {
                write!(f, "{streak} consecutive candidates exhausted their retries")
            }
        }
    }
}

impl std::error::Error for FatalWorkerError {}

/// Outcome of one executed unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub unit_id: usize,
    /// False when cancellation stopped the unit early
    pub completed: bool,
    /// Records accepted during this unit
    pub valid: usize,
    /// Candidates handled during this unit
    pub processed: usize,
    pub elapsed: Duration,
}

/// Everything a worker leaves behind when it stops
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub state: WorkerState,
    pub shard: Vec<ValidatedRecord>,
    /// Rejections by reason label
    pub rejections: BTreeMap<String, usize>,
    pub error: Option<FatalWorkerError>,
}

enum Attempt<T> {
    Done(T),
    /// Mismatch or retries exhausted; counters already updated
    Skipped,
    Cancelled,
}

type AttemptResult<T> = Result<Attempt<T>, FatalCause>;

pub struct BatchWorker<'a> {
    id: usize,
    shared: &'a WorkerShared<'a>,
    limiter: RateLimiter,
    state: WorkerState,
    shard: Vec<ValidatedRecord>,
    processed: Vec<String>,
    since_checkpoint: usize,
    pending_delay: Duration,
    exhausted_streak: u32,
    rejections: BTreeMap<String, usize>,
    pb: ProgressBar,
}

impl<'a> BatchWorker<'a> {
    pub fn new(
        id: usize,
        shared: &'a WorkerShared<'a>,
        mut limiter: RateLimiter,
        pb: ProgressBar,
    ) -> Self {
        let pending_delay = limiter.initial_delay();
        let mut state = WorkerState::new(id);
        state.current_delay_ms = limiter.current_delay().as_millis() as u64;
        Self {
            id,
            shared,
            limiter,
            state,
            shard: Vec::new(),
            processed: Vec::new(),
            since_checkpoint: 0,
            pending_delay,
            exhausted_streak: 0,
            rejections: BTreeMap::new(),
            pb,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Run one unit to completion, cancellation, or fatal failure
    pub fn execute(&mut self, unit: &WorkUnit) -> Result<UnitReport, FatalWorkerError> {
        let start = Instant::now();
        let valid_before = self.state.counts.valid;
        let processed_before = self.processed.len();

        self.state.current_unit = Some(unit.id);
        self.set_status(WorkerStatus::Running);
        self.pb.set_message(unit.to_string());
        log::debug!("worker_{:02}: starting {unit}", self.id);

        let result = match &unit.target {
            TargetSpec::IdRange { start, end } => self.run_range(*start, *end),
            TargetSpec::Query(query) => self.run_query(unit, query),
        };

        self.flush_checkpoint();
        let elapsed = start.elapsed();
        let valid = self.state.counts.valid - valid_before;
        let processed = self.processed.len() - processed_before;

        match result {
            Ok(completed) => {
                self.state.current_unit = None;
                if completed {
                    self.state.units_done += 1;
                    self.set_status(WorkerStatus::Idle);
                    log::info!(
                        "worker_{:02}: {unit}: {} valid / {} processed [{}]",
                        self.id,
                        fmt_num(valid),
                        fmt_num(processed),
                        fmt_secs(elapsed)
                    );
                } else {
                    self.publish();
                    log::info!("worker_{:02}: {unit} interrupted", self.id);
                }
                Ok(UnitReport {
                    unit_id: unit.id,
                    completed,
                    valid,
                    processed,
                    elapsed,
                })
            }
            Err(cause) => {
                let err = FatalWorkerError {
                    worker_id: self.id,
                    unit_id: unit.id,
                    cause,
                };
                self.state.current_unit = None;
                self.set_status(WorkerStatus::Failed);
                log::error!("{err}");
                Err(err)
            }
        }
    }

    /// Stop the worker, returning its shard and final state
    pub fn finish(mut self, status: WorkerStatus, error: Option<FatalWorkerError>) -> WorkerOutput {
        self.set_status(status);
        self.pb.finish_and_clear();
        WorkerOutput {
            state: self.state,
            shard: self.shard,
            rejections: self.rejections,
            error,
        }
    }

    /// `Ok(false)` when cancelled before the range was exhausted
    fn run_range(&mut self, start: u64, end: u64) -> Result<bool, FatalCause> {
        for id in start..end {
            if self.shared.cancel.is_cancelled() {
                return Ok(false);
            }
            if !self.process(Candidate::Identifier(id))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn run_query(
        &mut self,
        unit: &WorkUnit,
        query: &crate::state::QueryDescriptor,
    ) -> Result<bool, FatalCause> {
        let extractor = self.shared.extractor;
        for page in 1..=query.max_pages {
            if self.shared.cancel.is_cancelled() {
                return Ok(false);
            }
            let refs = match self.attempt(|| extractor.search(query, page))? {
                Attempt::Done(refs) => refs,
                Attempt::Skipped => {
                    log::debug!("worker_{:02}: {unit} page {page} skipped", self.id);
                    continue;
                }
                Attempt::Cancelled => return Ok(false),
            };
            if refs.is_empty() {
                log::debug!("worker_{:02}: {unit} ends at page {page}", self.id);
                break;
            }
            for reference in refs {
                if self.shared.cancel.is_cancelled() {
                    return Ok(false);
                }
                if !self.process(Candidate::Listing(reference))? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Handle one candidate. `Ok(false)` when cancelled mid-candidate.
    fn process(&mut self, candidate: Candidate) -> Result<bool, FatalCause> {
        let key = candidate.key();
        let dedup = self.shared.dedup;
        if dedup.was_processed(&key) {
            self.state.counts.resumed += 1;
            return Ok(true);
        }

        let extractor = self.shared.extractor;
        match self.attempt(|| extractor.extract(&candidate))? {
            Attempt::Done(Extraction::Found(raw)) => match self.shared.validator.validate(&raw) {
                Ok(record) => match dedup.check_insert(&record.canonical_key, &record.signature) {
                    InsertOutcome::Inserted => {
                        self.state.counts.valid += 1;
                        self.shard.push(record);
                        self.pb.inc(1);
                    }
                    InsertOutcome::DuplicateKey => {
                        log::debug!("worker_{:02}: {candidate}: duplicate", self.id);
                        self.state.counts.duplicates += 1;
                    }
                    InsertOutcome::NearDuplicate => {
                        log::debug!("worker_{:02}: {candidate}: near duplicate", self.id);
                        self.state.counts.near_duplicates += 1;
                    }
                },
                Err(reason) => {
                    log::debug!("worker_{:02}: {candidate}: rejected ({reason})", self.id);
                    self.state.counts.rejected += 1;
                    *self.rejections.entry(reason.label().to_string()).or_default() += 1;
                }
            },
            Attempt::Done(Extraction::NotFound) => self.state.counts.not_found += 1,
            Attempt::Skipped => {}
            Attempt::Cancelled => return Ok(false),
        }

        dedup.mark_processed(&key);
        self.processed.push(key);
        self.since_checkpoint += 1;
        if self.since_checkpoint >= self.shared.batch_size.max(1) {
            self.flush_checkpoint();
        }
        self.publish();
        Ok(true)
    }

    /// Run `op` under the rate limiter and retry policy
    fn attempt<T>(&mut self, mut op: impl FnMut() -> Result<T, FetchError>) -> AttemptResult<T> {
        let mut retries = 0u32;
        loop {
            if !self.pause(self.pending_delay) {
                return Ok(Attempt::Cancelled);
            }
            self.state.counts.attempted += 1;

            let err = match op() {
                Ok(value) => {
                    self.pending_delay = self.limiter.next_delay(Outcome::Success);
                    self.exhausted_streak = 0;
                    self.note_delay();
                    return Ok(Attempt::Done(value));
                }
                Err(e) => e,
            };

            let kind = classify(&err);
            self.pending_delay = self.limiter.next_delay(Outcome::Failure);
            self.state.last_error = Some(kind);
            self.note_delay();
            log::debug!("worker_{:02}: {kind}: {err}", self.id);

            match self.shared.policy.should_retry(kind, retries) {
                RetryDecision::Retry(backoff) => {
                    retries += 1;
                    self.state.counts.retried += 1;
                    self.publish();
                    if !self.pause(backoff) {
                        return Ok(Attempt::Cancelled);
                    }
                }
                RetryDecision::Cooldown(cooldown) => {
                    retries += 1;
                    self.state.counts.retried += 1;
                    self.limiter.force_slowdown();
                    self.note_delay();
                    self.set_status(WorkerStatus::CoolingDown);
                    log::warn!(
                        "worker_{:02}: rate limited, cooling down {:.1}s",
                        self.id,
                        cooldown.as_secs_f64()
                    );
                    let resumed = self.pause(cooldown);
                    self.set_status(WorkerStatus::Running);
                    if !resumed {
                        return Ok(Attempt::Cancelled);
                    }
                }
                RetryDecision::Skip => {
                    self.state.counts.mismatched += 1;
                    return Ok(Attempt::Skipped);
                }
                RetryDecision::GiveUp => {
                    self.state.counts.skipped += 1;
                    self.exhausted_streak += 1;
                    log::warn!(
                        "worker_{:02}: giving up after {retries} retries ({kind})",
                        self.id
                    );
                    if self.shared.policy.exhausted_is_fatal(self.exhausted_streak) {
                        return Err(FatalCause::RetriesExhausted {
                            streak: self.exhausted_streak,
                        });
                    }
                    return Ok(Attempt::Skipped);
                }
                RetryDecision::Abort => {
                    debug_assert_eq!(kind, ErrorKind::Fatal);
                    return Err(FatalCause::Unrecoverable(err));
                }
            }
        }
    }

    /// Sleep for `d`, waking early on cancellation. Returns false if cancelled.
    fn pause(&self, d: Duration) -> bool {
        let deadline = Instant::now() + d;
        loop {
            if self.shared.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn flush_checkpoint(&mut self) {
        self.since_checkpoint = 0;
        let Some(store) = self.shared.checkpoints else {
            return;
        };
        if let Err(e) = store.write(self.id, &self.processed, &self.shard) {
            log::warn!("worker_{:02}: checkpoint write failed: {e}", self.id);
        }
    }

    fn note_delay(&mut self) {
        self.state.current_delay_ms = self.limiter.current_delay().as_millis() as u64;
        self.state.success_rate = self.limiter.success_rate();
    }

    fn set_status(&mut self, status: WorkerStatus) {
        self.state.transition(status);
        self.publish();
    }

    fn publish(&self) {
        self.shared.board.publish(self.state.clone());
    }
}
