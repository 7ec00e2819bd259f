//! Worker pool supervision: unit assignment, work stealing, termination
//!
//! The coordinator loop and the workers share one rayon pool of
//! `workers + 1` threads. Each worker has a private assignment channel; all
//! of them report back over a single event channel. Dropping a worker's
//! assignment sender tells it to stop once its current unit is done.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use listharvest_core::{
    CancellationFlag, CheckpointStore, RateLimiter, SharedProgress, WorkQueue, clear_shutdown,
    is_shutdown_requested,
};

use crate::config::HarvestConfig;
use crate::extractor::PageExtractor;
use crate::monitor::{LogReportSink, ProgressMonitor, ReportSink};
use crate::session::{CollectionSession, Restored, StopReason, new_session_id};
use crate::state::{SnapshotBoard, WorkUnit, WorkerStatus};
use crate::validator::Validator;
use crate::worker::{BatchWorker, FatalWorkerError, UnitReport, WorkerOutput, WorkerShared};

/// Termination re-check interval while no event arrives
const TICK: Duration = Duration::from_millis(100);

type Assignment = (usize, WorkUnit);

enum Event {
    Finished {
        worker: usize,
        slot: usize,
        report: UnitReport,
    },
    Interrupted {
        worker: usize,
        slot: usize,
    },
    Failed {
        worker: usize,
        slot: usize,
        error: FatalWorkerError,
    },
    Exited {
        worker: usize,
    },
}

/// Coordinator-side view of one worker
struct Seat {
    assign: Option<Sender<Assignment>>,
    busy: Option<usize>,
    failed: bool,
}

impl Seat {
    fn is_idle(&self) -> bool {
        self.assign.is_some() && self.busy.is_none()
    }
}

pub struct BatchCoordinator<'a> {
    config: &'a HarvestConfig,
    extractor: &'a dyn PageExtractor,
    progress: SharedProgress,
    cancel: CancellationFlag,
    sink: Option<Box<dyn ReportSink>>,
    restored: Restored,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(
        config: &'a HarvestConfig,
        extractor: &'a dyn PageExtractor,
        progress: SharedProgress,
    ) -> Self {
        Self {
            config,
            extractor,
            progress,
            cancel: CancellationFlag::new(),
            sink: None,
            restored: Restored::default(),
        }
    }

    /// Start from checkpointed state instead of an empty deduplicator
    pub fn with_restored(mut self, restored: Restored) -> Self {
        self.restored = restored;
        self
    }

    /// Share an existing cancellation handle, e.g. one created before planning
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the default log sink for progress reports
    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Handle for cancelling a running session from another thread
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Run the pool until a stop condition holds. Blocks.
    pub fn run(
        self,
        units: Vec<WorkUnit>,
        worker_count: usize,
        target_count: usize,
    ) -> anyhow::Result<CollectionSession> {
        let worker_count = worker_count.max(1);
        let session_id = new_session_id();
        let started_at = chrono::Utc::now();
        let config = self.config;
        let Restored {
            dedup,
            records: restored,
            ..
        } = self.restored;

        log::info!(
            "{session_id}: {} units, {worker_count} workers, target {target_count} ({} restored)",
            units.len(),
            restored.len()
        );

        let store = if config.checkpoint.enabled {
            Some(
                CheckpointStore::open(&config.checkpoint.dir, &session_id).with_context(|| {
                    format!(
                        "Cannot create checkpoint directory under {}",
                        config.checkpoint.dir.display()
                    )
                })?,
            )
        } else {
            None
        };

        let queue = WorkQueue::new(units);
        let board = Arc::new(SnapshotBoard::new(worker_count));
        let validator = Validator::new(config.validation.clone(), config.dedup);
        let shared = WorkerShared {
            extractor: self.extractor,
            validator: &validator,
            dedup: &dedup,
            board: &board,
            checkpoints: store.as_ref(),
            cancel: &self.cancel,
            policy: config.retry.policy(),
            batch_size: config.collection.batch_size,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count + 1)
            .thread_name(|i| format!("harvest-{i}"))
            .build()
            .context("Failed to create thread pool")?;

        let sink = self.sink.unwrap_or_else(|| Box::new(LogReportSink));
        let monitor = ProgressMonitor::spawn(
            board.clone(),
            config.progress.interval(),
            sink,
            self.progress.stage_line("harvest"),
        )
        .context("Failed to spawn progress monitor")?;

        let outputs: Mutex<Vec<WorkerOutput>> = Mutex::new(Vec::new());
        let mut failures: Vec<FatalWorkerError> = Vec::new();
        let stagger = Duration::from_millis(config.workers.stagger_ms);

        let stop_reason = pool.install(|| {
            rayon::scope(|s| {
                let (events_tx, events_rx) = mpsc::channel::<Event>();
                let mut seats: Vec<Seat> = Vec::with_capacity(worker_count);

                for id in 0..worker_count {
                    if id > 0 && !stagger.is_zero() {
                        std::thread::sleep(stagger);
                    }
                    let (assign_tx, assign_rx) = mpsc::channel::<Assignment>();
                    let limiter = RateLimiter::new(
                        config.rate_limit.limiter_config(),
                        config.rate_limit.seed_for(id),
                    );
                    let pb = self.progress.worker_bar(id);
                    let events = events_tx.clone();
                    let shared = &shared;
                    let outputs = &outputs;
                    s.spawn(move |_| {
                        let worker = BatchWorker::new(id, shared, limiter, pb);
                        let output = worker_loop(worker, &assign_rx, &events);
                        outputs
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(output);
                        let _ = events.send(Event::Exited { worker: id });
                    });

                    let mut seat = Seat {
                        assign: Some(assign_tx),
                        busy: None,
                        failed: false,
                    };
                    assign_next(&queue, id, &mut seat);
                    seats.push(seat);
                }

                let reason = loop {
                    if let Some(reason) =
                        check_termination(&seats, &queue, &dedup, &self.cancel, target_count)
                    {
                        break reason;
                    }
                    match events_rx.recv_timeout(TICK) {
                        Ok(event) => {
                            apply_event(event, &queue, &mut seats, &mut failures);
                            for (id, seat) in seats.iter_mut().enumerate() {
                                if seat.is_idle() {
                                    assign_next(&queue, id, seat);
                                }
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break StopReason::UnitsExhausted,
                    }
                };

                log::info!("{session_id}: stopping ({reason})");
                if matches!(reason, StopReason::TargetReached | StopReason::Cancelled) {
                    self.cancel.cancel();
                }
                // Closing assignment channels lets every worker exit
                for seat in &mut seats {
                    seat.assign = None;
                }
                drop(events_tx);
                while let Ok(event) = events_rx.recv() {
                    apply_event(event, &queue, &mut seats, &mut failures);
                }
                reason
            })
        });

        // The signal was for this session; the next one starts clean
        if is_shutdown_requested() {
            clear_shutdown();
        }

        let last = monitor.stop();
        let abandoned_units = queue.abandon_reclaimed();
        if abandoned_units > 0 {
            log::warn!("{abandoned_units} units abandoned after worker failures");
        }

        let mut outputs = outputs.into_inner().unwrap_or_else(|e| e.into_inner());
        outputs.sort_by_key(|o| o.state.worker_id);
        let mut rejections: BTreeMap<String, usize> = BTreeMap::new();
        let mut shards = Vec::with_capacity(outputs.len());
        let mut workers = Vec::with_capacity(outputs.len());
        for output in outputs {
            for (reason, n) in output.rejections {
                *rejections.entry(reason).or_default() += n;
            }
            shards.push(output.shard);
            workers.push(output.state);
        }

        let units = queue
            .into_items()
            .into_iter()
            .map(|(mut unit, state)| {
                unit.status = state.status;
                unit.assigned = state.assignee;
                unit
            })
            .collect();

        if let Some(report) = last {
            log::info!("{session_id}: {}", report.summary_line());
        }

        Ok(CollectionSession {
            session_id,
            started_at,
            finished_at: chrono::Utc::now(),
            target_count,
            units,
            dedup,
            shards,
            restored,
            workers,
            rejections,
            failures,
            abandoned_units,
            stop_reason,
        })
    }
}

/// Execute assigned units until the channel closes or the worker fails
fn worker_loop(
    mut worker: BatchWorker<'_>,
    assignments: &Receiver<Assignment>,
    events: &Sender<Event>,
) -> WorkerOutput {
    let id = worker.id();
    while let Ok((slot, unit)) = assignments.recv() {
        match worker.execute(&unit) {
            Ok(report) if report.completed => {
                let _ = events.send(Event::Finished {
                    worker: id,
                    slot,
                    report,
                });
            }
            Ok(_) => {
                let _ = events.send(Event::Interrupted { worker: id, slot });
            }
            Err(error) => {
                let _ = events.send(Event::Failed {
                    worker: id,
                    slot,
                    error: error.clone(),
                });
                return worker.finish(WorkerStatus::Failed, Some(error));
            }
        }
    }
    worker.finish(WorkerStatus::Done, None)
}

fn assign_next(queue: &WorkQueue<WorkUnit>, worker: usize, seat: &mut Seat) {
    let Some(tx) = &seat.assign else {
        return;
    };
    let Some((slot, unit)) = queue.claim(worker) else {
        return;
    };
    log::debug!("worker_{worker:02}: assigned {unit}");
    if tx.send((slot, unit)).is_ok() {
        seat.busy = Some(slot);
    } else {
        queue.release(slot);
        seat.assign = None;
    }
}

fn apply_event(
    event: Event,
    queue: &WorkQueue<WorkUnit>,
    seats: &mut [Seat],
    failures: &mut Vec<FatalWorkerError>,
) {
    match event {
        Event::Finished {
            worker,
            slot,
            report,
        } => {
            queue.complete(slot);
            seats[worker].busy = None;
            log::debug!(
                "worker_{worker:02}: unit_{:04} finished ({} valid)",
                report.unit_id,
                report.valid
            );
        }
        Event::Interrupted { worker, slot } => {
            queue.release(slot);
            seats[worker].busy = None;
        }
        Event::Failed {
            worker,
            slot,
            error,
        } => {
            queue.reclaim(slot);
            let seat = &mut seats[worker];
            seat.busy = None;
            seat.assign = None;
            seat.failed = true;
            log::warn!("worker_{worker:02} retired; unit_{:04} requeued", error.unit_id);
            failures.push(error);
        }
        Event::Exited { worker } => {
            let seat = &mut seats[worker];
            seat.assign = None;
            seat.busy = None;
        }
    }
}

fn check_termination(
    seats: &[Seat],
    queue: &WorkQueue<WorkUnit>,
    dedup: &crate::dedup::Deduplicator,
    cancel: &CancellationFlag,
    target_count: usize,
) -> Option<StopReason> {
    if dedup.accepted() >= target_count {
        return Some(StopReason::TargetReached);
    }
    if cancel.is_cancelled() {
        return Some(StopReason::Cancelled);
    }
    if seats.iter().all(|s| s.failed) {
        return Some(StopReason::AllWorkersFailed);
    }
    let live_idle = seats
        .iter()
        .filter(|s| !s.failed)
        .all(|s| s.busy.is_none());
    if queue.pending() == 0 && live_idle {
        return Some(StopReason::UnitsExhausted);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(busy: Option<usize>, failed: bool) -> (Seat, Receiver<Assignment>) {
        let (tx, rx) = mpsc::channel();
        let seat = Seat {
            assign: if failed { None } else { Some(tx) },
            busy,
            failed,
        };
        (seat, rx)
    }

    #[test]
    fn termination_order() {
        let queue: WorkQueue<WorkUnit> = WorkQueue::new(Vec::new());
        let dedup = crate::dedup::Deduplicator::new();
        let cancel = CancellationFlag::new();

        let seats = vec![seat(None, false).0];
        assert_eq!(
            check_termination(&seats, &queue, &dedup, &cancel, 10),
            Some(StopReason::UnitsExhausted)
        );

        let seats = vec![seat(Some(0), false).0];
        assert_eq!(check_termination(&seats, &queue, &dedup, &cancel, 10), None);

        let seats = vec![seat(None, true).0, seat(None, true).0];
        assert_eq!(
            check_termination(&seats, &queue, &dedup, &cancel, 10),
            Some(StopReason::AllWorkersFailed)
        );

        dedup.try_insert("a", "");
        assert_eq!(
            check_termination(&seats, &queue, &dedup, &cancel, 1),
            Some(StopReason::TargetReached)
        );
    }

    #[test]
    fn failed_event_reclaims_unit() {
        use crate::state::TargetSpec;
        use crate::worker::FatalCause;

        let queue = WorkQueue::new(vec![WorkUnit::new(
            0,
            TargetSpec::IdRange { start: 0, end: 1 },
            1,
        )]);
        let (first, _rx0) = seat(None, false);
        let (second, rx1) = seat(None, false);
        let mut seats = vec![first, second];
        assign_next(&queue, 0, &mut seats[0]);
        assert_eq!(seats[0].busy, Some(0));

        let mut failures = Vec::new();
        let error = FatalWorkerError {
            worker_id: 0,
            unit_id: 0,
            cause: FatalCause::RetriesExhausted { streak: 3 },
        };
        apply_event(
            Event::Failed {
                worker: 0,
                slot: 0,
                error,
            },
            &queue,
            &mut seats,
            &mut failures,
        );
        assert!(seats[0].failed);
        assert_eq!(failures.len(), 1);
        assert_eq!(queue.pending(), 1);

        // the dead seat no longer takes work; the idle one steals it
        assign_next(&queue, 0, &mut seats[0]);
        assert_eq!(queue.pending(), 1);
        assign_next(&queue, 1, &mut seats[1]);
        assert_eq!(seats[1].busy, Some(0));
        assert_eq!(queue.state(0).unwrap().assignee, Some(1));
        assert_eq!(rx1.try_recv().map(|(slot, _)| slot), Ok(0));
    }
}
