//! Periodic progress sampling over published worker snapshots

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use listharvest_core::fmt_num;

use crate::state::{SnapshotBoard, WorkerCounts, WorkerStatus};

const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerLine {
    pub worker_id: usize,
    pub status: WorkerStatus,
    pub valid: usize,
    pub current_delay_ms: u64,
    pub success_rate: f64,
    pub current_unit: Option<usize>,
}

/// One aggregated sample
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub elapsed: Duration,
    pub totals: WorkerCounts,
    /// Valid records per second
    pub throughput: f64,
    pub workers: Vec<WorkerLine>,
}

impl ProgressReport {
    pub fn count_in(&self, status: WorkerStatus) -> usize {
        self.workers.iter().filter(|w| w.status == status).count()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} valid, {} rejected, {} dup | {:.2}/s | {} running, {} cooling, {} failed",
            fmt_num(self.totals.valid),
            fmt_num(self.totals.rejected),
            fmt_num(self.totals.duplicates + self.totals.near_duplicates),
            self.throughput,
            self.count_in(WorkerStatus::Running),
            self.count_in(WorkerStatus::CoolingDown),
            self.count_in(WorkerStatus::Failed),
        )
    }
}

/// Aggregate the current snapshots
pub fn sample(board: &SnapshotBoard, elapsed: Duration) -> ProgressReport {
    let mut totals = WorkerCounts::default();
    let workers = board
        .all()
        .iter()
        .map(|s| {
            totals.add(&s.counts);
            WorkerLine {
                worker_id: s.worker_id,
                status: s.status,
                valid: s.counts.valid,
                current_delay_ms: s.current_delay_ms,
                success_rate: s.success_rate,
                current_unit: s.current_unit,
            }
        })
        .collect();
    let secs = elapsed.as_secs_f64();
    let throughput = if secs > 0.0 {
        totals.valid as f64 / secs
    } else {
        0.0
    };
    ProgressReport {
        elapsed,
        totals,
        throughput,
        workers,
    }
}

/// Receives every periodic report
pub trait ReportSink: Send {
    fn report(&mut self, report: &ProgressReport);
}

/// Default sink: one info line per report
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn report(&mut self, report: &ProgressReport) {
        log::info!(
            "[{:.0}s] {}",
            report.elapsed.as_secs_f64(),
            report.summary_line()
        );
        for w in &report.workers {
            log::debug!(
                "worker_{:02}: {} {} valid, delay {}ms, ok {:.0}%, unit {:?}",
                w.worker_id,
                w.status,
                w.valid,
                w.current_delay_ms,
                w.success_rate * 100.0,
                w.current_unit
            );
        }
    }
}

/// Background sampling thread
pub struct ProgressMonitor {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<ProgressReport>,
}

impl ProgressMonitor {
    /// `line` shows the latest summary (hidden bar in non-TTY mode)
    pub fn spawn(
        board: Arc<SnapshotBoard>,
        interval: Duration,
        mut sink: Box<dyn ReportSink>,
        line: ProgressBar,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("progress-monitor".into())
            .spawn(move || {
                let started = Instant::now();
                let mut next = started + interval;
                while !flag.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    if now >= next {
                        let report = sample(&board, started.elapsed());
                        line.set_message(report.summary_line());
                        sink.report(&report);
                        next = now + interval;
                    }
                    std::thread::sleep(POLL.min(interval));
                }
                let report = sample(&board, started.elapsed());
                line.finish_and_clear();
                report
            })?;
        Ok(Self { stop, handle })
    }

    /// Stop sampling and return a last report
    pub fn stop(self) -> Option<ProgressReport> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().ok()
    }
}
