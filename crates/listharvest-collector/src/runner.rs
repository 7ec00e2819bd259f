//! Main execution logic: restore → plan → collect → consolidate

use anyhow::Context;
use listharvest_core::{CancellationFlag, SharedProgress, install_signal_handlers};

use crate::config::HarvestConfig;
use crate::consolidate::consolidate;
use crate::coordinator::BatchCoordinator;
use crate::extractor::PageExtractor;
use crate::planner::{self, SuccessHistory};
use crate::record::ValidatedRecord;
use crate::session::{self, Restored, StopReason};
use crate::stats::SessionStatistics;

/// Final dataset and statistics of one run
#[derive(Debug)]
pub struct HarvestOutcome {
    pub records: Vec<ValidatedRecord>,
    pub stats: SessionStatistics,
    pub stop_reason: StopReason,
}

/// Run one complete harvest session.
///
/// `history` seeds the planner; the configured history file and restored
/// checkpoint records extend it.
pub fn run(
    config: &HarvestConfig,
    extractor: &dyn PageExtractor,
    mut history: SuccessHistory,
    progress: SharedProgress,
) -> anyhow::Result<HarvestOutcome> {
    config.validate().context("Invalid configuration")?;
    if let Err(e) = install_signal_handlers() {
        log::warn!("Signal handlers not installed: {e}");
    }
    // Signals from here on cancel this session, including during restore and planning
    let cancel = CancellationFlag::new();

    log::info!(
        "listharvest starting: workers={}, target={}, batch_size={}",
        config.workers.count,
        config.collection.target_count,
        config.collection.batch_size
    );

    let restored = if config.checkpoint.enabled && config.checkpoint.resume {
        session::restore(&config.checkpoint.dir)?
    } else {
        Restored::default()
    };

    if let Some(path) = &config.planner.history_file {
        history.extend(SuccessHistory::load(path)?.ids());
    }
    history.extend(restored.history_ids());

    let units = planner::generate(
        &history,
        &config.planner,
        config.collection.target_count,
        config.collection.max_units,
    );

    let spinner = progress.stage_line("plan");
    spinner.finish_with_message(format!("{} units", units.len()));

    let session = BatchCoordinator::new(config, extractor, progress.clone())
        .with_restored(restored)
        .with_cancellation(cancel)
        .run(
            units,
            config.workers.count,
            config.collection.target_count,
        )?;

    let (records, stats) = consolidate(&session);
    if progress.is_tty() {
        stats.print();
    } else {
        stats.log();
    }

    match session.stop_reason {
        StopReason::AllWorkersFailed => {
            for failure in &session.failures {
                log::error!("{failure}");
            }
            log::error!("All workers failed; dataset is partial");
        }
        StopReason::Cancelled => log::warn!("Session cancelled; checkpoints kept for resume"),
        StopReason::UnitsExhausted if records.len() < session.target_count => log::warn!(
            "Work units exhausted before target: {} / {}",
            records.len(),
            session.target_count
        ),
        _ => {}
    }

    Ok(HarvestOutcome {
        records,
        stats,
        stop_reason: session.stop_reason,
    })
}
