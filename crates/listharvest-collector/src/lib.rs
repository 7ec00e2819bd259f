//! listharvest collector - parallel batch collection of catalog listings
//!
//! Plans work units from past successes, runs them on a fixed worker pool
//! with adaptive pacing and retry, and merges the shards into one
//! deduplicated, validated dataset.

pub mod config;
pub mod consolidate;
pub mod coordinator;
pub mod dedup;
pub mod extractor;
pub mod monitor;
pub mod planner;
pub mod record;
pub mod runner;
pub mod session;
pub mod state;
pub mod stats;
pub mod validator;
pub mod worker;

// Re-exports
pub use config::HarvestConfig;
pub use consolidate::consolidate;
pub use coordinator::BatchCoordinator;
pub use dedup::{Deduplicator, InsertOutcome, SignaturePolicy};
pub use extractor::{Extraction, HttpExtractor, PageExtractor, PageParser};
pub use monitor::{LogReportSink, ProgressMonitor, ProgressReport, ReportSink};
pub use planner::{PlannerConfig, SuccessHistory};
pub use record::{Candidate, RawRecord, ValidatedRecord};
pub use runner::{HarvestOutcome, run};
pub use session::{CollectionSession, Restored, StopReason, restore};
pub use state::{
    QueryDescriptor, SortOrder, TargetSpec, UnitStatus, ValueBucket, WorkUnit, WorkerState,
    WorkerStatus,
};
pub use stats::{NumericSummary, SessionStatistics};
pub use validator::{RejectionReason, ValidationConfig, Validator};
pub use worker::{BatchWorker, FatalWorkerError, UnitReport};
