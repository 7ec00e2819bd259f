//! listharvest core - shared infrastructure for catalog harvesting
//!
//! Worker-agnostic building blocks: fetch errors and their classification,
//! retry policy, adaptive rate limiting, the shared work queue, checkpoint
//! files, hashing, logging and progress display.

pub mod checkpoint;
pub mod error;
pub mod fetch;
pub mod hash;
pub mod logging;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod shutdown;
pub mod work_queue;

// Re-exports for convenience
pub use checkpoint::{Checkpoint, CheckpointStore, cleanup_tmp_files};
pub use error::{ErrorKind, FetchError, classify};
pub use fetch::{SHARED_RUNTIME, fetch_text, http_client};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num, fmt_secs};
pub use rate_limit::{Outcome, RateLimitConfig, RateLimiter};
pub use retry::{RetryDecision, RetryPolicy};
pub use shutdown::{
    CancellationFlag, clear_shutdown, install_signal_handlers, is_shutdown_requested,
    request_shutdown,
};
pub use work_queue::{SlotState, SlotStatus, WorkQueue};
