//! Graceful shutdown support via atomic flags

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Global shutdown flag, set by the SIGTERM/SIGINT handler
fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Number of shutdown requests since process start
fn requests() -> &'static AtomicUsize {
    static REQUESTS: AtomicUsize = AtomicUsize::new(0);
    &REQUESTS
}

/// Check if shutdown was requested and not yet cleared
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Request shutdown. Returns true if one was already pending.
pub fn request_shutdown() -> bool {
    requests().fetch_add(1, Ordering::Relaxed);
    shutdown_flag().swap(true, Ordering::Relaxed)
}

/// Mark the pending shutdown as handled; the next signal counts as a first one.
pub fn clear_shutdown() {
    shutdown_flag().store(false, Ordering::Relaxed);
}

/// Install SIGTERM/SIGINT handlers once per process; later calls are no-ops.
///
/// First signal: set graceful shutdown flag.
/// Second signal: exit immediately with 130.
pub fn install_signal_handlers() -> std::io::Result<()> {
    static INSTALLED: Mutex<bool> = Mutex::new(false);
    let mut installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    if *installed {
        return Ok(());
    }
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        // SAFETY: atomic fetch_add/swap and process::exit are async-signal-safe
        unsafe {
            signal_hook::low_level::register(signal, || {
                if request_shutdown() {
                    std::process::exit(130);
                }
            })?;
        }
    }
    *installed = true;
    Ok(())
}

/// Cooperative cancellation shared by one session's workers.
///
/// Also reports cancelled once a shutdown is requested after the flag was
/// created; requests from before that belong to an earlier session.
#[derive(Debug, Clone)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
    baseline: usize,
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            baseline: requests().load(Ordering::Relaxed),
        }
    }
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || requests().load(Ordering::Relaxed) > self.baseline
    }
}
