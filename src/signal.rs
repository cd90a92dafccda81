//! Cooperative Ctrl+C cancellation.
//!
//! Ctrl+C sets a shared `AtomicBool`. Long-running work (walking, hashing,
//! the dedup session) polls the flag and stops at the next safe point: a
//! scan discards its uncommitted batch, a dedup session finishes the group
//! being applied and then ends as if aborted.
//!
//! ```rust,no_run
//! use dupler::signal::install_handler;
//!
//! let handler = install_handler().expect("Failed to install signal handler");
//! let shutdown_flag = handler.get_flag();
//! // Pass shutdown_flag to Scanner, Walker, Hasher, Workflow...
//! # let _ = shutdown_flag;
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandler {
    /// A handler with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether Ctrl+C was pressed or [`request_shutdown`](Self::request_shutdown) called.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown programmatically.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// A clone of the flag for worker threads.
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Clear the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Error installing the Ctrl+C hook.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// ctrlc refused the handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<ShutdownHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C hook and return its handler.
///
/// Calling this again returns the same handler with its flag reset. If
/// another hook is already registered (tests running in one process), an
/// unhooked handler is returned instead; it still honors
/// [`ShutdownHandler::request_shutdown`].
///
/// # Errors
///
/// Currently always succeeds; the `Result` leaves room for platforms where
/// a missing hook must be fatal.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = ShutdownHandler::new();
    let flag = handler.get_flag();

    let installed = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "\nInterrupted. Stopping at the next safe point...");
        let _ = stderr.flush();
        log::info!("Shutdown signal received");
    });

    match installed {
        Ok(()) => {
            let handler = GLOBAL_HANDLER.get_or_init(|| handler);
            Ok(handler.clone())
        }
        Err(e) => {
            log::debug!("Ctrl+C handler unavailable ({}), using unhooked handler", e);
            let handler = GLOBAL_HANDLER.get_or_init(ShutdownHandler::new);
            handler.reset();
            Ok(handler.clone())
        }
    }
}
