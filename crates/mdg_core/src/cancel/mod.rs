//! Cancellation with graceful-then-forced process-tree termination.
//!
//! The controller owns a slot for the currently-live process handle.
//! `CancelHandle::cancel()` is idempotent and returns immediately: it
//! flips the flag, asks the live tree to terminate, and arms a watchdog
//! that force-kills the tree if the grace period expires. The scheduler
//! observes the resulting exit through the normal exit path and reports
//! the run as cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::runner::ProcessHandle;

/// Default grace period between graceful and forced termination.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

struct CancelInner {
    requested: AtomicBool,
    active: Mutex<Option<ProcessHandle>>,
    grace: Duration,
}

impl CancelInner {
    fn kill_active(&self) {
        let handle = match *self.active.lock() {
            Some(handle) => handle,
            None => return,
        };
        tracing::info!(pid = handle.pid(), "Cancellation: terminating process tree");
        handle.terminate_tree();

        let grace = self.grace;
        std::thread::spawn(move || {
            std::thread::sleep(grace);
            if handle.is_alive() {
                tracing::warn!(
                    pid = handle.pid(),
                    "Grace period expired, force-killing process tree"
                );
                handle.kill_tree();
            }
        });
    }
}

/// Owns the live process slot for one pipeline instance.
pub struct CancellationController {
    inner: Arc<CancelInner>,
}

impl CancellationController {
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                requested: AtomicBool::new(false),
                active: Mutex::new(None),
                grace,
            }),
        }
    }

    /// Get a cancellation handle for callers outside the scheduler.
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Register the handle of a freshly-spawned stage process.
    ///
    /// If cancellation was already requested, the new process is killed
    /// right away so a cancel between stages cannot leak a child.
    pub(crate) fn register(&self, handle: ProcessHandle) {
        *self.inner.active.lock() = Some(handle);
        if self.is_requested() {
            self.inner.kill_active();
        }
    }

    /// Clear the slot once the stage process has exited.
    pub(crate) fn clear(&self) {
        *self.inner.active.lock() = None;
    }
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

/// Handle for cancelling a running pipeline.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    /// Request cancellation.
    ///
    /// Idempotent and asynchronous relative to stage execution: the call
    /// returns immediately and the cancelled terminal state is observed
    /// later through the normal exit path. Calling after completion, or
    /// repeatedly, is a no-op.
    pub fn cancel(&self) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.kill_active();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }
}
