//! Progress events and the listener registry.
//!
//! Listeners are invoked on the scheduler task, never on the tasks that
//! drain the child's pipes, so a slow listener cannot create
//! backpressure on the OS pipe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Classification of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressEventKind {
    /// A stage is running; `percent` is the current global progress.
    Installing,
    /// The whole pipeline finished; emitted exactly once at 100.
    Complete,
    /// The pipeline failed; `percent` is the last value reached.
    Error,
}

/// One normalized progress event on the global 0-100 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub kind: ProgressEventKind,
    pub percent: u8,
    pub message: String,
    /// RFC 3339 local timestamp.
    pub timestamp: String,
}

impl ProgressEvent {
    fn new(stage: &str, kind: ProgressEventKind, percent: u8, message: &str) -> Self {
        Self {
            stage: stage.to_string(),
            kind,
            percent,
            message: message.to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn installing(stage: &str, percent: u8, message: &str) -> Self {
        Self::new(stage, ProgressEventKind::Installing, percent, message)
    }

    pub fn complete(stage: &str, message: &str) -> Self {
        Self::new(stage, ProgressEventKind::Complete, 100, message)
    }

    pub fn error(stage: &str, percent: u8, message: &str) -> Self {
        Self::new(stage, ProgressEventKind::Error, percent, message)
    }
}

type Listener = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Multi-listener progress fan-out.
#[derive(Clone, Default)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener. Dropping the returned subscription detaches it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Box::new(listener)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn emit(&self, event: &ProgressEvent) {
        for (_, listener) in self.inner.listeners.lock().iter() {
            listener(event);
        }
    }
}

/// Guard for one attached listener; detaches on drop.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Detach the listener now (equivalent to dropping the guard).
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
