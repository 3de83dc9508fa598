//! Shared buffer for non-fatal sync anomalies.
//!
//! Broken links, per-file parse failures, and mixed embedding models are
//! warnings, not errors: the watcher and store push them here, and the next
//! tool response drains the buffer into a `_warnings` array.

use std::sync::{Arc, Mutex};

/// Cloneable handle to an in-memory warning buffer.
#[derive(Debug, Clone, Default)]
pub struct WarningBuffer {
    inner: Arc<Mutex<Vec<String>>>,
}

impl WarningBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning. Also mirrors it to the tracing log.
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "roux::sync", "{}", message);
        self.inner.lock().expect("warning buffer poisoned").push(message);
    }

    /// Take every accumulated warning, leaving the buffer empty.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.lock().expect("warning buffer poisoned"))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("warning buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
