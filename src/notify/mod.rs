//! Notification sinks: where committed state changes are published.
//!
//! Sinks are fire-and-forget. The engine never waits on them and never sees
//! their failures.

mod http;

pub use http::*;

use std::sync::Arc;

use crate::db::{HistoryEntry, Store};

/// Boundary towards the host automation framework and the history log.
pub trait NotificationSink: Send + Sync {
    /// A target or aggregate sensor has a new externally visible state.
    fn publish(&self, sensor: &str, present: bool);

    /// Record a committed state change for audit.
    fn append_history(&self, entry: &HistoryEntry);
}

/// Appends history records to the SQLite store.
pub struct HistorySink {
    store: Arc<Store>,
}

impl HistorySink {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl NotificationSink for HistorySink {
    fn publish(&self, _sensor: &str, _present: bool) {}

    fn append_history(&self, entry: &HistoryEntry) {
        if let Err(e) = self.store.append_history(entry) {
            tracing::error!("Failed to append history for {}: {}", entry.sensor, e);
        }
    }
}

/// Forwards every call to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn publish(&self, sensor: &str, present: bool) {
        for sink in &self.sinks {
            sink.publish(sensor, present);
        }
    }

    fn append_history(&self, entry: &HistoryEntry) {
        for sink in &self.sinks {
            sink.append_history(entry);
        }
    }
}
