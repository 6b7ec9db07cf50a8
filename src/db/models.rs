//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The two independent presence signals tracked per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Last successful reachability probe.
    Probe,
    /// Last committed webhook.
    Webhook,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Probe => "probe",
            Signal::Webhook => "webhook",
        }
    }
}

/// One recorded state change of a sensor, with the signals behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub time: DateTime<Utc>,
    pub sensor: String,
    pub present: bool,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_webhook_at: Option<DateTime<Utc>>,
}
