//! Database module for PeopleSense.
//!
//! Provides the presence timestamp store and the state-change history.

#[cfg(test)]
mod memory;
mod models;
mod store;

#[cfg(test)]
pub use memory::*;
pub use models::*;
pub use store::*;

use chrono::{DateTime, Utc};

/// Durable last-seen timestamps, one independent key per target and signal.
///
/// Reads and writes are atomic per key; no cross-key transaction is offered.
pub trait PresenceStore: Send + Sync {
    fn get(&self, target: &str, signal: Signal) -> Result<Option<DateTime<Utc>>, DbError>;
    fn set(&self, target: &str, signal: Signal, at: DateTime<Utc>) -> Result<(), DbError>;
}
