//! In-memory presence store used by tests.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{DbError, PresenceStore, Signal};

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(String, Signal), DateTime<Utc>>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DbError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        Ok(())
    }
}

impl PresenceStore for MemoryStore {
    fn get(&self, target: &str, signal: Signal) -> Result<Option<DateTime<Utc>>, DbError> {
        self.check()?;
        let values = self.values.lock().unwrap();
        Ok(values.get(&(target.to_string(), signal)).copied())
    }

    fn set(&self, target: &str, signal: Signal, at: DateTime<Utc>) -> Result<(), DbError> {
        self.check()?;
        let mut values = self.values.lock().unwrap();
        values.insert((target.to_string(), signal), at);
        Ok(())
    }
}
