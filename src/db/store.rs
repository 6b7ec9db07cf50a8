//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;
use super::PresenceStore;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- History ---

    /// Append one state-change record.
    pub fn append_history(&self, entry: &HistoryEntry) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO history (time, sensor, present, last_probe_at, last_webhook_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_db_time(entry.time),
                entry.sensor,
                entry.present,
                entry.last_probe_at.map(format_db_time),
                entry.last_webhook_at.map(format_db_time),
            ],
        )?;
        Ok(())
    }

    /// Get the latest history records for a sensor, newest first.
    pub fn get_history(&self, sensor: &str, limit: u32) -> Result<Vec<HistoryEntry>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT time, sensor, present, last_probe_at, last_webhook_at FROM history
             WHERE sensor = ?1 ORDER BY time DESC, id DESC LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![sensor, limit], |row| {
                let time_str: String = row.get(0)?;
                let time = parse_db_time(&time_str).unwrap_or_default();
                Ok(HistoryEntry {
                    time,
                    sensor: row.get(1)?,
                    present: row.get(2)?,
                    last_probe_at: row
                        .get::<_, Option<String>>(3)?
                        .and_then(|s| parse_db_time(&s)),
                    last_webhook_at: row
                        .get::<_, Option<String>>(4)?
                        .and_then(|s| parse_db_time(&s)),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(entries)
    }
}

impl PresenceStore for Store {
    fn get(&self, target: &str, signal: Signal) -> Result<Option<DateTime<Utc>>, DbError> {
        let conn = self.conn();
        let result: Option<String> = conn
            .query_row(
                "SELECT time FROM last_seen WHERE target = ?1 AND signal = ?2",
                params![target, signal.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(result.and_then(|s| parse_db_time(&s)))
    }

    fn set(&self, target: &str, signal: Signal, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO last_seen (target, signal, time) VALUES (?1, ?2, ?3)
             ON CONFLICT(target, signal) DO UPDATE SET time=excluded.time",
            params![target, signal.as_str(), format_db_time(at)],
        )?;
        Ok(())
    }
}

fn format_db_time(at: DateTime<Utc>) -> String {
    at.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
