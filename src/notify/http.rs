//! HTTP adapter sink that pushes state changes to the host framework.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::NotificationSink;
use crate::db::HistoryEntry;

const QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Serialize)]
struct StateUpdate {
    sensor: String,
    present: bool,
}

/// POSTs `{"sensor": ..., "present": ...}` to a configured URL.
///
/// Updates are delivered one at a time by a single worker, in publish order.
/// Failures are only logged.
pub struct HttpSink {
    tx: mpsc::Sender<StateUpdate>,
}

impl HttpSink {
    /// Must be called inside a tokio runtime; the worker is spawned here.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(run_publisher(rx, client, url.into()));

        Ok(Self { tx })
    }
}

impl NotificationSink for HttpSink {
    fn publish(&self, sensor: &str, present: bool) {
        let update = StateUpdate {
            sensor: sensor.to_string(),
            present,
        };
        if let Err(e) = self.tx.try_send(update) {
            tracing::warn!("Dropping update for {} -> {}: {}", sensor, present, e);
        }
    }

    fn append_history(&self, _entry: &HistoryEntry) {}
}

/// Send queued updates sequentially until every sender is gone.
async fn run_publisher(mut rx: mpsc::Receiver<StateUpdate>, client: Client, url: String) {
    while let Some(update) = rx.recv().await {
        let result = client
            .post(&url)
            .json(&update)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => tracing::debug!("Published {} -> {}", update.sensor, update.present),
            Err(e) => tracing::warn!(
                "Failed to publish {} -> {}: {}",
                update.sensor,
                update.present,
                e
            ),
        }
    }
}
