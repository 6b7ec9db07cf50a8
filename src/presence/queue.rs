//! Debounce queue for incoming webhook events.
//!
//! At most one pending event exists per target. A newer event for the same
//! target aborts and replaces the pending one, so only the last event of a
//! burst commits once the quiet period has passed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::TargetEngine;

struct Pending {
    new_state: bool,
    ticket: u64,
    task: JoinHandle<()>,
}

/// Result of handing an event to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Scheduled { commit_at: Instant },
    /// The target does not accept webhooks; the event was dropped.
    Excluded,
}

#[derive(Default)]
pub struct WebhookQueue {
    pending: Mutex<HashMap<String, Pending>>,
    next_ticket: AtomicU64,
}

impl WebhookQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `new_state` for `engine`, replacing any pending event for it.
    pub fn enqueue(self: &Arc<Self>, engine: Arc<TargetEngine>, new_state: bool) -> EnqueueOutcome {
        if engine.config().excluded_from_webhook {
            tracing::debug!("Ignoring hook for {}: excluded from webhooks", engine.name());
            return EnqueueOutcome::Excluded;
        }

        let key = engine.target().to_string();
        let debounce = engine.config().webhook_debounce;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let commit_at = Instant::now() + debounce;

        let mut pending = self.lock();
        if let Some(previous) = pending.remove(&key) {
            previous.task.abort();
            tracing::debug!(
                "Superseded pending hook for {} -> {}",
                key,
                previous.new_state
            );
        }

        let queue = Arc::clone(self);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(commit_at).await;
            // claimed under the target gate, so a newer event cannot commit in between
            engine.commit_webhook_if(|| queue.take(&task_key, ticket));
        });

        pending.insert(
            key,
            Pending {
                new_state,
                ticket,
                task,
            },
        );

        EnqueueOutcome::Scheduled { commit_at }
    }

    /// Remove the entry for `target` if it still belongs to `ticket`.
    ///
    /// A superseded timer that already woke up finds a newer ticket and backs off.
    fn take(&self, target: &str, ticket: u64) -> Option<bool> {
        let mut pending = self.lock();
        match pending.get(target) {
            Some(entry) if entry.ticket == ticket => pending.remove(target).map(|e| e.new_state),
            _ => None,
        }
    }

    /// State waiting to commit for `target`, if any.
    pub fn pending_state(&self, target: &str) -> Option<bool> {
        self.lock().get(target).map(|e| e.new_state)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop every pending event without committing it.
    pub fn clear(&self) {
        for (_, entry) in self.lock().drain() {
            entry.task.abort();
        }
    }
}
