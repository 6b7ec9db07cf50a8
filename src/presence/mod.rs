//! Presence reconciliation engine.
//!
//! Fuses active probes and debounced webhooks into one state per target and
//! derives the aggregate sensors from those states.

mod aggregate;
pub mod policy;
mod queue;
mod target;
#[cfg(test)]
pub mod testing;

pub use aggregate::*;
pub use queue::*;
pub use target::*;

use std::sync::Arc;

use crate::config::{AggregateConfig, TargetConfig};
use crate::db::PresenceStore;
use crate::notify::NotificationSink;
use crate::probe::ReachabilityProbe;

/// How the engine handled an incoming webhook. Never exposed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    Enqueued,
    Excluded,
    UnknownSensor,
}

/// All target engines, the aggregate sensors and the webhook queue.
pub struct Presence {
    engines: Vec<Arc<TargetEngine>>,
    aggregator: Arc<Aggregator>,
    queue: Arc<WebhookQueue>,
    sink: Arc<dyn NotificationSink>,
}

impl Presence {
    /// Build every engine, seeding each state from the persisted timestamps.
    pub fn new(
        targets: Vec<TargetConfig>,
        aggregates: AggregateConfig,
        store: Arc<dyn PresenceStore>,
        probe: Arc<dyn ReachabilityProbe>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let flags: Vec<Arc<PresenceFlag>> = targets
            .iter()
            .map(|t| Arc::new(PresenceFlag::new(TargetEngine::cold_start_state(t, store.as_ref()))))
            .collect();

        let aggregator = Arc::new(Aggregator::new(flags.clone(), aggregates, sink.clone()));

        let engines = targets
            .into_iter()
            .zip(flags)
            .map(|(config, flag)| {
                tracing::info!(
                    "Tracking {} ({}), initially {}",
                    config.name,
                    config.target,
                    if flag.get() { "present" } else { "absent" }
                );
                Arc::new(TargetEngine::new(
                    config,
                    flag,
                    store.clone(),
                    probe.clone(),
                    sink.clone(),
                    aggregator.clone(),
                ))
            })
            .collect();

        Self {
            engines,
            aggregator,
            queue: Arc::new(WebhookQueue::new()),
            sink,
        }
    }

    pub fn engines(&self) -> &[Arc<TargetEngine>] {
        &self.engines
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn queue(&self) -> &WebhookQueue {
        &self.queue
    }

    /// Look up a target by display name, ignoring case.
    pub fn find(&self, name: &str) -> Option<&Arc<TargetEngine>> {
        let name = name.to_lowercase();
        self.engines.iter().find(|e| e.name().to_lowercase() == name)
    }

    /// Hand a webhook event to the debounce queue.
    pub fn receive_webhook(&self, sensor: &str, new_state: bool) -> WebhookDisposition {
        let Some(engine) = self.find(sensor) else {
            tracing::debug!("Ignoring hook for unknown sensor {}", sensor);
            return WebhookDisposition::UnknownSensor;
        };

        match self.queue.enqueue(engine.clone(), new_state) {
            EnqueueOutcome::Scheduled { .. } => WebhookDisposition::Enqueued,
            EnqueueOutcome::Excluded => WebhookDisposition::Excluded,
        }
    }

    /// Publish the current state of every target and aggregate once.
    pub fn publish_snapshot(&self) {
        for engine in &self.engines {
            self.sink.publish(engine.name(), engine.is_present());
        }
        self.aggregator.publish_current();
    }
}
