//! Per-target presence state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::policy;
use super::Aggregator;
use crate::config::TargetConfig;
use crate::db::{HistoryEntry, PresenceStore, Signal};
use crate::notify::NotificationSink;
use crate::probe::ReachabilityProbe;

/// Last published presence of one target.
///
/// Readable from anywhere; written only by [`TargetEngine`] transitions.
#[derive(Debug, Default)]
pub struct PresenceFlag(AtomicBool);

impl PresenceFlag {
    pub fn new(present: bool) -> Self {
        Self(AtomicBool::new(present))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, present: bool) {
        self.0.store(present, Ordering::SeqCst);
    }
}

/// What a single heartbeat did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A fresh webhook took precedence; nothing was probed.
    Suppressed,
    /// The target could not be resolved to an address this cycle.
    Unresolved,
    /// The probe ran. `confirmed` tells whether its result was allowed to
    /// drive the state.
    Completed { reachable: bool, confirmed: bool },
}

/// Owns the presence state of one tracked target.
pub struct TargetEngine {
    config: TargetConfig,
    present: Arc<PresenceFlag>,
    /// Serializes probe completion, webhook commit and transitions.
    gate: Mutex<()>,
    store: Arc<dyn PresenceStore>,
    probe: Arc<dyn ReachabilityProbe>,
    sink: Arc<dyn NotificationSink>,
    aggregator: Arc<Aggregator>,
}

impl TargetEngine {
    pub fn new(
        config: TargetConfig,
        present: Arc<PresenceFlag>,
        store: Arc<dyn PresenceStore>,
        probe: Arc<dyn ReachabilityProbe>,
        sink: Arc<dyn NotificationSink>,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            config,
            present,
            gate: Mutex::new(()),
            store,
            probe,
            sink,
            aggregator,
        }
    }

    /// State a target starts with, computed from persisted timestamps.
    pub fn cold_start_state(config: &TargetConfig, store: &dyn PresenceStore) -> bool {
        let last_probe = read_signal(store, &config.target, Signal::Probe);
        policy::is_active(last_probe, config.threshold, Utc::now())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn target(&self) -> &str {
        &self.config.target
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// Cached state, as last published.
    pub fn is_present(&self) -> bool {
        self.present.get()
    }

    pub fn last_probe_at(&self) -> Option<DateTime<Utc>> {
        read_signal(self.store.as_ref(), &self.config.target, Signal::Probe)
    }

    pub fn last_webhook_at(&self) -> Option<DateTime<Utc>> {
        read_signal(self.store.as_ref(), &self.config.target, Signal::Webhook)
    }

    pub fn is_active(&self) -> bool {
        policy::is_active(self.last_probe_at(), self.config.threshold, Utc::now())
    }

    pub fn webhook_is_stale(&self) -> bool {
        policy::webhook_is_stale(self.last_webhook_at(), self.config.threshold, Utc::now())
    }

    pub fn probe_confirms_after_webhook(&self) -> bool {
        policy::probe_confirms_after_webhook(self.last_probe_at(), self.last_webhook_at())
    }

    fn should_probe(&self) -> bool {
        policy::should_probe(
            self.config.precedence,
            self.last_webhook_at(),
            self.config.threshold,
            Utc::now(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one heartbeat: resolve, probe, and reconcile the result.
    pub async fn probe_once(&self) -> ProbeOutcome {
        if !self.should_probe() {
            tracing::debug!("Skipping probe for {}: webhook is fresh", self.config.target);
            return ProbeOutcome::Suppressed;
        }

        let address = match self.probe.resolve(&self.config).await {
            Ok(address) => address,
            Err(e) => {
                tracing::debug!("Skipping probe for {}: {}", self.config.target, e);
                return ProbeOutcome::Unresolved;
            }
        };

        let started_at = Utc::now();
        let reachable = self
            .probe
            .probe(&address, self.config.use_arp, self.config.probe_timeout)
            .await;

        let _gate = self.lock();

        // a webhook may have committed while the probe was in flight
        if !self.should_probe() {
            return ProbeOutcome::Suppressed;
        }

        if reachable {
            if let Err(e) = self.store.set(&self.config.target, Signal::Probe, started_at) {
                tracing::error!("Failed to record probe for {}: {}", self.config.target, e);
            }
        }

        let confirmed = self.probe_confirms_after_webhook();
        if confirmed {
            let active = self.is_active();
            self.transition(active);
        }

        ProbeOutcome::Completed {
            reachable,
            confirmed,
        }
    }

    /// Record a debounced webhook and apply the state it asserts.
    pub fn commit_webhook(&self, new_state: bool) {
        let _gate = self.lock();
        self.record_webhook(new_state);
    }

    /// Commit the state returned by `claim`, if any, with `claim` itself
    /// running under the gate.
    pub fn commit_webhook_if(&self, claim: impl FnOnce() -> Option<bool>) -> Option<bool> {
        let _gate = self.lock();
        let new_state = claim()?;
        tracing::info!("Running hook for {} -> {}", self.config.target, new_state);
        self.record_webhook(new_state);
        Some(new_state)
    }

    fn record_webhook(&self, new_state: bool) {
        if let Err(e) = self.store.set(&self.config.target, Signal::Webhook, Utc::now()) {
            tracing::error!("Failed to record webhook for {}: {}", self.config.target, e);
        }
        self.transition(new_state);
    }

    /// Move to `new_state`, publishing only when it differs.
    ///
    /// Returns whether the state changed.
    pub fn apply_state_transition(&self, new_state: bool) -> bool {
        let _gate = self.lock();
        self.transition(new_state)
    }

    fn transition(&self, new_state: bool) -> bool {
        if self.present.get() == new_state {
            return false;
        }
        self.present.set(new_state);

        self.sink.publish(&self.config.name, new_state);
        self.aggregator.on_target_state_changed(&self.config.name);

        let last_probe_at = self.last_probe_at();
        let last_webhook_at = self.last_webhook_at();
        self.sink.append_history(&HistoryEntry {
            time: Utc::now(),
            sensor: self.config.name.clone(),
            present: new_state,
            last_probe_at,
            last_webhook_at,
        });

        let signal_name = if self.config.use_arp {
            "arp lookup"
        } else {
            "probe"
        };
        tracing::info!(
            "Changed occupancy state for {} to {}. Last successful {} {}, last webhook {}.",
            self.config.target,
            new_state,
            signal_name,
            format_time(last_probe_at),
            format_time(last_webhook_at),
        );

        true
    }
}

/// Read one timestamp; a failing store reads as "no signal".
fn read_signal(store: &dyn PresenceStore, target: &str, signal: Signal) -> Option<DateTime<Utc>> {
    match store.get(target, signal) {
        Ok(at) => at,
        Err(e) => {
            tracing::warn!("Failed to read {} timestamp for {}: {}", signal.as_str(), target, e);
            None
        }
    }
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "none".to_string())
}
