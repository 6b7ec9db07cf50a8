//! Test doubles shared by the presence, notify, probe and web tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{Presence, TargetEngine};
use crate::config::{AggregateConfig, TargetConfig, WebhookPrecedence};
use crate::db::{HistoryEntry, MemoryStore};
use crate::notify::NotificationSink;
use crate::probe::{ProbeError, ReachabilityProbe};

pub fn target_config(name: &str, target: &str) -> TargetConfig {
    TargetConfig {
        name: name.to_string(),
        target: target.to_string(),
        threshold: chrono::Duration::minutes(15),
        probe_interval: Some(Duration::from_secs(10)),
        probe_timeout: Duration::from_millis(500),
        use_arp: false,
        webhook_debounce: Duration::ZERO,
        excluded_from_webhook: false,
        custom_dns: Vec::new(),
        precedence: WebhookPrecedence::Suppress,
    }
}

pub fn history_entry(sensor: &str, present: bool) -> HistoryEntry {
    HistoryEntry {
        time: Utc::now(),
        sensor: sensor.to_string(),
        present,
        last_probe_at: None,
        last_webhook_at: None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Published(String, bool),
    History(HistoryEntry),
}

/// Records every call in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Published(sensor, state) => Some((sensor, state)),
                SinkEvent::History(..) => None,
            })
            .collect()
    }

    pub fn published_for(&self, sensor: &str) -> Vec<bool> {
        self.published()
            .into_iter()
            .filter(|(s, _)| s == sensor)
            .map(|(_, state)| state)
            .collect()
    }

    pub fn history(&self, sensor: &str) -> Vec<HistoryEntry> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::History(entry) if entry.sensor == sensor => Some(entry),
                _ => None,
            })
            .collect()
    }

    pub fn history_count(&self, sensor: &str) -> usize {
        self.history(sensor).len()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, sensor: &str, present: bool) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Published(sensor.to_string(), present));
    }

    fn append_history(&self, entry: &HistoryEntry) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::History(entry.clone()));
    }
}

type DuringProbe = Box<dyn Fn() + Send + Sync>;

/// Probe whose answers are set by the test.
#[derive(Default)]
pub struct ScriptedProbe {
    reachable: AtomicBool,
    unresolvable: AtomicBool,
    calls: AtomicUsize,
    /// Answers consumed before falling back to `reachable`.
    script: Mutex<VecDeque<bool>>,
    during: Mutex<Option<DuringProbe>>,
}

impl ScriptedProbe {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_resolvable(&self, resolvable: bool) {
        self.unresolvable.store(!resolvable, Ordering::SeqCst);
    }

    pub fn push_answers(&self, answers: &[bool]) {
        self.script.lock().unwrap().extend(answers.iter().copied());
    }

    /// Run `f` while the probe is "on the wire".
    pub fn set_during_probe(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.during.lock().unwrap() = Some(Box::new(f));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn resolve(&self, target: &TargetConfig) -> Result<String, ProbeError> {
        if self.unresolvable.load(Ordering::SeqCst) {
            return Err(ProbeError::Resolution(format!("cannot resolve {}", target.target)));
        }
        Ok(target.target.clone())
    }

    async fn probe(&self, _address: &str, _use_arp: bool, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = self.during.lock().unwrap().as_ref() {
            f();
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.reachable.load(Ordering::SeqCst))
    }
}

/// A fully wired [`Presence`] over test doubles.
pub struct Rig {
    pub presence: Arc<Presence>,
    pub engines: Vec<Arc<TargetEngine>>,
    pub store: Arc<MemoryStore>,
    pub probe: Arc<ScriptedProbe>,
    pub sink: Arc<RecordingSink>,
}

impl Rig {
    pub fn single(name: &str, target: &str) -> Self {
        Self::new(vec![target_config(name, target)])
    }

    pub fn new(targets: Vec<TargetConfig>) -> Self {
        Self::with_store(targets, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(targets: Vec<TargetConfig>, store: Arc<MemoryStore>) -> Self {
        Self::build(targets, default_aggregates(), store, Arc::new(RecordingSink::default()))
    }

    pub fn with_sink(targets: Vec<TargetConfig>, sink: Arc<RecordingSink>) -> Self {
        Self::build(targets, default_aggregates(), Arc::new(MemoryStore::new()), sink)
    }

    pub fn build(
        targets: Vec<TargetConfig>,
        aggregates: AggregateConfig,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
    ) -> Self {
        let probe = Arc::new(ScriptedProbe::default());
        let presence = Arc::new(Presence::new(
            targets,
            aggregates,
            store.clone(),
            probe.clone(),
            sink.clone(),
        ));
        let engines = presence.engines().to_vec();
        Self {
            presence,
            engines,
            store,
            probe,
            sink,
        }
    }
}

pub fn default_aggregates() -> AggregateConfig {
    AggregateConfig {
        anyone: Some("Anyone".to_string()),
        no_one: Some("No One".to_string()),
    }
}
