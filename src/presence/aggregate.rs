//! Derived "anyone present" / "no one present" sensors.

use std::sync::{Arc, Mutex, PoisonError};

use super::PresenceFlag;
use crate::config::AggregateConfig;
use crate::notify::NotificationSink;

/// Computes the aggregate sensors from the cached per-target flags.
///
/// Only the previous "anyone" value is kept, to suppress duplicate publishes.
pub struct Aggregator {
    flags: Vec<Arc<PresenceFlag>>,
    sensors: AggregateConfig,
    sink: Arc<dyn NotificationSink>,
    last_anyone: Mutex<bool>,
}

impl Aggregator {
    pub fn new(
        flags: Vec<Arc<PresenceFlag>>,
        sensors: AggregateConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let anyone = flags.iter().any(|f| f.get());
        Self {
            flags,
            sensors,
            sink,
            last_anyone: Mutex::new(anyone),
        }
    }

    pub fn sensors(&self) -> &AggregateConfig {
        &self.sensors
    }

    pub fn anyone_present(&self) -> bool {
        self.flags.iter().any(|f| f.get())
    }

    pub fn no_one_present(&self) -> bool {
        !self.anyone_present()
    }

    /// Recompute after `target` committed a transition.
    pub fn on_target_state_changed(&self, target: &str) {
        let mut last = self.last_anyone.lock().unwrap_or_else(PoisonError::into_inner);
        let anyone = self.anyone_present();
        if *last == anyone {
            return;
        }
        *last = anyone;

        tracing::info!(
            "Aggregate state changed after {}: anyone={}, no one={}",
            target,
            anyone,
            !anyone
        );
        self.publish(anyone);
    }

    /// Publish the current aggregate values unconditionally.
    pub fn publish_current(&self) {
        let last = self.last_anyone.lock().unwrap_or_else(PoisonError::into_inner);
        self.publish(*last);
    }

    fn publish(&self, anyone: bool) {
        if let Some(name) = &self.sensors.anyone {
            self.sink.publish(name, anyone);
        }
        if let Some(name) = &self.sensors.no_one {
            self.sink.publish(name, !anyone);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::testing::RecordingSink;

    fn sensors() -> AggregateConfig {
        AggregateConfig {
            anyone: Some("Anyone".to_string()),
            no_one: Some("No One".to_string()),
        }
    }

    #[test]
    fn test_or_over_all_combinations() {
        for n in 0..4usize {
            for mask in 0..(1u32 << n) {
                let flags: Vec<_> = (0..n)
                    .map(|i| Arc::new(PresenceFlag::new(mask & (1 << i) != 0)))
                    .collect();
                let expected = mask != 0;
                let agg = Aggregator::new(flags, sensors(), Arc::new(RecordingSink::default()));

                assert_eq!(agg.anyone_present(), expected, "n={} mask={:b}", n, mask);
                assert_eq!(agg.no_one_present(), !expected);
            }
        }
    }

    #[test]
    fn test_publishes_only_on_change() {
        let sink = Arc::new(RecordingSink::default());
        let rig = crate::presence::testing::Rig::with_sink(
            vec![
                crate::presence::testing::target_config("Alice", "10.0.0.2"),
                crate::presence::testing::target_config("Bob", "10.0.0.3"),
            ],
            sink.clone(),
        );
        let (alice, bob) = (&rig.engines[0], &rig.engines[1]);

        alice.apply_state_transition(true);
        bob.apply_state_transition(true);
        alice.apply_state_transition(false);
        bob.apply_state_transition(false);

        assert_eq!(sink.published_for("Anyone"), vec![true, false]);
        assert_eq!(sink.published_for("No One"), vec![false, true]);
    }

    #[test]
    fn test_disabled_sensors_are_not_published() {
        let sink = Arc::new(RecordingSink::default());
        let rig = crate::presence::testing::Rig::build(
            vec![crate::presence::testing::target_config("Alice", "10.0.0.2")],
            AggregateConfig {
                anyone: Some("Anyone".to_string()),
                no_one: None,
            },
            Arc::new(crate::db::MemoryStore::new()),
            sink.clone(),
        );

        rig.engines[0].apply_state_transition(true);
        rig.presence.aggregator().publish_current();

        assert_eq!(sink.published_for("Anyone"), vec![true, true]);
        assert!(sink.published_for("No One").is_empty());
    }
}
