//! Scheduler module for running the per-target probe heartbeats.

use crate::presence::{ProbeOutcome, TargetEngine};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// A running heartbeat; `ticket` tells restarts of the same target apart.
struct Heartbeat {
    ticket: u64,
    stop_tx: broadcast::Sender<()>,
}

/// Runs one sequential heartbeat per target.
pub struct Scheduler {
    stop_chans: Arc<RwLock<HashMap<String, Heartbeat>>>,
    next_ticket: AtomicU64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            stop_chans: Arc::new(RwLock::new(HashMap::new())),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Start a heartbeat for every engine that has probing enabled.
    pub async fn start(&self, engines: &[Arc<TargetEngine>]) {
        tracing::info!("Starting scheduler with {} targets", engines.len());

        for engine in engines {
            self.add_target(engine.clone()).await;
        }
    }

    /// Start the heartbeat of one target.
    pub async fn add_target(&self, engine: Arc<TargetEngine>) {
        let Some(interval) = engine.config().probe_interval else {
            tracing::info!("Probing disabled for {}", engine.name());
            return;
        };

        let mut stop_chans = self.stop_chans.write().await;

        if stop_chans.contains_key(engine.target()) {
            return; // Already running
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        stop_chans.insert(engine.target().to_string(), Heartbeat { ticket, stop_tx });
        drop(stop_chans);

        tracing::info!(
            "Scheduler: Adding target {} every {:?}",
            engine.name(),
            interval
        );

        let stop_chans = self.stop_chans.clone();
        let key = engine.target().to_string();

        tokio::spawn(async move {
            run_heartbeat(engine, interval, stop_rx).await;

            let mut chans = stop_chans.write().await;
            if chans.get(&key).is_some_and(|h| h.ticket == ticket) {
                chans.remove(&key);
            }
        });
    }

    /// Stop the heartbeat of one target.
    pub async fn remove_target(&self, target: &str) {
        let mut stop_chans = self.stop_chans.write().await;

        if let Some(heartbeat) = stop_chans.remove(target) {
            let _ = heartbeat.stop_tx.send(());
            tracing::info!("Scheduler: Removed target {}", target);
        }
    }

    /// Stop every heartbeat.
    pub async fn stop_all(&self) {
        let mut stop_chans = self.stop_chans.write().await;
        for (_, heartbeat) in stop_chans.drain() {
            let _ = heartbeat.stop_tx.send(());
        }
        tracing::info!("Scheduler stopped");
    }

    pub async fn running(&self) -> usize {
        self.stop_chans.read().await.len()
    }
}

/// Probe, wait `interval`, repeat. The next probe never starts before the
/// previous one has been reconciled.
async fn run_heartbeat(
    engine: Arc<TargetEngine>,
    interval: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    loop {
        let outcome = tokio::select! {
            _ = stop_rx.recv() => break,
            outcome = engine.probe_once() => outcome,
        };

        if let ProbeOutcome::Completed { reachable, confirmed } = outcome {
            tracing::debug!(
                "Probed {}: reachable={} confirmed={}",
                engine.target(),
                reachable,
                confirmed
            );
        }

        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::testing::*;

    fn every(name: &str, target: &str, interval: Option<Duration>) -> crate::config::TargetConfig {
        let mut cfg = target_config(name, target);
        cfg.probe_interval = interval;
        cfg
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_probes_every_interval() {
        let rig = Rig::new(vec![every("Alice", "10.0.0.2", Some(Duration::from_secs(10)))]);
        rig.probe.set_reachable(true);
        let scheduler = Scheduler::new();
        scheduler.start(&rig.engines).await;

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(rig.probe.calls(), 1);
        assert!(rig.engines[0].is_present());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rig.probe.calls(), 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(rig.probe.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_probing_has_no_heartbeat() {
        let rig = Rig::new(vec![
            every("Alice", "10.0.0.2", None),
            every("Bob", "10.0.0.3", Some(Duration::from_secs(10))),
        ]);
        let scheduler = Scheduler::new();
        scheduler.start(&rig.engines).await;

        assert_eq!(scheduler.running().await, 1);
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(rig.probe.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_survives_failures() {
        let rig = Rig::new(vec![every("Alice", "10.0.0.2", Some(Duration::from_secs(1)))]);
        rig.probe.set_resolvable(false);
        let scheduler = Scheduler::new();
        scheduler.start(&rig.engines).await;

        tokio::time::sleep(Duration::from_millis(3500)).await;
        rig.probe.set_resolvable(true);
        rig.probe.push_answers(&[false, true]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rig.probe.calls(), 2);
        assert!(rig.engines[0].is_present());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_ends_heartbeats() {
        let rig = Rig::new(vec![
            every("Alice", "10.0.0.2", Some(Duration::from_secs(10))),
            every("Bob", "10.0.0.3", Some(Duration::from_secs(10))),
        ]);
        let scheduler = Scheduler::new();
        scheduler.start(&rig.engines).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(rig.probe.calls(), 2);

        scheduler.stop_all().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rig.probe.calls(), 2);
        assert_eq!(scheduler.running().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_target_twice_is_noop() {
        let rig = Rig::single("Alice", "10.0.0.2");
        let scheduler = Scheduler::new();
        scheduler.add_target(rig.engines[0].clone()).await;
        scheduler.add_target(rig.engines[0].clone()).await;
        assert_eq!(scheduler.running().await, 1);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(rig.probe.calls(), 1);

        scheduler.remove_target("10.0.0.2").await;
        assert_eq!(scheduler.running().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_survives_old_heartbeat_cleanup() {
        let rig = Rig::single("Alice", "10.0.0.2");
        let scheduler = Scheduler::new();
        scheduler.add_target(rig.engines[0].clone()).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        scheduler.remove_target("10.0.0.2").await;
        scheduler.add_target(rig.engines[0].clone()).await;

        // let the stopped heartbeat run its cleanup
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.running().await, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rig.probe.calls(), 3);

        scheduler.stop_all().await;
        assert_eq!(scheduler.running().await, 0);
    }
}
