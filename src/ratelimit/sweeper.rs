//! Background eviction of expired counters.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::AdmissionEngine;
use super::store::CounterStore;

/// Shortest sweep interval accepted.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic cleanup task for an [`AdmissionEngine`].
pub struct Sweeper;

impl Sweeper {
    /// Start sweeping `engine` every `interval` on the current tokio runtime.
    ///
    /// The task runs until [`SweeperHandle::shutdown`] is called or the handle is dropped.
    pub fn spawn<S>(engine: Arc<AdmissionEngine<S>>, interval: Duration) -> SweeperHandle
    where
        S: CounterStore + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(interval_secs = interval.as_secs(), "Starting counter sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = engine.cleanup();
                        debug!(
                            counters = report.counters,
                            tenants = report.tenants,
                            remaining = engine.limiter().counter_count(),
                            "Sweep complete"
                        );
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            info!("Counter sweeper stopped");
        });

        SweeperHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }
}

/// Owner of a running sweeper.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Counter sweeper task failed");
        }
    }

    /// Whether the sweeper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        // Dropping the sender also wakes the task, but abort makes it immediate.
        if self.shutdown_tx.is_some() {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::Tier;

    fn engine() -> (Arc<ManualClock>, Arc<AdmissionEngine>) {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let engine = AdmissionEngine::with_clock(&AdmissionConfig::default(), clock.clone()).unwrap();
        (clock, Arc::new(engine))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_tick() {
        let (clock, engine) = engine();
        engine.check_tenant_rate_limit("acme", Tier::Basic, "/api/users");
        assert_eq!(engine.limiter().counter_count(), 1);

        let handle = Sweeper::spawn(engine.clone(), Duration::from_secs(300));

        clock.advance(Duration::from_secs(600));
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(engine.limiter().counter_count(), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_blocked_entries() {
        let (clock, engine) = engine();
        engine.limiter().block("acme", Duration::from_secs(3600));

        let handle = Sweeper::spawn(engine.clone(), Duration::from_secs(300));

        clock.advance(Duration::from_secs(600));
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert!(engine.limiter().active_block("acme").is_some());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let (_clock, engine) = engine();
        let handle = Sweeper::spawn(engine, Duration::from_secs(300));
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("sweeper did not stop");
    }
}
