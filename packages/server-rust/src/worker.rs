//! Background workers.
//!
//! `BackgroundWorker<R>` drives a `BackgroundRunnable` on a fixed tick until
//! stopped. The only runnable today is [`RetentionRunnable`], which prunes
//! finished operations from the registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::registry::{OperationRegistry, PruneReport};

// ---------------------------------------------------------------------------
// BackgroundRunnable
// ---------------------------------------------------------------------------

/// Periodic work executed by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// Called on every tick.
    async fn on_tick(&mut self);

    /// Called once after the loop exits. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a spawned worker loop.
pub struct BackgroundWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Spawns the loop. The first tick fires one `tick` after start.
    pub fn start<R: BackgroundRunnable>(mut runnable: R, tick: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => runnable.on_tick().await,
                    _ = &mut stop_rx => break,
                }
            }

            runnable.shutdown().await;
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signals the loop to exit and waits for it.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Prunes terminal operations older than `max_age` on every tick.
pub struct RetentionRunnable {
    registry: Arc<OperationRegistry>,
    max_age: Duration,
}

impl RetentionRunnable {
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry>, max_age: Duration) -> Self {
        Self { registry, max_age }
    }

    fn sweep(&self) -> PruneReport {
        let report = self.registry.prune_older_than(self.max_age);
        debug!(
            deleted = report.deleted_count,
            remaining = report.remaining_operations,
            "retention sweep"
        );
        report
    }
}

#[async_trait]
impl BackgroundRunnable for RetentionRunnable {
    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        info!("retention worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use intelgate_core::{ClockSource, ManualClock, Operation, Priority};
    use serde_json::json;

    use super::*;
    use crate::registry::ProgressionPlan;

    struct Counting {
        ticks: Arc<AtomicU32>,
        stopped: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BackgroundRunnable for Counting {
        async fn on_tick(&mut self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Counting, Arc<AtomicU32>, Arc<AtomicU32>) {
        let ticks = Arc::new(AtomicU32::new(0));
        let stopped = Arc::new(AtomicU32::new(0));
        (
            Counting {
                ticks: Arc::clone(&ticks),
                stopped: Arc::clone(&stopped),
            },
            ticks,
            stopped,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_fire_on_interval() {
        let (runnable, ticks, _stopped) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_runs_shutdown_once_and_halts_ticks() {
        let (runnable, ticks, stopped) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(15)).await;
        worker.stop().await;
        worker.stop().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    fn finished(id: &str, created_at: u64) -> Operation {
        let mut op = Operation::new(id.into(), "t".into(), Priority::Low, created_at);
        op.start(created_at).unwrap();
        op.complete(created_at + 1, json!({})).unwrap();
        op
    }

    #[tokio::test(start_paused = true)]
    async fn retention_prunes_only_expired_operations_on_tick() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(OperationRegistry::new(
            ProgressionPlan::scaled(0.0),
            Arc::clone(&clock) as Arc<dyn ClockSource>,
        ));
        registry.insert_for_test(finished("old", 0));
        clock.set(10_000);
        registry.insert_for_test(finished("fresh", 9_500));

        let mut worker = BackgroundWorker::start(
            RetentionRunnable::new(Arc::clone(&registry), Duration::from_secs(5)),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(registry.get("old").is_err());
        assert!(registry.get("fresh").is_ok());
        assert_eq!(registry.len(), 1);
        worker.stop().await;
    }
}
