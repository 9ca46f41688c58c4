//! Server lifecycle and in-flight request accounting.
//!
//! The readiness probe reads the lifecycle phase; the in-flight middleware
//! holds a guard per request so `serve()` can wait for them after the
//! listener stops accepting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

/// Phase of the gateway process: `Starting -> Ready -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl ServerPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Shared between the router state and the [`NetworkModule`](super::NetworkModule).
#[derive(Debug)]
pub struct Lifecycle {
    phase: ArcSwap<ServerPhase>,
    in_flight: Arc<InFlight>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: ArcSwap::from_pointee(ServerPhase::Starting),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    #[must_use]
    pub fn phase(&self) -> ServerPhase {
        **self.phase.load()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == ServerPhase::Ready
    }

    pub fn mark_ready(&self) {
        self.phase.store(Arc::new(ServerPhase::Ready));
    }

    /// Stops reporting ready. Requests already accepted keep running.
    pub fn begin_drain(&self) {
        self.phase.store(Arc::new(ServerPhase::Draining));
    }

    /// Counts one request until the returned guard is dropped.
    #[must_use]
    pub fn track_request(&self) -> RequestGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        RequestGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no request is in flight, for at most `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` once idle; returns `false` and
    /// stays `Draining` if requests are still running at the deadline.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.in_flight.idle.notified();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(timeout, idle).await.is_err() {
            return false;
        }
        self.phase.store(Arc::new(ServerPhase::Stopped));
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the in-flight middleware for the duration of one request.
#[derive(Debug)]
pub struct RequestGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}
