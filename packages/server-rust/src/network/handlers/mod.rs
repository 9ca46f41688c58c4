//! HTTP handlers and the shared state they extract.

pub mod error;
pub mod health;
pub mod intel;
pub mod operations;

pub use error::ApiError;
pub use health::{health_handler, readiness_handler, stats_handler};
pub use intel::{intel_batch_handler, intel_handler};
pub use operations::{
    cancel_operation_handler, cleanup_operations_handler, create_operation_handler,
    get_operation_handler, list_operations_handler, operation_stats_handler,
};

use std::sync::Arc;
use std::time::Instant;

use intelgate_core::id::BATCH_PREFIX;
use intelgate_core::{ClockSource, IdGenerator};

use super::{Lifecycle, NetworkConfig};
use crate::bridge::ForwardingBridge;
use crate::registry::OperationRegistry;

/// State carried to every handler through `State` extraction.
///
/// Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<OperationRegistry>,
    pub bridge: Arc<ForwardingBridge>,
    pub lifecycle: Arc<Lifecycle>,
    pub config: Arc<NetworkConfig>,
    pub clock: Arc<dyn ClockSource>,
    /// Mints operation ids for intel requests that arrive without one.
    pub ids: IdGenerator,
    pub batch_ids: IdGenerator,
    /// Process start, for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(
        registry: Arc<OperationRegistry>,
        bridge: Arc<ForwardingBridge>,
        lifecycle: Arc<Lifecycle>,
        config: Arc<NetworkConfig>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            registry,
            bridge,
            lifecycle,
            config,
            ids: IdGenerator::new(Arc::clone(&clock)),
            batch_ids: IdGenerator::with_prefix(BATCH_PREFIX, Arc::clone(&clock)),
            clock,
            start_time: Instant::now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use intelgate_core::SystemClock;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::AppState;
    use crate::bridge::testing::{Probe, ScriptedTransport, Step};
    use crate::bridge::{BridgeConfig, ForwardingBridge};
    use crate::network::{Lifecycle, NetworkConfig};
    use crate::registry::{OperationRegistry, ProgressionPlan, Stage};

    pub(crate) const KEY: &str = "test-key-456";

    /// State wired to a scripted downstream and a registry whose stages
    /// finish in a few milliseconds.
    pub(crate) fn state_with(steps: impl IntoIterator<Item = Step>) -> (AppState, Probe) {
        let (transport, probe) = ScriptedTransport::new(steps);
        let bridge = ForwardingBridge::new(
            Box::new(transport),
            BridgeConfig {
                recv_timeout: std::time::Duration::from_millis(200),
                ping_timeout: std::time::Duration::from_millis(100),
                ..BridgeConfig::default()
            },
        );
        let plan = ProgressionPlan::new(vec![
            Stage::new("one", std::time::Duration::from_millis(2), 50),
            Stage::new("two", std::time::Duration::from_millis(2), 100),
        ]);
        let clock = Arc::new(SystemClock);
        let state = AppState::new(
            Arc::new(OperationRegistry::new(plan, clock.clone())),
            Arc::new(bridge),
            Arc::new(Lifecycle::new()),
            Arc::new(NetworkConfig {
                port: 0,
                ..NetworkConfig::default()
            }),
            clock,
        );
        (state, probe)
    }

    pub(crate) fn get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header("x-api-key", KEY)
            .body(Body::empty())
            .unwrap()
    }

    pub(crate) fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("x-api-key", KEY)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub(crate) async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}
