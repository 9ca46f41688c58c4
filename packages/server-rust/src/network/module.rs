//! Network module with deferred startup lifecycle.
//!
//! `new()` wires shared state, `start()` binds the listener and `serve()`
//! accepts connections until the shutdown future resolves. Binding before
//! serving lets the caller learn the OS-assigned port and start background
//! workers first.

use std::future::Future;
use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use intelgate_core::ClockSource;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::auth::require_api_key;
use super::config::NetworkConfig;
use super::handlers::{
    cancel_operation_handler, cleanup_operations_handler, create_operation_handler,
    get_operation_handler, health_handler, intel_batch_handler, intel_handler,
    list_operations_handler, operation_stats_handler, readiness_handler, stats_handler, AppState,
};
use super::lifecycle::Lifecycle;
use super::middleware::{build_http_layers, track_in_flight};
use crate::bridge::ForwardingBridge;
use crate::registry::OperationRegistry;

/// Assembles every `/api/v1` route with authentication, in-flight tracking
/// and the transport layers.
pub fn build_router(state: AppState) -> Router {
    let layers = build_http_layers(&state.config);

    Router::new()
        .route("/api/v1/intel", post(intel_handler))
        .route("/api/v1/intel/batch", post(intel_batch_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/ready", get(readiness_handler))
        .route("/api/v1/stats", get(stats_handler))
        .route(
            "/api/v1/operations",
            get(list_operations_handler).post(create_operation_handler),
        )
        .route("/api/v1/operations/status", get(get_operation_handler))
        .route("/api/v1/operations/cancel", post(cancel_operation_handler))
        .route("/api/v1/operations/stats", get(operation_stats_handler))
        .route("/api/v1/operations/cleanup", post(cleanup_operations_handler))
        .layer(from_fn_with_state(state.clone(), require_api_key))
        .layer(from_fn_with_state(state.clone(), track_in_flight))
        .layer(layers)
        .with_state(state)
}

/// Owns the HTTP listener and the state shared with handlers.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    registry: Arc<OperationRegistry>,
    bridge: Arc<ForwardingBridge>,
    lifecycle: Arc<Lifecycle>,
    clock: Arc<dyn ClockSource>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        registry: Arc<OperationRegistry>,
        bridge: Arc<ForwardingBridge>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            config,
            listener: None,
            registry,
            bridge,
            lifecycle: Arc::new(Lifecycle::new()),
            clock,
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.bridge),
            Arc::clone(&self.lifecycle),
            Arc::new(self.config.clone()),
            Arc::clone(&self.clock),
        )
    }

    #[must_use]
    pub fn build_router(&self) -> Router {
        build_router(self.app_state())
    }

    /// Binds the listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "HTTP listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight
    /// requests for up to the configured drain timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let lifecycle = Arc::clone(&self.lifecycle);

        lifecycle.mark_ready();
        info!("serving HTTP requests");

        let draining = Arc::clone(&lifecycle);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                draining.begin_drain();
            })
            .await?;

        drain(&lifecycle, &self.config).await;
        Ok(())
    }
}

async fn drain(lifecycle: &Lifecycle, config: &NetworkConfig) {
    lifecycle.begin_drain();
    if lifecycle.wait_for_drain(config.drain_timeout).await {
        info!("all in-flight requests drained");
    } else {
        warn!(
            in_flight = lifecycle.in_flight_count(),
            "drain timeout expired with requests still in flight"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use intelgate_core::SystemClock;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::codec::Framed;

    use super::*;
    use crate::bridge::{tcp, BridgeConfig};
    use crate::registry::ProgressionPlan;

    fn module(endpoint: String) -> NetworkModule {
        let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
        NetworkModule::new(
            NetworkConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                drain_timeout: Duration::from_secs(1),
                ..NetworkConfig::default()
            },
            Arc::new(OperationRegistry::new(ProgressionPlan::scaled(0.0), Arc::clone(&clock))),
            Arc::new(ForwardingBridge::tcp(BridgeConfig {
                endpoint,
                ..BridgeConfig::default()
            })),
            clock,
        )
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = module("127.0.0.1:1".to_string());
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = module("127.0.0.1:1".to_string());
        let err = module.serve(std::future::pending()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    /// Downstream stub answering every frame with `{"status":"ok", ...}`.
    async fn spawn_downstream() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut framed = Framed::new(stream, tcp::frame_codec());
                    while let Some(Ok(frame)) = framed.next().await {
                        let msg: Value = serde_json::from_slice(&frame).unwrap();
                        let reply = serde_json::json!({
                            "status": "ok",
                            "operation_id": msg["operation_id"],
                            "correlation_id": msg["correlation_id"],
                        });
                        if framed.send(bytes::Bytes::from(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        format!("tcp://{addr}")
    }

    #[tokio::test]
    async fn serves_end_to_end_and_shuts_down() {
        let endpoint = spawn_downstream().await;
        let mut module = module(endpoint);
        let lifecycle = module.lifecycle();
        let port = module.start().await.unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async move {
            let _ = stop_rx.await;
        }));

        let body = r#"{"target":"acme.com","operation_id":"op_e2e"}"#;
        let request = format!(
            "POST /api/v1/intel HTTP/1.1\r\nHost: localhost\r\nX-API-Key: test-key-456\r\n\
             Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.to_ascii_lowercase().contains("x-operation-id: op_e2e"));
        assert!(response.contains(r#""operation_id":"op_e2e""#));
        assert!(lifecycle.is_ready());

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(
            lifecycle.phase(),
            crate::network::ServerPhase::Stopped
        );
    }
}
