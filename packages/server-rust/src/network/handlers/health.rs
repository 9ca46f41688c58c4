//! Health, readiness and process statistics endpoints.
//!
//! `health` and `ready` are reachable without an API key so load balancers
//! can probe them.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;

/// `GET /api/v1/health`
///
/// Always 200. Pings the downstream service; a failed ping reports the
/// gateway as `degraded` rather than unhealthy since HTTP still works.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let (transport, latency_ms) = match state.bridge.ping().await {
        Ok(latency) => ("healthy".to_string(), Some(millis(latency))),
        Err(err) => (format!("unhealthy: {err}"), None),
    };
    let healthy = latency_ms.is_some();

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "state": state.lifecycle.phase().as_str(),
        "timestamp": state.clock.now(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": uptime(&state),
        "system": {
            "os": std::env::consts::OS,
            "architecture": std::env::consts::ARCH,
            "num_cpu": available_parallelism(),
        },
        "components": {
            "downstream_transport": transport,
            "downstream_latency_ms": latency_ms,
            "http_server": "healthy",
            "memory": "healthy",
        },
    }))
}

/// `GET /api/v1/ready`
///
/// 200 once the server is serving, 503 while starting or draining.
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let health = state.lifecycle.phase();
    let ready = state.lifecycle.is_ready();
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": if ready { "ready" } else { health.as_str() },
            "timestamp": state.clock.now(),
            "services": {
                "transport_connected": state.bridge.is_connected(),
                "http_listening": ready,
            },
        })),
    )
}

/// `GET /api/v1/stats`
pub async fn stats_handler(State(state): State<AppState>) -> Json<Value> {
    let runtime = tokio::runtime::Handle::current().metrics();

    Json(json!({
        "timestamp": state.clock.now(),
        "uptime": uptime(&state),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "in_flight_requests": state.lifecycle.in_flight_count(),
        "runtime": {
            "workers": runtime.num_workers(),
            "alive_tasks": runtime.num_alive_tasks(),
        },
        "system": {
            "available_parallelism": available_parallelism(),
            "os": std::env::consts::OS,
        },
        "memory": {
            "resident_bytes": resident_memory_bytes(),
        },
        "operations": state.registry.len(),
    }))
}

fn uptime(state: &AppState) -> String {
    let secs = state.start_time.elapsed().as_secs();
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Resident set size from `/proc/self/status`; `None` off Linux.
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}
