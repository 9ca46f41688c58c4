//! `POST /api/v1/intel` and `POST /api/v1/intel/batch`.
//!
//! Both validate the body, assign missing operation ids and hand the
//! messages to the forwarding bridge. Single replies are relayed to the
//! client byte for byte.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use intelgate_core::{DownstreamRequest, IntelRequest, Priority};
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::network::middleware::X_OPERATION_ID;

/// Forwards one investigation request downstream and returns the reply verbatim.
///
/// # Errors
///
/// 400 for a malformed body, a blank target, an unknown priority or an
/// `operation_id` that cannot be echoed in the `X-Operation-ID` header; 502/500
/// when the downstream exchange fails.
pub async fn intel_handler(
    State(state): State<AppState>,
    payload: Result<Json<IntelRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    if request.target.trim().is_empty() {
        return Err(ApiError::BadRequest("Target is required".to_string()));
    }
    let message = prepare(&state, request).map_err(ApiError::BadRequest)?;
    let operation_header = HeaderValue::from_str(&message.operation_id).map_err(|_| {
        ApiError::BadRequest("operation_id must be printable ASCII".to_string())
    })?;

    let reply = state.bridge.forward(message).await?;

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (HeaderName::from_static(X_OPERATION_ID), operation_header),
        ],
        reply.body,
    )
        .into_response())
}

/// Forwards up to 100 requests in order, isolating per-item failures.
///
/// # Errors
///
/// 400 for a malformed body, an empty or oversized batch, or an item with
/// an unknown priority. Downstream failures never fail the whole batch.
pub async fn intel_batch_handler(
    State(state): State<AppState>,
    payload: Result<Json<Vec<IntelRequest>>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(requests) = payload
        .map_err(|_| ApiError::BadRequest("Invalid JSON format for batch request".to_string()))?;

    let messages = requests
        .into_iter()
        .enumerate()
        .map(|(index, request)| {
            prepare(&state, request).map_err(|err| ApiError::BadRequest(format!("item {index}: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let total = messages.len();

    let batch = state.bridge.forward_batch(messages).await?;

    Ok(Json(json!({
        "batch_id": state.batch_ids.new_id(),
        "total": total,
        "successful": batch.successful,
        "failed": batch.failed,
        "operations": batch.outcomes,
        "timestamp": state.clock.now(),
    })))
}

/// Resolves priority and operation id and builds the downstream message.
fn prepare(state: &AppState, mut request: IntelRequest) -> Result<DownstreamRequest, String> {
    let priority =
        Priority::parse_or_default(request.priority.as_deref()).map_err(|e| e.to_string())?;
    let operation_id = request
        .operation_id
        .take()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| state.ids.new_id());
    Ok(DownstreamRequest::investigate(
        request,
        operation_id,
        priority,
        state.clock.now(),
    ))
}
