//! Error type returned by every handler and its JSON envelope.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use intelgate_core::{ClockSource, SystemClock};
use serde_json::{json, Value};
use tracing::warn;

use crate::bridge::BridgeError;
use crate::registry::RegistryError;

/// Failure of an HTTP request.
///
/// Renders as `{error, status: "error", status_code, timestamp}`; bridge
/// failures also carry the `operation_id` and `correlation_id` involved.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::Registry(RegistryError::Validation(_))
            | Self::Bridge(BridgeError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Registry(RegistryError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Bridge(BridgeError::Transport { .. }) => StatusCode::BAD_GATEWAY,
            Self::Bridge(BridgeError::Protocol { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self, status: StatusCode) -> Value {
        let mut body = json!({
            "error": self.to_string(),
            "status": "error",
            "status_code": status.as_u16(),
            "timestamp": SystemClock.now(),
        });
        if let Self::Bridge(err) = self {
            if let Some(operation_id) = err.operation_id().filter(|id| !id.is_empty()) {
                body["operation_id"] = json!(operation_id);
            }
            if let Some(correlation_id) = err.correlation_id().filter(|id| !id.is_empty()) {
                body["correlation_id"] = json!(correlation_id);
            }
        }
        body
    }
}

impl From<JsonRejection> for ApiError {
    fn from(_: JsonRejection) -> Self {
        Self::BadRequest("Invalid JSON format".to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(self.body(status))).into_response()
    }
}
