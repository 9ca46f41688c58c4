//! Operation registry endpoints under `/api/v1/operations`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use intelgate_core::{CreateOperationRequest, Operation, OperationStatus, Priority};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::registry::{ListQuery, StatsSnapshot, DEFAULT_RETENTION};

/// Query string of `GET /operations`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

impl ListParams {
    /// Converts raw query values into registry filters.
    ///
    /// Blank filters match everything. Unknown status or priority values are
    /// rejected; a non-numeric limit falls back to the default.
    fn to_query(&self) -> Result<ListQuery, ApiError> {
        let status = non_blank(self.status.as_deref())
            .map(str::parse::<OperationStatus>)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let priority = non_blank(self.priority.as_deref())
            .map(str::parse::<Priority>)
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let limit = non_blank(self.limit.as_deref()).and_then(|raw| raw.parse::<i64>().ok());
        Ok(ListQuery {
            status,
            priority,
            limit,
        })
    }
}

/// `?id=` query of the status and cancel endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct IdParams {
    #[serde(default)]
    pub id: Option<String>,
}

impl IdParams {
    fn require(&self) -> Result<&str, ApiError> {
        non_blank(self.id.as_deref())
            .ok_or_else(|| ApiError::BadRequest("Operation ID is required".to_string()))
    }
}

/// `?max_age=` query of the cleanup endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupParams {
    #[serde(default)]
    pub max_age: Option<String>,
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// `GET /operations?status=&priority=&limit=`
///
/// # Errors
///
/// 400 for an unknown status or priority filter.
pub async fn list_operations_handler(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let page = state.registry.list(params.to_query()?);

    Ok(Json(json!({
        "operations": page.operations,
        "total": page.total,
        "limit": page.limit,
        "filters": {
            "status": params.status.unwrap_or_default(),
            "priority": params.priority.unwrap_or_default(),
        },
        "timestamp": state.clock.now(),
    })))
}

/// `GET /operations/status?id=`
///
/// # Errors
///
/// 400 without an id, 404 for an unknown one.
pub async fn get_operation_handler(
    State(state): State<AppState>,
    params: Result<Query<IdParams>, QueryRejection>,
) -> Result<Json<Operation>, ApiError> {
    let Query(params) = params?;
    Ok(Json(state.registry.get(params.require()?)?))
}

/// `POST /operations`
///
/// # Errors
///
/// 400 for a malformed body, a blank target or an unknown priority.
pub async fn create_operation_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateOperationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(request) =
        payload.map_err(|_| ApiError::BadRequest("Invalid request body".to_string()))?;
    let operation = state
        .registry
        .create(&request.target, request.priority.as_deref())?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "operation_id": operation.id,
            "status": "created",
            "message": "Operation queued for processing",
            "created_at": operation.created_at,
            "operation": operation,
        })),
    ))
}

/// `POST /operations/cancel?id=`
///
/// Cancelling a finished operation succeeds and reports its final status.
///
/// # Errors
///
/// 400 without an id, 404 for an unknown one.
pub async fn cancel_operation_handler(
    State(state): State<AppState>,
    params: Result<Query<IdParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let operation = state.registry.cancel(params.require()?)?;

    let message = if operation.status == OperationStatus::Cancelled {
        "Operation cancelled successfully".to_string()
    } else {
        format!("Operation already {}", operation.status)
    };
    Ok(Json(json!({
        "operation_id": operation.id,
        "status": operation.status,
        "message": message,
        "cancelled_at": operation.completed_at,
        "operation": operation,
    })))
}

/// `GET /operations/stats`
pub async fn operation_stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.registry.stats())
}

/// `POST /operations/cleanup?max_age=`; `max_age` defaults to 30 days.
///
/// # Errors
///
/// 400 for a malformed duration.
pub async fn cleanup_operations_handler(
    State(state): State<AppState>,
    params: Result<Query<CleanupParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let raw = non_blank(params.max_age.as_deref()).unwrap_or(DEFAULT_RETENTION);
    let report = state.registry.prune(raw)?;

    Ok(Json(json!({
        "deleted_count": report.deleted_count,
        "max_age": humantime::format_duration(report.max_age).to_string(),
        "cutoff_time": report.cutoff_time,
        "remaining_operations": report.remaining_operations,
        "timestamp": state.clock.now(),
    })))
}
