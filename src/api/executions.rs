use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_json::Value;

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:execution_id", get(get_execution))
        .route("/by_automation/:automation_id/latest", get(get_latest_execution))
}

/// Progress record plus ordered logs for one execution.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let progress = state.engine.progress();

    let record = progress
        .get_execution(&execution_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load execution {}: {}", execution_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let logs = progress.get_logs(&execution_id).await.map_err(|e| {
        tracing::error!("Failed to load logs for execution {}: {}", execution_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let logs_json: Vec<Value> = logs
        .into_iter()
        .map(|entry| {
            serde_json::json!({
                "timestamp": entry.created_at,
                "level": entry.level,
                "phase": entry.phase,
                "message": entry.message,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "executionId": record.execution_id,
        "automationId": record.automation_id,
        "automationName": record.automation_name,
        "instanceId": record.instance_id,
        "status": record.status,
        "currentPhase": record.current_phase,
        "progressCurrent": record.progress_current,
        "progressTotal": record.progress_total,
        "message": record.message,
        "startedAt": record.started_at,
        "completedAt": record.completed_at,
        "logs": logs_json,
    })))
}

/// Most recent execution for an automation, for observers that connect
/// without an execution id.
pub async fn get_latest_execution(
    State(state): State<AppState>,
    Path(automation_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let record = state
        .engine
        .progress()
        .latest_for_automation(&automation_id)
        .await
        .map_err(|e| {
            tracing::error!(
                "Failed to load latest execution for automation {}: {}",
                automation_id,
                e
            );
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(serde_json::json!({
        "executionId": record.execution_id,
        "automationId": record.automation_id,
        "status": record.status,
        "currentPhase": record.current_phase,
        "startedAt": record.started_at,
        "completedAt": record.completed_at,
    })))
}
