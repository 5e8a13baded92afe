use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::automation::errors::PushCastError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    EmergencyStop,
    Cancel,
    Pause,
    Resume,
    ExecuteNow,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub automation_id: String,
    pub action: ControlAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ControlQuery {
    pub id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/control", post(control).get(control_status))
        .route("/status", get(engine_status))
}

/// Operator control actions against one automation.
pub async fn control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, (StatusCode, Json<ErrorResponse>)> {
    let engine = &state.engine;
    let automation_id = request.automation_id.as_str();

    let response = match request.action {
        ControlAction::EmergencyStop => {
            let stopped = engine.emergency_stop(automation_id).await;
            ControlResponse {
                success: stopped,
                execution_id: None,
                status: if stopped { "stopping" } else { "idle" }.to_string(),
                message: if stopped {
                    "Emergency stop requested".to_string()
                } else {
                    format!("No active execution for automation {automation_id}")
                },
            }
        }
        ControlAction::Cancel => {
            let reason = request
                .reason
                .unwrap_or_else(|| "Cancelled by operator".to_string());
            let result = engine.cancel_automation(automation_id, &reason).await;
            ControlResponse {
                success: result.ok,
                execution_id: None,
                status: "cancelled".to_string(),
                message: result.message,
            }
        }
        ControlAction::Pause => {
            let result = engine.pause_automation(automation_id).await;
            ControlResponse {
                success: result.ok,
                execution_id: None,
                status: "paused".to_string(),
                message: result.message,
            }
        }
        ControlAction::Resume => {
            let result = engine
                .resume_automation(automation_id)
                .await
                .map_err(into_error_response)?;
            ControlResponse {
                success: result.ok,
                execution_id: None,
                status: if result.ok { "scheduled" } else { "failed" }.to_string(),
                message: result.message,
            }
        }
        ControlAction::ExecuteNow => {
            let execution_id = engine
                .execute_now(automation_id)
                .await
                .map_err(into_error_response)?;
            ControlResponse {
                success: true,
                execution_id: Some(execution_id),
                status: "running".to_string(),
                message: format!("Execution started for automation {automation_id}"),
            }
        }
    };

    Ok(Json(response))
}

/// Control-plane view of one automation: definition, live execution state,
/// cancellation info and the actions currently available.
pub async fn control_status(
    State(state): State<AppState>,
    Query(query): Query<ControlQuery>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let engine = &state.engine;

    let automation = engine
        .definitions()
        .load(&query.id)
        .await
        .map_err(into_error_response)?;

    let execution_status = engine.execution_status(&query.id).await;
    let is_scheduled = engine.is_scheduled(&query.id).await;

    let cancellation_info = execution_status.as_ref().map(|status| {
        json!({
            "canCancel": status.can_cancel,
            "cancellationDeadline": status.cancellation_deadline,
        })
    });

    let available_actions: Vec<&str> = if execution_status.is_some() {
        vec!["emergency_stop", "cancel"]
    } else if is_scheduled {
        vec!["pause", "execute_now", "cancel"]
    } else {
        vec!["resume", "execute_now"]
    };

    Ok(Json(json!({
        "automation": automation,
        "executionStatus": execution_status,
        "cancellationInfo": cancellation_info,
        "availableActions": available_actions,
        "emergencyStopAlwaysAvailable": true,
    })))
}

/// Engine debug surface: schedule table, active executions, restoration.
pub async fn engine_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.engine.debug_info().await)
}

fn into_error_response(error: PushCastError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        PushCastError::AutomationNotFound(_) => StatusCode::NOT_FOUND,
        PushCastError::InvalidAutomation(_) => StatusCode::BAD_REQUEST,
        PushCastError::Scheduling(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}
