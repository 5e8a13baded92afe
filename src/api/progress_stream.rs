use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

use crate::engine::{ExecutionEvent, ExecutionEventKind};
use crate::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// How long the stream stays open after the terminal `done` event so slow
/// clients still receive it.
const DONE_LINGER: Duration = Duration::from_millis(500);

const STREAM_BUFFER: usize = 64;

pub fn routes() -> Router<AppState> {
    Router::new().route("/progress-stream", get(progress_stream))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStreamQuery {
    pub automation_id: String,
    #[serde(default)]
    pub start_execution: bool,
}

/// Live progress stream for one automation. Emits named events
/// `connected`, `log`, `progress`, `done` and a `heartbeat` every 15 s;
/// closes shortly after the terminal `done`.
pub async fn progress_stream(
    State(state): State<AppState>,
    Query(query): Query<ProgressStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before optionally starting the execution so the stream
    // cannot miss its first events.
    let events = state.engine.events().subscribe();

    let mut start_error = None;
    if query.start_execution {
        if let Err(e) = state.engine.execute_now(&query.automation_id).await {
            start_error = Some(e.to_string());
        }
    }

    let (tx, rx) = mpsc::channel::<Event>(STREAM_BUFFER);
    tokio::spawn(pump_events(events, tx, query.automation_id, start_error));

    Sse::new(ReceiverStream::new(rx).map(Ok))
}

async fn pump_events(
    mut events: broadcast::Receiver<ExecutionEvent>,
    tx: mpsc::Sender<Event>,
    automation_id: String,
    start_error: Option<String>,
) {
    if !send_event(
        &tx,
        "connected",
        &json!({
            "automationId": automation_id,
            "timestamp": Utc::now().to_rfc3339(),
        }),
    )
    .await
    {
        return;
    }

    if let Some(message) = start_error {
        if !send_event(
            &tx,
            "log",
            &json!({
                "level": "error",
                "phase": "startup",
                "message": format!("Failed to start execution: {message}"),
                "data": Value::Null,
            }),
        )
        .await
        {
            return;
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) if event.automation_id == automation_id => {
                    let terminal = matches!(event.kind, ExecutionEventKind::Done { .. });
                    let (name, payload) = render_event(&event);
                    if !send_event(&tx, name, &payload).await {
                        return;
                    }
                    if terminal {
                        tokio::time::sleep(DONE_LINGER).await;
                        return;
                    }
                }
                Ok(_) => {} // another automation's event
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Progress stream for automation {} lagged, dropped {} events",
                        automation_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = heartbeat.tick() => {
                if !send_event(
                    &tx,
                    "heartbeat",
                    &json!({ "timestamp": Utc::now().to_rfc3339() }),
                )
                .await
                {
                    return;
                }
            }
        }
    }
}

fn render_event(event: &ExecutionEvent) -> (&'static str, Value) {
    match &event.kind {
        ExecutionEventKind::Log {
            level,
            phase,
            message,
        } => (
            "log",
            json!({
                "level": level,
                "phase": phase,
                "message": message,
                "data": Value::Null,
            }),
        ),
        ExecutionEventKind::Progress {
            status,
            phase,
            progress_current,
            progress_total,
            message,
        } => {
            let progress = match (progress_current, progress_total) {
                (Some(current), Some(total)) => json!({ "current": current, "total": total }),
                _ => Value::Null,
            };
            (
                "progress",
                json!({
                    "status": status,
                    "phase": phase,
                    "progress": progress,
                    "message": message,
                }),
            )
        }
        ExecutionEventKind::Done { status, message } => (
            "done",
            json!({ "status": status, "message": message }),
        ),
    }
}

async fn send_event(tx: &mpsc::Sender<Event>, name: &str, payload: &Value) -> bool {
    let data = match serde_json::to_string(payload) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!("Failed to serialize {} event: {}", name, e);
            return true; // skip this event, keep the stream alive
        }
    };
    tx.send(Event::default().event(name).data(data)).await.is_ok()
}
