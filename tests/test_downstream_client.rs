use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::stream;
use pushcast::automation::errors::PushCastError;
use pushcast::automation::models::{LogLevel, SendMode};
use pushcast::downstream::{PushSendClient, SendLogSink};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::time::Duration;

#[derive(Default)]
struct RecordingSink {
    entries: Mutex<Vec<(LogLevel, String, String)>>,
}

#[async_trait]
impl SendLogSink for RecordingSink {
    async fn log(&self, level: LogLevel, stage: &str, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((level, stage.to_string(), message.to_string()));
    }
}

async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn sse_events(frames: Vec<&'static str>) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let events = frames
        .into_iter()
        .map(|frame| Ok(Event::default().data(frame)))
        .collect::<Vec<_>>();
    Sse::new(stream::iter(events))
}

#[tokio::test]
async fn test_resolves_only_on_terminal_result_event() {
    let app = Router::new().route(
        "/api/v1/test-run/:id",
        get(|| async {
            sse_events(vec![
                r#"{"type":"log","level":"info","stage":"send","message":"queued"}"#,
                r#"{"type":"result","success":true,"message":"sent 3 pushes"}"#,
            ])
        }),
    );
    let base = spawn_server(app).await;

    let client = PushSendClient::new(base);
    let sink = RecordingSink::default();
    let outcome = client
        .run_send("a1", SendMode::TestLiveSend, Duration::from_secs(5), &sink)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message, "sent 3 pushes");

    let entries = sink.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, "send");
    assert_eq!(entries[0].2, "queued");
}

#[tokio::test]
async fn test_error_event_resolves_as_failure() {
    let app = Router::new().route(
        "/api/v1/test-run/:id",
        get(|| async {
            sse_events(vec![r#"{"type":"error","message":"layer rejected payload"}"#])
        }),
    );
    let base = spawn_server(app).await;

    let client = PushSendClient::new(base);
    let sink = RecordingSink::default();
    let outcome = client
        .run_send("a1", SendMode::LiveSend, Duration::from_secs(5), &sink)
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.message, "layer rejected payload");
}

#[tokio::test]
async fn test_http_200_without_terminal_event_is_not_success() {
    // Handshake succeeds, the stream ends with only a log frame: the call
    // must fail rather than report a completed send.
    let app = Router::new().route(
        "/api/v1/test-run/:id",
        get(|| async {
            sse_events(vec![
                r#"{"type":"log","level":"info","stage":"send","message":"starting"}"#,
            ])
        }),
    );
    let base = spawn_server(app).await;

    let client = PushSendClient::new(base);
    let sink = RecordingSink::default();
    let result = client
        .run_send("a1", SendMode::LiveSend, Duration::from_secs(5), &sink)
        .await;

    match result {
        Err(PushCastError::Downstream(message)) => {
            assert!(message.contains("without a terminal event"), "{message}");
        }
        other => panic!("expected downstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_when_stream_stays_silent() {
    let app = Router::new().route(
        "/api/v1/test-run/:id",
        get(|| async {
            Sse::new(stream::pending::<Result<Event, Infallible>>())
        }),
    );
    let base = spawn_server(app).await;

    let client = PushSendClient::new(base);
    let sink = RecordingSink::default();
    let result = client
        .run_send("a1", SendMode::LiveSend, Duration::from_millis(300), &sink)
        .await;

    match result {
        Err(e @ PushCastError::StreamTimeout(_)) => {
            assert_eq!(e.to_string(), "SSE stream timeout after 300ms");
        }
        other => panic!("expected stream timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_retries_5xx_then_succeeds() {
    #[derive(Clone)]
    struct Flaky {
        attempts: Arc<AtomicU32>,
    }

    async fn handler(State(state): State<Flaky>) -> axum::response::Response {
        let attempt = state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        } else {
            sse_events(vec![r#"{"type":"result","success":true,"message":"ok"}"#])
                .into_response()
        }
    }

    let attempts = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route("/api/v1/test-run/:id", get(handler))
        .with_state(Flaky {
            attempts: attempts.clone(),
        });
    let base = spawn_server(app).await;

    let client = PushSendClient::new(base);
    let sink = RecordingSink::default();
    let outcome = client
        .run_send("a1", SendMode::TestLiveSend, Duration::from_secs(5), &sink)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_4xx_is_not_retried() {
    #[derive(Clone)]
    struct Counting {
        attempts: Arc<AtomicU32>,
    }

    async fn handler(State(state): State<Counting>) -> StatusCode {
        state.attempts.fetch_add(1, Ordering::SeqCst);
        StatusCode::NOT_FOUND
    }

    let attempts = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route("/api/v1/test-run/:id", get(handler))
        .with_state(Counting {
            attempts: attempts.clone(),
        });
    let base = spawn_server(app).await;

    let client = PushSendClient::new(base);
    let sink = RecordingSink::default();
    let result = client
        .run_send("a1", SendMode::TestLiveSend, Duration::from_secs(5), &sink)
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
