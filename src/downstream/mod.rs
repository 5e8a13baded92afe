use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{sleep, timeout, Duration};

use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::{LogLevel, SendMode};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Default deadline for dry-run sends.
pub const TEST_SEND_TIMEOUT: Duration = Duration::from_secs(300);
/// Deadline for live sends, which fan out to real audiences.
pub const LIVE_SEND_TIMEOUT: Duration = Duration::from_secs(600);

/// Where streamed `log` events land while a send is in flight.
#[async_trait]
pub trait SendLogSink: Send + Sync {
    async fn log(&self, level: LogLevel, stage: &str, message: &str);
}

/// Terminal outcome of one downstream send call.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub message: String,
}

/// Event payloads carried on the downstream `data:` lines. Anything that
/// fails to parse (heartbeats, padding) is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DownstreamEvent {
    Log {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        stage: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

/// Streaming client for the push-send endpoint.
///
/// A send is complete only once a terminal `result` or `error` event has
/// been read off the stream. A 200 handshake proves nothing: the downstream
/// service streams its work and reports the outcome last.
pub struct PushSendClient {
    client: Client,
    base_url: String,
}

impl PushSendClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open the SSE stream for `automation_id` in the given mode and wait
    /// for the terminal event. Connection errors and 5xx responses are
    /// retried up to 3 times with a fixed 2 s backoff; the wall-clock
    /// timeout covers the read once a response body is obtained.
    pub async fn run_send(
        &self,
        automation_id: &str,
        mode: SendMode,
        stream_timeout: Duration,
        sink: &dyn SendLogSink,
    ) -> Result<SendOutcome> {
        let url = format!(
            "{}/api/v1/test-run/{}?mode={}",
            self.base_url, automation_id, mode
        );

        let mut attempt = 0;
        let response = loop {
            attempt += 1;

            match self
                .client
                .get(&url)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => break resp,
                Ok(resp) if resp.status().is_server_error() => {
                    tracing::warn!(
                        "[automation {}] push-send returned {} (attempt {}/{})",
                        automation_id,
                        resp.status(),
                        attempt,
                        MAX_ATTEMPTS
                    );
                    if attempt >= MAX_ATTEMPTS {
                        return Err(PushCastError::Downstream(format!(
                            "push-send returned {} after {} attempts",
                            resp.status(),
                            attempt
                        )));
                    }
                }
                Ok(resp) => {
                    return Err(PushCastError::Downstream(format!(
                        "push-send returned unexpected status {}",
                        resp.status()
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        "[automation {}] push-send connection failed: {} (attempt {}/{})",
                        automation_id,
                        e,
                        attempt,
                        MAX_ATTEMPTS
                    );
                    if attempt >= MAX_ATTEMPTS {
                        return Err(PushCastError::Downstream(format!(
                            "push-send connection failed after {attempt} attempts: {e}"
                        )));
                    }
                }
            }

            sleep(RETRY_BACKOFF).await;
        };

        // The response body is dropped on every exit path below, which
        // releases the underlying connection.
        match timeout(
            stream_timeout,
            self.consume_stream(response, automation_id, sink),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(PushCastError::StreamTimeout(stream_timeout.as_millis())),
        }
    }

    async fn consume_stream(
        &self,
        response: reqwest::Response,
        automation_id: &str,
        sink: &dyn SendLogSink,
    ) -> Result<SendOutcome> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                PushCastError::Downstream(format!("push-send stream read failed: {e}"))
            })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Events are separated by a blank line; anything after the last
            // separator stays buffered until the next chunk.
            while let Some(boundary) = buffer.find("\n\n") {
                let raw_event = buffer[..boundary].to_string();
                buffer.drain(..boundary + 2);

                match parse_event(&raw_event) {
                    Some(DownstreamEvent::Log {
                        level,
                        stage,
                        message,
                    }) => {
                        sink.log(
                            parse_level(level.as_deref()),
                            stage.as_deref().unwrap_or("downstream"),
                            message.as_deref().unwrap_or(""),
                        )
                        .await;
                    }
                    Some(DownstreamEvent::Result { success, message }) => {
                        return Ok(SendOutcome {
                            success,
                            message: message
                                .unwrap_or_else(|| "push-send completed".to_string()),
                        });
                    }
                    Some(DownstreamEvent::Error { message }) => {
                        return Ok(SendOutcome {
                            success: false,
                            message: message
                                .unwrap_or_else(|| "push-send reported an error".to_string()),
                        });
                    }
                    None => {} // heartbeat or unparseable frame
                }
            }
        }

        Err(PushCastError::Downstream(format!(
            "push-send stream for automation {automation_id} ended without a terminal event"
        )))
    }
}

/// Extract and parse the JSON payload of one SSE frame. Multi-line `data:`
/// fields are joined per the SSE spec; frames without parseable JSON are
/// dropped.
fn parse_event(raw: &str) -> Option<DownstreamEvent> {
    let data: Vec<&str> = raw
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data.is_empty() {
        return None;
    }
    serde_json::from_str(&data.join("\n")).ok()
}

fn parse_level(level: Option<&str>) -> LogLevel {
    match level {
        Some("warn") => LogLevel::Warn,
        Some("error") => LogLevel::Error,
        Some("debug") => LogLevel::Debug,
        Some("success") => LogLevel::Success,
        _ => LogLevel::Info,
    }
}
