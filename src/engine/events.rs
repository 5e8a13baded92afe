use serde::Serialize;
use tokio::sync::broadcast;

use crate::automation::models::{ExecutionPhase, ExecutionStatus, LogLevel};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Live execution events for same-process SSE observers. The progress store
/// remains the source of truth; this bus only saves observers a poll.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ExecutionEventKind {
    Log {
        level: LogLevel,
        phase: String,
        message: String,
    },
    Progress {
        status: ExecutionStatus,
        phase: ExecutionPhase,
        progress_current: Option<i32>,
        progress_total: Option<i32>,
        message: Option<String>,
    },
    Done {
        status: ExecutionStatus,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub automation_id: String,
    pub execution_id: String,
    #[serde(flatten)]
    pub kind: ExecutionEventKind,
}

pub struct ExecutionEventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl Default for ExecutionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Publishing with no subscribers is fine, the event just evaporates.
    pub fn publish(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}
