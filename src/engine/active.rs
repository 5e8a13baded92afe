use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::{ExecutionConfig, ExecutionPhase};

/// Per-execution shared state: the mutable config snapshot plus a signal
/// that wakes the cancellation-window loop early (emergency stop, abort).
pub struct ExecutionState {
    pub config: RwLock<ExecutionConfig>,
    pub stop_signal: Notify,
}

impl ExecutionState {
    pub fn new(start_time: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(ExecutionConfig::new(start_time)),
            stop_signal: Notify::new(),
        })
    }
}

pub struct ActiveExecution {
    pub execution_id: String,
    pub automation_id: String,
    pub started_at: DateTime<Utc>,
    pub current_phase: ExecutionPhase,
    pub cancel_token: CancellationToken,
    pub state: Arc<ExecutionState>,
    /// Flips to true once the timeline executor has fully finalized.
    pub finished_rx: watch::Receiver<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatusView {
    pub execution_id: String,
    pub phase: ExecutionPhase,
    pub started_at: DateTime<Utc>,
    pub can_cancel: bool,
    pub cancellation_deadline: Option<DateTime<Utc>>,
}

/// Enforces the one-run-per-automation invariant. All operations take the
/// table lock, so a cron tick that observes an active entry can never race a
/// second registration for the same automation.
#[derive(Default)]
pub struct ActiveExecutionTable {
    inner: RwLock<HashMap<String, ActiveExecution>>,
}

impl ActiveExecutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new active entry. Fails if the automation already has one.
    pub async fn register(&self, entry: ActiveExecution) -> Result<()> {
        let mut table = self.inner.write().await;
        if table.contains_key(&entry.automation_id) {
            return Err(PushCastError::Scheduling(format!(
                "Automation {} is already executing",
                entry.automation_id
            )));
        }
        table.insert(entry.automation_id.clone(), entry);
        Ok(())
    }

    pub async fn is_active(&self, automation_id: &str) -> bool {
        self.inner.read().await.contains_key(automation_id)
    }

    pub async fn status(&self, automation_id: &str) -> Option<ExecutionStatusView> {
        let table = self.inner.read().await;
        let entry = table.get(automation_id)?;
        let config = entry.state.config.read().await;
        Some(ExecutionStatusView {
            execution_id: entry.execution_id.clone(),
            phase: entry.current_phase,
            started_at: entry.started_at,
            can_cancel: config.can_cancel,
            cancellation_deadline: config.cancellation_deadline,
        })
    }

    pub async fn set_phase(&self, automation_id: &str, phase: ExecutionPhase) {
        if let Some(entry) = self.inner.write().await.get_mut(automation_id) {
            entry.current_phase = phase;
        }
    }

    /// Flag an emergency stop on the running execution and wake its window
    /// loop. Returns false when nothing is running.
    pub async fn request_emergency_stop(&self, automation_id: &str) -> bool {
        let table = self.inner.read().await;
        match table.get(automation_id) {
            Some(entry) => {
                entry.state.config.write().await.emergency_stop_requested = true;
                // notify_one stores a permit, so a loop that is between its
                // flag check and its wait still wakes immediately
                entry.state.stop_signal.notify_one();
                true
            }
            None => false,
        }
    }

    /// Signal the abort handle and drop the entry. Idempotent; returns a
    /// receiver that resolves once the timeline has finished aborting, or
    /// None when nothing was running.
    pub async fn terminate(
        &self,
        automation_id: &str,
        reason: &str,
    ) -> Option<watch::Receiver<bool>> {
        let mut table = self.inner.write().await;
        let entry = table.remove(automation_id)?;
        tracing::info!(
            "Terminating execution {} of automation {}: {}",
            entry.execution_id,
            automation_id,
            reason
        );
        entry.cancel_token.cancel();
        entry.state.stop_signal.notify_one();
        Some(entry.finished_rx)
    }

    /// Remove the entry at terminal finalization. No-op when terminate
    /// already removed it.
    pub async fn remove(&self, automation_id: &str) {
        self.inner.write().await.remove(automation_id);
    }

    pub async fn snapshot(&self) -> Vec<ExecutionStatusView> {
        let table = self.inner.read().await;
        let mut views = Vec::with_capacity(table.len());
        for entry in table.values() {
            let config = entry.state.config.read().await;
            views.push(ExecutionStatusView {
                execution_id: entry.execution_id.clone(),
                phase: entry.current_phase,
                started_at: entry.started_at,
                can_cancel: config.can_cancel,
                cancellation_deadline: config.cancellation_deadline,
            });
        }
        views
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
