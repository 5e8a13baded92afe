pub mod active;
pub mod definitions;
pub mod events;
pub mod history;
pub mod progress;
pub mod timeline;

pub use active::{ActiveExecutionTable, ExecutionState, ExecutionStatusView};
pub use definitions::DefinitionStore;
pub use events::{ExecutionEvent, ExecutionEventBus, ExecutionEventKind};
pub use history::{ExecutionMetrics, HistoryTracker};
pub use progress::ProgressTracker;
pub use timeline::TimelineExecutor;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audience::{AudienceService, GeneratorRegistry, ScriptExecutor};
use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::Automation;
use crate::config::Config;
use crate::downstream::PushSendClient;
use crate::schedule::{AutomationScheduler, ScheduleResult};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorationStatus {
    pub last_restoration_attempt: Option<DateTime<Utc>>,
    pub last_restoration_success: Option<DateTime<Utc>>,
    pub restored_count: usize,
}

/// The automation execution engine. One instance per process, built in
/// `main` after the build-phase gate and shared with every request handler.
pub struct AutomationEngine {
    pub instance_id: String,
    scheduler: Arc<AutomationScheduler>,
    active: Arc<ActiveExecutionTable>,
    timeline: Arc<TimelineExecutor>,
    progress: ProgressTracker,
    events: Arc<ExecutionEventBus>,
    definitions: Arc<DefinitionStore>,
    restoration: RwLock<RestorationStatus>,
}

impl AutomationEngine {
    pub async fn new(
        db: Arc<DatabaseConnection>,
        config: &Config,
        registry: GeneratorRegistry,
    ) -> Arc<Self> {
        let instance_id = format!("engine-{}", Uuid::new_v4());

        let events = Arc::new(ExecutionEventBus::new());
        let active = Arc::new(ActiveExecutionTable::new());
        let progress = ProgressTracker::new(db.clone());
        let history = HistoryTracker::new(db.clone());
        let definitions = Arc::new(DefinitionStore::new(db.clone()));

        let audience = Arc::new(AudienceService::new(
            Arc::new(registry),
            Arc::new(ScriptExecutor::new(config.scripts_dir.clone())),
            config.engine_version,
            config.output_dir.clone(),
            config.cadence_service_url.clone(),
        ));
        let downstream = Arc::new(PushSendClient::new(config.downstream_base_url.clone()));

        let timeline = Arc::new(TimelineExecutor::new(
            progress.clone(),
            history,
            active.clone(),
            events.clone(),
            audience,
            downstream,
            definitions.clone(),
            instance_id.clone(),
        ));
        let scheduler = Arc::new(AutomationScheduler::new(
            active.clone(),
            timeline.clone(),
            events.clone(),
        ));
        timeline.set_scheduler(scheduler.clone()).await;

        Arc::new(Self {
            instance_id,
            scheduler,
            active,
            timeline,
            progress,
            events,
            definitions,
            restoration: RwLock::new(RestorationStatus::default()),
        })
    }

    /// Load active definitions and rearm their cron handles. Failures leave
    /// the process running in degraded mode; nothing here panics or exits.
    pub async fn startup_restore(&self) {
        let started = std::time::Instant::now();
        let now = Utc::now();

        tracing::info!("============================================================");
        tracing::info!("  Automation engine starting");
        tracing::info!("  instance: {}", self.instance_id);
        tracing::info!("  time: {}", now.to_rfc3339());
        tracing::info!("============================================================");

        self.restoration.write().await.last_restoration_attempt = Some(now);

        let definitions = match self.definitions.list().await {
            Ok(definitions) => definitions,
            Err(e) => {
                tracing::error!("============================================================");
                tracing::error!("  RESTORATION FAILED");
                tracing::error!("  instance: {}", self.instance_id);
                tracing::error!("  error: {}", e);
                tracing::error!("  continuing in degraded mode, no schedules armed");
                tracing::error!("============================================================");
                return;
            }
        };

        let to_restore: Vec<_> = definitions
            .into_iter()
            .filter(|a| a.should_schedule())
            .collect();

        let mut restored: Vec<String> = Vec::new();
        for (automation_id, result) in self.scheduler.reschedule_all(&to_restore).await {
            if result.ok {
                restored.push(automation_id);
            } else {
                tracing::warn!(
                    "Skipping automation {} during restoration: {}",
                    automation_id,
                    result.message
                );
            }
        }

        let elapsed_ms = started.elapsed().as_millis();
        tracing::info!("============================================================");
        tracing::info!("  RESTORATION COMPLETE");
        tracing::info!("  instance: {}", self.instance_id);
        tracing::info!("  schedules armed: {}", restored.len());
        for id in &restored {
            tracing::info!("    - {}", truncate_id(id));
        }
        tracing::info!("  elapsed: {}ms", elapsed_ms);
        tracing::info!("============================================================");

        let mut status = self.restoration.write().await;
        status.last_restoration_success = Some(Utc::now());
        status.restored_count = restored.len();
    }

    pub async fn schedule_automation(&self, automation: &Automation) -> ScheduleResult {
        self.scheduler.schedule(automation).await
    }

    pub async fn unschedule_automation(&self, automation_id: &str) -> ScheduleResult {
        self.scheduler.unschedule(automation_id).await
    }

    /// Abort a running execution (if any) and drop the cron handle.
    pub async fn cancel_automation(&self, automation_id: &str, reason: &str) -> ScheduleResult {
        if let Some(mut finished) = self.active.terminate(automation_id, reason).await {
            let wait = finished.wait_for(|done| *done);
            if tokio::time::timeout(tokio::time::Duration::from_secs(30), wait)
                .await
                .is_err()
            {
                tracing::warn!(
                    "Timed out waiting for execution of automation {} to abort",
                    automation_id
                );
            }
        }
        self.scheduler.cancel(automation_id, reason).await
    }

    /// Remove the cron handle without touching the definition. The
    /// automation stays paused until `resume_automation`.
    pub async fn pause_automation(&self, automation_id: &str) -> ScheduleResult {
        self.scheduler.unschedule(automation_id).await
    }

    pub async fn resume_automation(&self, automation_id: &str) -> Result<ScheduleResult> {
        let automation = self.definitions.load(automation_id).await?;
        Ok(self.scheduler.schedule(&automation).await)
    }

    /// Fire an execution immediately, outside the cron schedule. Returns
    /// the new execution id.
    pub async fn execute_now(&self, automation_id: &str) -> Result<String> {
        let automation = self.definitions.load(automation_id).await?;
        if self.active.is_active(automation_id).await {
            return Err(PushCastError::Scheduling(format!(
                "Automation {automation_id} is already executing"
            )));
        }

        let state = match self.scheduler.execution_state(automation_id).await {
            Some(state) => state,
            None => ExecutionState::new(Utc::now()),
        };

        let execution_id = Uuid::new_v4().to_string();
        let timeline = self.timeline.clone();
        let execution_id_for_task = execution_id.clone();
        tokio::spawn(async move {
            timeline
                .execute(automation, execution_id_for_task, state)
                .await;
        });

        Ok(execution_id)
    }

    /// Flag the running execution for emergency stop. Returns false when
    /// nothing is running.
    pub async fn emergency_stop(&self, automation_id: &str) -> bool {
        self.active.request_emergency_stop(automation_id).await
    }

    pub async fn execution_status(&self, automation_id: &str) -> Option<ExecutionStatusView> {
        self.active.status(automation_id).await
    }

    pub async fn is_scheduled(&self, automation_id: &str) -> bool {
        self.scheduler.is_scheduled(automation_id).await
    }

    pub async fn restoration_status(&self) -> RestorationStatus {
        self.restoration.read().await.clone()
    }

    pub fn events(&self) -> &ExecutionEventBus {
        &self.events
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn definitions(&self) -> &DefinitionStore {
        &self.definitions
    }

    pub async fn debug_info(&self) -> serde_json::Value {
        serde_json::json!({
            "instanceId": self.instance_id,
            "scheduled": self.scheduler.snapshot().await,
            "activeExecutions": self.active.snapshot().await,
            "restoration": self.restoration_status().await,
        })
    }

    /// Release every cron handle. Idempotent under repeated delivery of
    /// termination signals.
    pub async fn shutdown(&self) {
        tracing::info!("Automation engine shutting down (instance {})", self.instance_id);
        self.scheduler.shutdown().await;
        tracing::info!("Automation engine shutdown complete");
    }
}

fn truncate_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
