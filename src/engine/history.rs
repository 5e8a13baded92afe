use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::automation::models::{ExecutionPhase, ExecutionStatus};
use crate::database::execution_history;

/// Final metrics for one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub audience_size: i64,
    pub pushes_sent: i32,
    pub pushes_failed: i32,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
}

/// Writer for the durable history table. Every operation here is
/// bookkeeping: failures are logged and swallowed so they can never take an
/// execution down with them.
#[derive(Clone)]
pub struct HistoryTracker {
    db: Arc<DatabaseConnection>,
}

impl HistoryTracker {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert a running row and return its id, or None when the write failed.
    pub async fn track_execution_start(
        &self,
        automation_id: &str,
        automation_name: &str,
        instance_id: &str,
    ) -> Option<String> {
        let record_id = Uuid::now_v7().to_string();
        let row = execution_history::ActiveModel {
            id: Set(record_id.clone()),
            automation_id: Set(automation_id.to_string()),
            automation_name: Set(automation_name.to_string()),
            status: Set(ExecutionStatus::Running.to_string()),
            current_phase: Set(ExecutionPhase::AudienceGeneration.to_string()),
            started_at: Set(Utc::now().timestamp_micros()),
            completed_at: Set(None),
            duration_ms: Set(None),
            audience_size: Set(0),
            pushes_sent: Set(0),
            pushes_failed: Set(0),
            error_message: Set(None),
            error_stack: Set(None),
            instance_id: Set(instance_id.to_string()),
        };

        match row.insert(&*self.db).await {
            Ok(_) => Some(record_id),
            Err(e) => {
                tracing::error!(
                    "Failed to create history record for automation {}: {}",
                    automation_id,
                    e
                );
                None
            }
        }
    }

    pub async fn track_execution_phase(&self, record_id: &str, phase: ExecutionPhase) {
        let result = async {
            let row = execution_history::Entity::find_by_id(record_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| sea_orm::DbErr::RecordNotFound(record_id.to_string()))?;

            let mut active: execution_history::ActiveModel = row.into();
            active.current_phase = Set(phase.to_string());
            active.update(&*self.db).await?;
            Ok::<(), sea_orm::DbErr>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to update history phase for {}: {}", record_id, e);
        }
    }

    pub async fn track_execution_complete(
        &self,
        record_id: &str,
        status: ExecutionStatus,
        metrics: &ExecutionMetrics,
        start_time: DateTime<Utc>,
    ) {
        let now = Utc::now();
        let result = async {
            let row = execution_history::Entity::find_by_id(record_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| sea_orm::DbErr::RecordNotFound(record_id.to_string()))?;

            let mut active: execution_history::ActiveModel = row.into();
            active.status = Set(status.to_string());
            active.completed_at = Set(Some(now.timestamp_micros()));
            active.duration_ms = Set(Some((now - start_time).num_milliseconds()));
            active.audience_size = Set(metrics.audience_size);
            active.pushes_sent = Set(metrics.pushes_sent);
            active.pushes_failed = Set(metrics.pushes_failed);
            active.error_message = Set(metrics.error_message.clone());
            active.error_stack = Set(metrics.error_stack.clone());
            active.update(&*self.db).await?;
            Ok::<(), sea_orm::DbErr>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                "Failed to finalize history record {}: {}",
                record_id,
                e
            );
        }
    }
}
