use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::{ExecutionPhase, ExecutionStatus, LogLevel};
use crate::database::{execution_logs, execution_progress};

/// Durable progress records for in-flight executions, readable by observers
/// that connect late or from another process.
#[derive(Clone)]
pub struct ProgressTracker {
    db: Arc<DatabaseConnection>,
}

impl ProgressTracker {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert the row for a newly started execution, status running.
    pub async fn start_execution(
        &self,
        execution_id: &str,
        automation_id: &str,
        automation_name: &str,
        instance_id: &str,
    ) -> Result<()> {
        let row = execution_progress::ActiveModel {
            execution_id: Set(execution_id.to_string()),
            automation_id: Set(automation_id.to_string()),
            automation_name: Set(automation_name.to_string()),
            instance_id: Set(instance_id.to_string()),
            status: Set(ExecutionStatus::Running.to_string()),
            current_phase: Set(ExecutionPhase::AudienceGeneration.to_string()),
            progress_current: Set(0),
            progress_total: Set(0),
            message: Set(None),
            started_at: Set(chrono::Utc::now().timestamp_micros()),
            completed_at: Set(None),
        };

        row.insert(&*self.db).await?;
        Ok(())
    }

    pub async fn update_progress(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        phase: ExecutionPhase,
        message: &str,
        progress: Option<(i32, i32)>,
    ) -> Result<()> {
        let row = execution_progress::Entity::find_by_id(execution_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                PushCastError::Generic(format!("Progress record not found: {execution_id}"))
            })?;

        let mut active: execution_progress::ActiveModel = row.into();
        active.status = Set(status.to_string());
        active.current_phase = Set(phase.to_string());
        active.message = Set(Some(message.to_string()));
        if let Some((current, total)) = progress {
            active.progress_current = Set(current);
            active.progress_total = Set(total);
        }
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Append one log entry. UUIDv7 row ids keep read-back in append order.
    pub async fn append_log(
        &self,
        execution_id: &str,
        automation_id: &str,
        level: LogLevel,
        phase: &str,
        message: &str,
    ) -> Result<()> {
        let entry = execution_logs::ActiveModel {
            id: Set(Uuid::now_v7().to_string()),
            execution_id: Set(execution_id.to_string()),
            automation_id: Set(automation_id.to_string()),
            level: Set(level.to_string()),
            phase: Set(phase.to_string()),
            message: Set(message.to_string()),
            created_at: Set(chrono::Utc::now().timestamp_micros()),
        };

        entry.insert(&*self.db).await?;
        Ok(())
    }

    pub async fn complete_execution(
        &self,
        execution_id: &str,
        final_status: ExecutionStatus,
        final_phase: ExecutionPhase,
        final_message: &str,
    ) -> Result<()> {
        let row = execution_progress::Entity::find_by_id(execution_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                PushCastError::Generic(format!("Progress record not found: {execution_id}"))
            })?;

        let mut active: execution_progress::ActiveModel = row.into();
        active.status = Set(final_status.to_string());
        active.current_phase = Set(final_phase.to_string());
        active.message = Set(Some(final_message.to_string()));
        active.completed_at = Set(Some(chrono::Utc::now().timestamp_micros()));
        active.update(&*self.db).await?;
        Ok(())
    }

    pub async fn get_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<execution_progress::Model>> {
        let row = execution_progress::Entity::find_by_id(execution_id)
            .one(&*self.db)
            .await?;
        Ok(row)
    }

    /// Logs in append order.
    pub async fn get_logs(&self, execution_id: &str) -> Result<Vec<execution_logs::Model>> {
        let logs = execution_logs::Entity::find()
            .filter(execution_logs::Column::ExecutionId.eq(execution_id))
            .order_by_asc(execution_logs::Column::CreatedAt)
            .order_by_asc(execution_logs::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(logs)
    }

    /// Most recent execution for an automation, if any.
    pub async fn latest_for_automation(
        &self,
        automation_id: &str,
    ) -> Result<Option<execution_progress::Model>> {
        let row = execution_progress::Entity::find()
            .filter(execution_progress::Column::AutomationId.eq(automation_id))
            .order_by_desc(execution_progress::Column::StartedAt)
            .one(&*self.db)
            .await?;
        Ok(row)
    }
}
