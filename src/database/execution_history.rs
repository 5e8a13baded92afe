use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Immutable record of a completed (or currently running) execution with
/// final status and send metrics.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "execution_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub automation_id: String,
    pub automation_name: String,
    pub status: String, // 'running', 'completed', 'failed', 'aborted'
    pub current_phase: String,
    pub started_at: i64, // Unix epoch microseconds
    pub completed_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub audience_size: i64,
    pub pushes_sent: i32,
    pub pushes_failed: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_stack: Option<String>,
    pub instance_id: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
