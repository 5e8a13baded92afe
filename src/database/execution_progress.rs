use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per in-flight or finished execution, readable by observers
/// outside the engine process.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "execution_progress")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub execution_id: String,
    pub automation_id: String,
    pub automation_name: String,
    pub instance_id: String,
    pub status: String, // 'running', 'completed', 'failed', 'aborted'
    pub current_phase: String,
    pub progress_current: i32,
    pub progress_total: i32,
    pub message: Option<String>,
    pub started_at: i64, // Unix epoch microseconds
    pub completed_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        has_many = "super::execution_logs::Entity",
        on_delete = "Cascade"
    )]
    ExecutionLogs,
}

impl Related<super::execution_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExecutionLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
