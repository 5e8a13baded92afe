use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only log entries for an execution. Row ids are UUIDv7 so insert
/// order survives a sort on the primary key.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "execution_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub execution_id: String,
    pub automation_id: String,
    pub level: String, // 'info', 'warn', 'error', 'debug', 'success'
    pub phase: String,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub created_at: i64, // Unix epoch microseconds
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::execution_progress::Entity",
        from = "Column::ExecutionId",
        to = "super::execution_progress::Column::ExecutionId"
    )]
    ExecutionProgress,
}

impl Related<super::execution_progress::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExecutionProgress.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
