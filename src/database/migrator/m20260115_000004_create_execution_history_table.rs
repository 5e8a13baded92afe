use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExecutionHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExecutionHistory::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::AutomationId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::AutomationName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::Status)
                            .string()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::CurrentPhase)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::StartedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::CompletedAt)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::DurationMs)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::AudienceSize)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::PushesSent)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ExecutionHistory::PushesFailed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ExecutionHistory::ErrorMessage).text().null())
                    .col(ColumnDef::new(ExecutionHistory::ErrorStack).text().null())
                    .col(
                        ColumnDef::new(ExecutionHistory::InstanceId)
                            .string()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_execution_history_automation")
                    .table(ExecutionHistory::Table)
                    .col(ExecutionHistory::AutomationId)
                    .col(ExecutionHistory::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExecutionHistory::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ExecutionHistory {
    Table,
    Id,
    AutomationId,
    AutomationName,
    Status,
    CurrentPhase,
    StartedAt,
    CompletedAt,
    DurationMs,
    AudienceSize,
    PushesSent,
    PushesFailed,
    ErrorMessage,
    ErrorStack,
    InstanceId,
}
