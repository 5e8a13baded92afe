use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExecutionProgress::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExecutionProgress::ExecutionId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExecutionProgress::AutomationId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionProgress::AutomationName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionProgress::InstanceId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionProgress::Status)
                            .string()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(ExecutionProgress::CurrentPhase)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionProgress::ProgressCurrent)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ExecutionProgress::ProgressTotal)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ExecutionProgress::Message).string().null())
                    .col(
                        ColumnDef::new(ExecutionProgress::StartedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionProgress::CompletedAt)
                            .big_integer()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Observers poll by automation, newest first
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_execution_progress_automation")
                    .table(ExecutionProgress::Table)
                    .col(ExecutionProgress::AutomationId)
                    .col(ExecutionProgress::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExecutionProgress::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ExecutionProgress {
    Table,
    ExecutionId,
    AutomationId,
    AutomationName,
    InstanceId,
    Status,
    CurrentPhase,
    ProgressCurrent,
    ProgressTotal,
    Message,
    StartedAt,
    CompletedAt,
}
