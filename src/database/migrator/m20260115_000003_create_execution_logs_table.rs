use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExecutionLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExecutionLogs::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExecutionLogs::ExecutionId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionLogs::AutomationId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ExecutionLogs::Level).string().not_null())
                    .col(ColumnDef::new(ExecutionLogs::Phase).string().not_null())
                    .col(ColumnDef::new(ExecutionLogs::Message).text().not_null())
                    .col(
                        ColumnDef::new(ExecutionLogs::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_execution_logs_execution")
                    .table(ExecutionLogs::Table)
                    .col(ExecutionLogs::ExecutionId)
                    .col(ExecutionLogs::Id)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExecutionLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ExecutionLogs {
    Table,
    Id,
    ExecutionId,
    AutomationId,
    Level,
    Phase,
    Message,
    CreatedAt,
}
