use sea_orm_migration::prelude::*;

mod m20260115_000001_create_automations_table;
mod m20260115_000002_create_execution_progress_table;
mod m20260115_000003_create_execution_logs_table;
mod m20260115_000004_create_execution_history_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260115_000001_create_automations_table::Migration),
            Box::new(m20260115_000002_create_execution_progress_table::Migration),
            Box::new(m20260115_000003_create_execution_logs_table::Migration),
            Box::new(m20260115_000004_create_execution_history_table::Migration),
        ]
    }
}
