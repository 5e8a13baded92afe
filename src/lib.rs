use std::sync::Arc;

pub mod api;
pub mod audience;
pub mod automation;
pub mod config;
pub mod database;
pub mod downstream;
pub mod engine;
pub mod schedule;

pub use database::establish_connection;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub engine: Arc<engine::AutomationEngine>,
    pub config: Arc<config::Config>,
}
