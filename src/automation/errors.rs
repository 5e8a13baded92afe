use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushCastError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid automation: {0}")]
    InvalidAutomation(String),

    #[error("Automation not found: {0}")]
    AutomationNotFound(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Audience generation failed: {0}")]
    AudienceGeneration(String),

    #[error("Push send failed: {0}")]
    Downstream(String),

    #[error("SSE stream timeout after {0}ms")]
    StreamTimeout(u128),

    #[error("Execution aborted: {0}")]
    Aborted(String),

    #[error("Emergency stop requested")]
    EmergencyStop,

    #[error("Generic error: {0}")]
    Generic(String),
}

pub type Result<T> = std::result::Result<T, PushCastError>;
