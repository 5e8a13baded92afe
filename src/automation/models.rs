use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status carried on an automation definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    Draft,
    Scheduled,
    Active,
    Paused,
    Running,
    Failed,
    Completed,
    Cancelled,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutomationSchedule {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub frequency: Frequency,
    /// Local send time, "HH:MM". The automation itself starts lead-time
    /// minutes earlier.
    pub execution_time: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub lead_time_minutes: Option<i64>,
    /// Used verbatim when frequency is custom.
    #[serde(default)]
    pub cron_expression: Option<String>,
}

pub fn default_timezone() -> String {
    "America/Chicago".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutomationPush {
    pub id: String,
    pub sequence_order: i32,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub layer_id: Option<String>,
    #[serde(default)]
    pub deep_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomScript {
    pub script_id: String,
    #[serde(default)]
    pub lookback_hours: Option<i64>,
    #[serde(default)]
    pub cooling_hours: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AudienceCriteria {
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub custom_script: Option<CustomScript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutomationSettings {
    #[serde(default = "default_true")]
    pub dry_run_first: bool,
    #[serde(default)]
    pub cancellation_window_minutes: Option<i64>,
    #[serde(default)]
    pub emergency_stop_enabled: bool,
    #[serde(default)]
    pub is_test: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            dry_run_first: true,
            cancellation_window_minutes: None,
            emergency_stop_enabled: false,
            is_test: false,
        }
    }
}

/// An automation definition as stored by the definition store. Unknown
/// fields are rejected at ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Automation {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub status: AutomationStatus,
    pub schedule: AutomationSchedule,
    pub push_sequence: Vec<AutomationPush>,
    #[serde(default)]
    pub audience_criteria: AudienceCriteria,
    #[serde(default)]
    pub settings: AutomationSettings,
}

pub const TEST_LEAD_TIME_MINUTES: i64 = 3;
pub const DEFAULT_LEAD_TIME_MINUTES: i64 = 30;
pub const TEST_CANCELLATION_WINDOW_MINUTES: i64 = 2;
pub const DEFAULT_CANCELLATION_WINDOW_MINUTES: i64 = 25;

/// Name prefix marking throwaway validation automations that get cleaned up
/// after a successful run.
pub const TEST_ARTIFACT_NAME_PREFIX: &str = "TEST SCHEDULED:";

impl Automation {
    /// Minutes between automation start and the declared send time.
    /// Compressed to 3 minutes in test mode.
    pub fn lead_time_minutes(&self) -> i64 {
        if self.audience_criteria.test_mode {
            TEST_LEAD_TIME_MINUTES
        } else {
            self.schedule
                .lead_time_minutes
                .unwrap_or(DEFAULT_LEAD_TIME_MINUTES)
        }
    }

    /// Operator abort window before the live send. 2 minutes in test mode.
    pub fn cancellation_window_minutes(&self) -> i64 {
        if self.audience_criteria.test_mode {
            TEST_CANCELLATION_WINDOW_MINUTES
        } else {
            self.settings
                .cancellation_window_minutes
                .unwrap_or(DEFAULT_CANCELLATION_WINDOW_MINUTES)
        }
    }

    pub fn script_id(&self) -> Option<&str> {
        self.audience_criteria
            .custom_script
            .as_ref()
            .map(|s| s.script_id.as_str())
    }

    pub fn is_test_artifact(&self) -> bool {
        self.settings.is_test || self.name.starts_with(TEST_ARTIFACT_NAME_PREFIX)
    }

    /// Whether this definition belongs in the schedule table at all.
    pub fn should_schedule(&self) -> bool {
        self.is_active
            && matches!(
                self.status,
                AutomationStatus::Active | AutomationStatus::Scheduled
            )
    }
}

/// The five phases of a single execution, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    AudienceGeneration,
    TestSending,
    CancellationWindow,
    LiveExecution,
    Cleanup,
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPhase::AudienceGeneration => write!(f, "audience_generation"),
            ExecutionPhase::TestSending => write!(f, "test_sending"),
            ExecutionPhase::CancellationWindow => write!(f, "cancellation_window"),
            ExecutionPhase::LiveExecution => write!(f, "live_execution"),
            ExecutionPhase::Cleanup => write!(f, "cleanup"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Aborted => write!(f, "aborted"),
        }
    }
}

impl From<String> for ExecutionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            "aborted" => ExecutionStatus::Aborted,
            _ => ExecutionStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Success,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Success => write!(f, "success"),
        }
    }
}

/// Downstream push-send modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Dry-run the full sequence against internal test users.
    TestLiveSend,
    /// Real audiences, no actual delivery.
    RealDryRun,
    /// Real delivery.
    LiveSend,
}

impl std::fmt::Display for SendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendMode::TestLiveSend => write!(f, "test-live-send"),
            SendMode::RealDryRun => write!(f, "real-dry-run"),
            SendMode::LiveSend => write!(f, "live-send"),
        }
    }
}

/// Mutable per-execution state shared between the schedule table, the
/// active-execution table and the timeline executor.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub current_phase: ExecutionPhase,
    pub start_time: DateTime<Utc>,
    pub expected_end_time: Option<DateTime<Utc>>,
    pub audience_generated: bool,
    pub tests_sent: bool,
    pub cancellation_deadline: Option<DateTime<Utc>>,
    pub can_cancel: bool,
    pub emergency_stop_requested: bool,
}

impl ExecutionConfig {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            current_phase: ExecutionPhase::AudienceGeneration,
            start_time,
            expected_end_time: None,
            audience_generated: false,
            tests_sent: false,
            cancellation_deadline: None,
            can_cancel: false,
            emergency_stop_requested: false,
        }
    }
}
