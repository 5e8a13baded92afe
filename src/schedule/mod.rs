pub mod cron;
pub mod scheduler;

pub use scheduler::{AutomationScheduler, ScheduleResult, ScheduledEntryView};
