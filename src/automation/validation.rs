use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;

use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::{Automation, Frequency};

fn execution_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]?\d|2[0-3]):([0-5]\d)$").unwrap())
}

/// Parse a local "HH:MM" send time into (hour, minute).
pub fn parse_execution_time(value: &str) -> Result<(i64, i64)> {
    let captures = execution_time_regex().captures(value).ok_or_else(|| {
        PushCastError::InvalidAutomation(format!(
            "executionTime must be HH:MM, got '{value}'"
        ))
    })?;

    // Both groups matched the pattern above, parsing cannot fail.
    let hour = captures[1].parse::<i64>().unwrap_or(0);
    let minute = captures[2].parse::<i64>().unwrap_or(0);
    Ok((hour, minute))
}

pub fn validate_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse()
        .map_err(|_| PushCastError::InvalidAutomation(format!("Invalid timezone: {timezone}")))
}

/// Validate everything the schedule table requires before installing a cron
/// handle. No partial state is created on failure.
pub fn validate_automation(automation: &Automation) -> Result<()> {
    if automation.id.trim().is_empty() {
        return Err(PushCastError::InvalidAutomation(
            "Automation id cannot be empty".to_string(),
        ));
    }
    if automation.name.trim().is_empty() {
        return Err(PushCastError::InvalidAutomation(
            "Automation name cannot be empty".to_string(),
        ));
    }

    parse_execution_time(&automation.schedule.execution_time)?;
    validate_timezone(&automation.schedule.timezone)?;

    if automation.push_sequence.is_empty() {
        return Err(PushCastError::InvalidAutomation(
            "Push sequence cannot be empty".to_string(),
        ));
    }

    match automation.schedule.frequency {
        Frequency::Once => {
            if automation.schedule.start_date.is_none() {
                return Err(PushCastError::InvalidAutomation(
                    "One-off automations require schedule.startDate".to_string(),
                ));
            }
        }
        Frequency::Custom => {
            if automation
                .schedule
                .cron_expression
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
            {
                return Err(PushCastError::InvalidAutomation(
                    "Custom frequency requires schedule.cronExpression".to_string(),
                ));
            }
        }
        _ => {}
    }

    Ok(())
}
