use cron::Schedule as CronSchedule;
use std::str::FromStr;

use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::{Automation, Frequency};
use crate::automation::validation::parse_execution_time;

const MINUTES_PER_DAY: i64 = 1440;

// Weekly automations fire Mondays and monthly automations fire on the 1st.
pub const WEEKLY_DAY_OF_WEEK: &str = "1";
pub const MONTHLY_DAY_OF_MONTH: &str = "1";

/// Build the canonical five-field cron expression for an automation.
///
/// The expression fires at send time minus lead time; when the subtraction
/// crosses midnight the start rolls back onto the previous local day.
pub fn cron_expression(automation: &Automation) -> Result<String> {
    if automation.schedule.frequency == Frequency::Custom {
        let expr = automation
            .schedule
            .cron_expression
            .as_deref()
            .map(str::trim)
            .unwrap_or("");
        if expr.is_empty() {
            return Err(PushCastError::InvalidAutomation(
                "Custom frequency requires schedule.cronExpression".to_string(),
            ));
        }
        parse_cron(expr)?;
        return Ok(expr.to_string());
    }

    let (send_hour, send_minute) = parse_execution_time(&automation.schedule.execution_time)?;
    let send_minutes = send_hour * 60 + send_minute;
    let mut start_minutes = send_minutes - automation.lead_time_minutes();
    if start_minutes < 0 {
        start_minutes += MINUTES_PER_DAY;
    }
    let start_hour = start_minutes / 60;
    let start_minute = start_minutes % 60;

    let expr = match automation.schedule.frequency {
        Frequency::Once => {
            let start_date = automation.schedule.start_date.ok_or_else(|| {
                PushCastError::InvalidAutomation(
                    "One-off automations require schedule.startDate".to_string(),
                )
            })?;
            use chrono::Datelike;
            format!(
                "{start_minute} {start_hour} {} {} *",
                start_date.day(),
                start_date.month()
            )
        }
        Frequency::Daily => format!("{start_minute} {start_hour} * * *"),
        Frequency::Weekly => format!("{start_minute} {start_hour} * * {WEEKLY_DAY_OF_WEEK}"),
        Frequency::Monthly => format!("{start_minute} {start_hour} {MONTHLY_DAY_OF_MONTH} * *"),
        Frequency::Custom => unreachable!(),
    };

    Ok(expr)
}

/// Parse a five-field expression with the `cron` crate, which wants a
/// leading seconds field.
pub fn parse_cron(expression: &str) -> Result<CronSchedule> {
    CronSchedule::from_str(&format!("0 {expression}"))
        .map_err(|e| PushCastError::Scheduling(format!("Invalid cron expression: {e}")))
}
