use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

use crate::automation::models::{Automation, LogLevel};
use crate::automation::validation;
use crate::engine::active::{ActiveExecutionTable, ExecutionState};
use crate::engine::events::{ExecutionEvent, ExecutionEventBus, ExecutionEventKind};
use crate::engine::timeline::TimelineExecutor;
use crate::schedule::cron;

/// Upper bound on waiting for a terminated execution to finish aborting
/// before its replacement handle is installed.
const TERMINATE_WAIT: Duration = Duration::from_secs(30);

pub struct ScheduledEntry {
    handle: tokio::task::JoinHandle<()>,
    cron_expression: String,
    timezone: String,
    /// Shared with any execution fired from this entry, so control-plane
    /// flags land on the running timeline.
    state: Arc<ExecutionState>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEntryView {
    pub automation_id: String,
    pub cron_expression: String,
    pub timezone: String,
}

/// Outcome of a schedule-table operation, surfaced to callers as-is.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleResult {
    pub ok: bool,
    pub message: String,
}

impl ScheduleResult {
    fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// The schedule table: exactly one armed cron handle per scheduled
/// automation. Rescheduling replaces, never duplicates.
pub struct AutomationScheduler {
    entries: Arc<RwLock<HashMap<String, ScheduledEntry>>>,
    active: Arc<ActiveExecutionTable>,
    timeline: Arc<TimelineExecutor>,
    events: Arc<ExecutionEventBus>,
}

impl AutomationScheduler {
    pub fn new(
        active: Arc<ActiveExecutionTable>,
        timeline: Arc<TimelineExecutor>,
        events: Arc<ExecutionEventBus>,
    ) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            active,
            timeline,
            events,
        }
    }

    /// Install (or replace) the cron handle for an automation. A running
    /// execution is aborted and waited for first; validation failures leave
    /// the table untouched.
    pub async fn schedule(&self, automation: &Automation) -> ScheduleResult {
        if let Some(finished) = self.active.terminate(&automation.id, "rescheduling").await {
            self.wait_for_abort(&automation.id, finished).await;
        }

        if let Some(previous) = self.entries.write().await.remove(&automation.id) {
            previous.handle.abort();
            tracing::info!(
                "Replacing existing cron handle for automation {}",
                automation.id
            );
        }

        if let Err(e) = validation::validate_automation(automation) {
            return ScheduleResult::failure(e.to_string());
        }

        let expression = match cron::cron_expression(automation) {
            Ok(expression) => expression,
            Err(e) => return ScheduleResult::failure(e.to_string()),
        };
        let tz: Tz = match automation.schedule.timezone.parse() {
            Ok(tz) => tz,
            Err(_) => {
                return ScheduleResult::failure(format!(
                    "Invalid timezone: {}",
                    automation.schedule.timezone
                ));
            }
        };
        // Parse up front so a bad expression never leaves a dead task behind.
        if let Err(e) = cron::parse_cron(&expression) {
            return ScheduleResult::failure(e.to_string());
        }

        let state = ExecutionState::new(Utc::now());
        let handle = self.spawn_tick_task(automation.clone(), expression.clone(), tz, state.clone());

        let mut entries = self.entries.write().await;
        if let Some(displaced) = entries.insert(
            automation.id.clone(),
            ScheduledEntry {
                handle,
                cron_expression: expression.clone(),
                timezone: automation.schedule.timezone.clone(),
                state,
            },
        ) {
            // A concurrent schedule() slipped in between removal and insert.
            displaced.handle.abort();
        }
        drop(entries);

        tracing::info!(
            "Scheduled automation {} ('{}') with cron '{}' in {}",
            automation.id,
            automation.name,
            expression,
            automation.schedule.timezone
        );

        ScheduleResult::success(format!(
            "Scheduled '{}' with cron '{}' ({})",
            automation.name, expression, automation.schedule.timezone
        ))
    }

    /// One loop iteration per firing instant. Ticks that land while the
    /// automation is still executing are skipped silently; tick errors are
    /// logged loudly and never unwind.
    fn spawn_tick_task(
        &self,
        automation: Automation,
        expression: String,
        tz: Tz,
        state: Arc<ExecutionState>,
    ) -> tokio::task::JoinHandle<()> {
        let active = self.active.clone();
        let timeline = self.timeline.clone();

        tokio::spawn(async move {
            let schedule = match cron::parse_cron(&expression) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::error!(
                        "Cron task for automation {} failed to start: {}",
                        automation.id,
                        e
                    );
                    return;
                }
            };

            let mut after = Utc::now().with_timezone(&tz);
            loop {
                let next = match schedule.after(&after).next() {
                    Some(next) => next,
                    None => {
                        tracing::error!(
                            "No further firing instants for automation {}, stopping cron task",
                            automation.id
                        );
                        break;
                    }
                };

                let until = next.with_timezone(&Utc) - Utc::now();
                let sleep_duration = until.to_std().unwrap_or_default();
                tracing::debug!(
                    "Automation {} fires next at {} ({}s from now)",
                    automation.id,
                    next,
                    sleep_duration.as_secs()
                );
                sleep(sleep_duration).await;
                after = next;

                if active.is_active(&automation.id).await {
                    tracing::debug!(
                        "Automation {} is already executing, skipping tick",
                        automation.id
                    );
                    continue;
                }

                let execution_id = Uuid::new_v4().to_string();
                tracing::info!(
                    "Cron tick firing automation {} (execution {})",
                    automation.id,
                    execution_id
                );
                let timeline = timeline.clone();
                let automation = automation.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    timeline.execute(automation, execution_id, state).await;
                });
            }
        })
    }

    async fn wait_for_abort(
        &self,
        automation_id: &str,
        mut finished: tokio::sync::watch::Receiver<bool>,
    ) {
        let wait = finished.wait_for(|done| *done);
        if timeout(TERMINATE_WAIT, wait).await.is_err() {
            tracing::warn!(
                "Timed out waiting for execution of automation {} to abort",
                automation_id
            );
        }
    }

    /// Stop and release the cron handle. Idempotent: unscheduling an absent
    /// automation is a successful no-op.
    pub async fn unschedule(&self, automation_id: &str) -> ScheduleResult {
        match self.entries.write().await.remove(automation_id) {
            Some(entry) => {
                entry.handle.abort();
                tracing::info!("Unscheduled automation {}", automation_id);
                ScheduleResult::success(format!("Unscheduled automation {automation_id}"))
            }
            None => ScheduleResult::success(format!(
                "Automation {automation_id} was not scheduled"
            )),
        }
    }

    /// Unschedule plus an operator-visible event carrying the reason.
    pub async fn cancel(&self, automation_id: &str, reason: &str) -> ScheduleResult {
        let result = self.unschedule(automation_id).await;
        self.events.publish(ExecutionEvent {
            automation_id: automation_id.to_string(),
            execution_id: String::new(),
            kind: ExecutionEventKind::Log {
                level: LogLevel::Warn,
                phase: "schedule".to_string(),
                message: format!("Automation cancelled: {reason}"),
            },
        });
        tracing::info!("Cancelled automation {}: {}", automation_id, reason);
        ScheduleResult {
            ok: result.ok,
            message: format!("Cancelled: {reason}"),
        }
    }

    /// Used by the startup restorer.
    pub async fn reschedule_all(
        &self,
        automations: &[Automation],
    ) -> Vec<(String, ScheduleResult)> {
        let mut results = Vec::with_capacity(automations.len());
        for automation in automations {
            let result = self.schedule(automation).await;
            results.push((automation.id.clone(), result));
        }
        results
    }

    pub async fn is_scheduled(&self, automation_id: &str) -> bool {
        self.entries.read().await.contains_key(automation_id)
    }

    /// Shared execution state for a scheduled automation, if present.
    pub async fn execution_state(&self, automation_id: &str) -> Option<Arc<ExecutionState>> {
        self.entries
            .read()
            .await
            .get(automation_id)
            .map(|entry| entry.state.clone())
    }

    pub async fn snapshot(&self) -> Vec<ScheduledEntryView> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(automation_id, entry)| ScheduledEntryView {
                automation_id: automation_id.clone(),
                cron_expression: entry.cron_expression.clone(),
                timezone: entry.timezone.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Stop and release every cron handle. Safe to call repeatedly; after
    /// it returns no handle installed by this instance remains armed.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        for (automation_id, entry) in entries.drain() {
            entry.handle.abort();
            tracing::debug!("Released cron handle for automation {}", automation_id);
        }
        if count > 0 {
            tracing::info!("Scheduler shutdown complete, released {} cron handle(s)", count);
        } else {
            tracing::info!("Scheduler shutdown complete, no cron handles held");
        }
    }
}
