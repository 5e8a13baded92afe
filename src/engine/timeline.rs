use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::audience::AudienceService;
use crate::automation::errors::{PushCastError, Result};
use crate::automation::models::{
    Automation, ExecutionConfig, ExecutionPhase, ExecutionStatus, LogLevel, SendMode,
};
use crate::downstream::{
    PushSendClient, SendLogSink, LIVE_SEND_TIMEOUT, TEST_SEND_TIMEOUT,
};
use crate::engine::active::{ActiveExecution, ActiveExecutionTable, ExecutionState};
use crate::engine::definitions::DefinitionStore;
use crate::engine::events::{ExecutionEvent, ExecutionEventBus, ExecutionEventKind};
use crate::engine::history::{ExecutionMetrics, HistoryTracker};
use crate::engine::progress::ProgressTracker;
use crate::schedule::scheduler::AutomationScheduler;

/// Cadence of the cancellation-window poll. Abort and emergency-stop
/// signals wake the loop earlier than the next poll.
const WINDOW_POLL_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(30);

/// Countdown log cadence inside the cancellation window, in minutes.
const COUNTDOWN_LOG_INTERVAL_MINUTES: i64 = 5;

struct ExecutionContext {
    automation: Automation,
    execution_id: String,
    state: Arc<ExecutionState>,
    cancel_token: CancellationToken,
    history_id: Option<String>,
}

/// Drives one execution through the five-phase timeline. The abort token is
/// checked at every phase boundary; a signalled token abandons the current
/// phase and finalizes the execution as aborted.
pub struct TimelineExecutor {
    progress: ProgressTracker,
    history: HistoryTracker,
    active: Arc<ActiveExecutionTable>,
    events: Arc<ExecutionEventBus>,
    audience: Arc<AudienceService>,
    downstream: Arc<PushSendClient>,
    definitions: Arc<DefinitionStore>,
    instance_id: String,
    // Set after construction; the scheduler and the executor reference each
    // other (cron ticks spawn executions, cleanup unschedules).
    scheduler: RwLock<Option<Arc<AutomationScheduler>>>,
}

impl TimelineExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        progress: ProgressTracker,
        history: HistoryTracker,
        active: Arc<ActiveExecutionTable>,
        events: Arc<ExecutionEventBus>,
        audience: Arc<AudienceService>,
        downstream: Arc<PushSendClient>,
        definitions: Arc<DefinitionStore>,
        instance_id: String,
    ) -> Self {
        Self {
            progress,
            history,
            active,
            events,
            audience,
            downstream,
            definitions,
            instance_id,
            scheduler: RwLock::new(None),
        }
    }

    pub async fn set_scheduler(&self, scheduler: Arc<AutomationScheduler>) {
        *self.scheduler.write().await = Some(scheduler);
    }

    /// Run one execution to a terminal outcome. Registration enforces the
    /// one-run-per-automation invariant; a second concurrent call for the
    /// same automation returns without side effects.
    pub async fn execute(
        self: Arc<Self>,
        automation: Automation,
        execution_id: String,
        state: Arc<ExecutionState>,
    ) {
        let automation_id = automation.id.clone();
        let automation_name = automation.name.clone();
        let start_time = Utc::now();

        // The state may be a reused per-schedule snapshot; reset it.
        *state.config.write().await = ExecutionConfig::new(start_time);

        let cancel_token = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);

        let entry = ActiveExecution {
            execution_id: execution_id.clone(),
            automation_id: automation_id.clone(),
            started_at: start_time,
            current_phase: ExecutionPhase::AudienceGeneration,
            cancel_token: cancel_token.clone(),
            state: state.clone(),
            finished_rx,
        };
        if let Err(e) = self.active.register(entry).await {
            tracing::warn!("Skipping execution {}: {}", execution_id, e);
            return;
        }

        if let Err(e) = self
            .progress
            .start_execution(
                &execution_id,
                &automation_id,
                &automation_name,
                &self.instance_id,
            )
            .await
        {
            tracing::error!(
                "Failed to create progress record for execution {}: {}",
                execution_id,
                e
            );
        }
        let history_id = self
            .history
            .track_execution_start(&automation_id, &automation_name, &self.instance_id)
            .await;

        self.log(
            &execution_id,
            &automation_id,
            LogLevel::Info,
            &ExecutionPhase::AudienceGeneration.to_string(),
            &format!("Execution started for automation '{automation_name}'"),
        )
        .await;

        let ctx = ExecutionContext {
            automation,
            execution_id: execution_id.clone(),
            state,
            cancel_token,
            history_id,
        };
        let mut metrics = ExecutionMetrics::default();
        let result = self.run_phases(&ctx, &mut metrics).await;

        let (status, final_message) = match &result {
            Ok(()) => (
                ExecutionStatus::Completed,
                format!(
                    "Automation '{}' completed successfully",
                    ctx.automation.name
                ),
            ),
            Err(PushCastError::Aborted(reason)) => {
                (ExecutionStatus::Aborted, format!("Execution aborted: {reason}"))
            }
            Err(PushCastError::EmergencyStop) => {
                (ExecutionStatus::Failed, "Emergency stop requested".to_string())
            }
            Err(e) => (ExecutionStatus::Failed, e.to_string()),
        };
        if status != ExecutionStatus::Completed {
            metrics.error_message = Some(final_message.clone());
            if let Err(e) = &result {
                metrics.error_stack = Some(format!("{e:?}"));
            }
        }

        let final_phase = ctx.state.config.read().await.current_phase;
        let final_level = match status {
            ExecutionStatus::Completed => LogLevel::Success,
            ExecutionStatus::Aborted => LogLevel::Warn,
            _ => LogLevel::Error,
        };
        self.log(
            &execution_id,
            &automation_id,
            final_level,
            &final_phase.to_string(),
            &final_message,
        )
        .await;

        if let Err(e) = self
            .progress
            .complete_execution(&execution_id, status, final_phase, &final_message)
            .await
        {
            tracing::error!(
                "Failed to finalize progress record for execution {}: {}",
                execution_id,
                e
            );
        }
        if let Some(history_id) = &ctx.history_id {
            self.history
                .track_execution_complete(history_id, status, &metrics, start_time)
                .await;
        }

        self.events.publish(ExecutionEvent {
            automation_id: automation_id.clone(),
            execution_id: execution_id.clone(),
            kind: ExecutionEventKind::Done {
                status,
                message: final_message,
            },
        });

        self.active.remove(&automation_id).await;
        let _ = finished_tx.send(true);
    }

    async fn run_phases(
        &self,
        ctx: &ExecutionContext,
        metrics: &mut ExecutionMetrics,
    ) -> Result<()> {
        self.phase_audience_generation(ctx, metrics).await?;
        self.phase_test_sending(ctx).await?;
        self.phase_cancellation_window(ctx).await?;
        self.phase_live_execution(ctx, metrics).await?;
        self.phase_cleanup(ctx).await?;
        Ok(())
    }

    /// Phase 1: generate the audience for every push in the sequence.
    async fn phase_audience_generation(
        &self,
        ctx: &ExecutionContext,
        metrics: &mut ExecutionMetrics,
    ) -> Result<()> {
        self.enter_phase(ctx, ExecutionPhase::AudienceGeneration).await?;
        let phase = ExecutionPhase::AudienceGeneration.to_string();

        let total = ctx.automation.push_sequence.len() as i32;
        let mut audience_total = 0i64;

        for (index, push) in ctx.automation.push_sequence.iter().enumerate() {
            if ctx.cancel_token.is_cancelled() {
                return Err(PushCastError::Aborted(
                    "cancelled during audience generation".to_string(),
                ));
            }

            self.log(
                &ctx.execution_id,
                &ctx.automation.id,
                LogLevel::Info,
                &phase,
                &format!(
                    "Generating audience for push '{}' ({}/{})",
                    push.id,
                    index + 1,
                    total
                ),
            )
            .await;

            match self
                .audience
                .generate_for_push(&ctx.automation, push, &ctx.execution_id)
                .await
            {
                Ok(outcome) => {
                    audience_total += outcome.audience_size;
                    self.update_progress(
                        ctx,
                        ExecutionPhase::AudienceGeneration,
                        &format!(
                            "Audience ready for push '{}': {} recipients, {} artifacts",
                            push.id, outcome.audience_size, outcome.artifact_count
                        ),
                        Some((index as i32 + 1, total)),
                    )
                    .await;
                }
                Err(e) => {
                    // The error already carries bounded subprocess output.
                    self.log(
                        &ctx.execution_id,
                        &ctx.automation.id,
                        LogLevel::Error,
                        &phase,
                        &format!("Audience generation failed for push '{}': {e}", push.id),
                    )
                    .await;
                    return Err(e);
                }
            }
        }

        metrics.audience_size = audience_total;
        ctx.state.config.write().await.audience_generated = true;
        self.log(
            &ctx.execution_id,
            &ctx.automation.id,
            LogLevel::Success,
            &phase,
            &format!("Audience generation complete for {total} push(es), {audience_total} total recipients"),
        )
        .await;
        Ok(())
    }

    /// Phase 2: a single dry-run call covering the whole sequence. The
    /// downstream service iterates the pushes itself. With dryRunFirst off
    /// the phase still transitions so observers see all five phases, only
    /// the downstream call is skipped.
    async fn phase_test_sending(&self, ctx: &ExecutionContext) -> Result<()> {
        self.enter_phase(ctx, ExecutionPhase::TestSending).await?;
        let phase = ExecutionPhase::TestSending.to_string();

        if !ctx.automation.settings.dry_run_first {
            self.log(
                &ctx.execution_id,
                &ctx.automation.id,
                LogLevel::Info,
                &phase,
                "Dry-run disabled for this automation, skipping test send",
            )
            .await;
            return Ok(());
        }

        let sink = ExecutionLogSink {
            executor: self,
            execution_id: &ctx.execution_id,
            automation_id: &ctx.automation.id,
        };
        let outcome = match self
            .downstream
            .run_send(
                &ctx.automation.id,
                SendMode::TestLiveSend,
                TEST_SEND_TIMEOUT,
                &sink,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.log(
                    &ctx.execution_id,
                    &ctx.automation.id,
                    LogLevel::Error,
                    &phase,
                    &format!("Test send failed: {e}"),
                )
                .await;
                return Err(e);
            }
        };

        if !outcome.success {
            self.log(
                &ctx.execution_id,
                &ctx.automation.id,
                LogLevel::Error,
                &phase,
                &format!("Test send failed: {}", outcome.message),
            )
            .await;
            return Err(PushCastError::Downstream(outcome.message));
        }

        ctx.state.config.write().await.tests_sent = true;
        self.log(
            &ctx.execution_id,
            &ctx.automation.id,
            LogLevel::Success,
            &phase,
            &format!("Test send complete: {}", outcome.message),
        )
        .await;
        Ok(())
    }

    /// Phase 3: hold for the cancellation window. Polls every 30 s; abort
    /// and emergency-stop signals wake the loop early.
    async fn phase_cancellation_window(&self, ctx: &ExecutionContext) -> Result<()> {
        self.enter_phase(ctx, ExecutionPhase::CancellationWindow).await?;
        let phase = ExecutionPhase::CancellationWindow.to_string();

        let window_minutes = ctx.automation.cancellation_window_minutes();
        let deadline = Utc::now() + chrono::Duration::minutes(window_minutes);
        {
            let mut config = ctx.state.config.write().await;
            config.cancellation_deadline = Some(deadline);
            config.can_cancel = true;
            config.expected_end_time = Some(deadline);
        }

        self.log(
            &ctx.execution_id,
            &ctx.automation.id,
            LogLevel::Info,
            &phase,
            &format!(
                "Cancellation window open for {} minute(s), live send at {}",
                window_minutes,
                deadline.to_rfc3339()
            ),
        )
        .await;

        let mut last_logged_minutes = -1i64;
        loop {
            if ctx.state.config.read().await.emergency_stop_requested {
                self.log(
                    &ctx.execution_id,
                    &ctx.automation.id,
                    LogLevel::Error,
                    &phase,
                    "Emergency stop requested, aborting before live send",
                )
                .await;
                return Err(PushCastError::EmergencyStop);
            }
            if ctx.cancel_token.is_cancelled() {
                return Err(PushCastError::Aborted(
                    "cancelled during cancellation window".to_string(),
                ));
            }

            let now = Utc::now();
            if now >= deadline {
                break;
            }

            let remaining = deadline - now;
            let remaining_minutes = (remaining.num_seconds() + 59) / 60;
            if remaining_minutes != last_logged_minutes
                && (remaining_minutes % COUNTDOWN_LOG_INTERVAL_MINUTES == 0
                    || remaining_minutes == 1)
            {
                self.log(
                    &ctx.execution_id,
                    &ctx.automation.id,
                    LogLevel::Info,
                    &phase,
                    &format!("{remaining_minutes} minute(s) until live send"),
                )
                .await;
                last_logged_minutes = remaining_minutes;
            }

            let chunk = remaining
                .to_std()
                .unwrap_or_default()
                .min(WINDOW_POLL_INTERVAL);
            tokio::select! {
                _ = ctx.cancel_token.cancelled() => {
                    return Err(PushCastError::Aborted(
                        "cancelled during cancellation window".to_string(),
                    ));
                }
                _ = ctx.state.stop_signal.notified() => {} // flags re-checked at loop top
                _ = tokio::time::sleep(chunk) => {}
            }
        }

        ctx.state.config.write().await.can_cancel = false;
        self.log(
            &ctx.execution_id,
            &ctx.automation.id,
            LogLevel::Success,
            &phase,
            "Cancellation window closed",
        )
        .await;
        Ok(())
    }

    /// Phase 4: the real send, again one call for the whole sequence. Test
    /// mode uses the non-delivering dry-run against real audiences.
    async fn phase_live_execution(
        &self,
        ctx: &ExecutionContext,
        metrics: &mut ExecutionMetrics,
    ) -> Result<()> {
        self.enter_phase(ctx, ExecutionPhase::LiveExecution).await?;
        let phase = ExecutionPhase::LiveExecution.to_string();

        let mode = if ctx.automation.audience_criteria.test_mode {
            SendMode::RealDryRun
        } else {
            SendMode::LiveSend
        };
        let push_count = ctx.automation.push_sequence.len() as i32;

        self.log(
            &ctx.execution_id,
            &ctx.automation.id,
            LogLevel::Info,
            &phase,
            &format!("Starting {mode} for {push_count} push(es)"),
        )
        .await;

        let sink = ExecutionLogSink {
            executor: self,
            execution_id: &ctx.execution_id,
            automation_id: &ctx.automation.id,
        };
        match self
            .downstream
            .run_send(&ctx.automation.id, mode, LIVE_SEND_TIMEOUT, &sink)
            .await
        {
            Ok(outcome) if outcome.success => {
                metrics.pushes_sent = push_count;
                self.log(
                    &ctx.execution_id,
                    &ctx.automation.id,
                    LogLevel::Success,
                    &phase,
                    &format!("Live execution complete: {}", outcome.message),
                )
                .await;
                Ok(())
            }
            Ok(outcome) => {
                metrics.pushes_failed = push_count;
                self.log(
                    &ctx.execution_id,
                    &ctx.automation.id,
                    LogLevel::Error,
                    &phase,
                    &format!("Live execution failed: {}", outcome.message),
                )
                .await;
                Err(PushCastError::Downstream(outcome.message))
            }
            Err(e) => {
                metrics.pushes_failed = push_count;
                self.log(
                    &ctx.execution_id,
                    &ctx.automation.id,
                    LogLevel::Error,
                    &phase,
                    &format!("Live execution failed: {e}"),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Phase 5: throwaway validation automations are unscheduled and their
    /// definitions deleted after a successful run.
    async fn phase_cleanup(&self, ctx: &ExecutionContext) -> Result<()> {
        self.enter_phase(ctx, ExecutionPhase::Cleanup).await?;
        let phase = ExecutionPhase::Cleanup.to_string();

        if ctx.automation.is_test_artifact() {
            self.log(
                &ctx.execution_id,
                &ctx.automation.id,
                LogLevel::Info,
                &phase,
                "Removing test automation after successful validation run",
            )
            .await;

            if let Some(scheduler) = self.scheduler.read().await.clone() {
                scheduler.unschedule(&ctx.automation.id).await;
            }
            self.definitions.delete(&ctx.automation.id).await?;
        }

        self.log(
            &ctx.execution_id,
            &ctx.automation.id,
            LogLevel::Success,
            &phase,
            "Cleanup complete",
        )
        .await;
        Ok(())
    }

    /// Phase boundary: check abort and emergency stop, then mirror the new
    /// phase into the active entry, the shared config, the progress store
    /// and the history row.
    async fn enter_phase(&self, ctx: &ExecutionContext, phase: ExecutionPhase) -> Result<()> {
        if ctx.cancel_token.is_cancelled() {
            return Err(PushCastError::Aborted(format!(
                "abort requested before {phase}"
            )));
        }
        if ctx.state.config.read().await.emergency_stop_requested {
            return Err(PushCastError::EmergencyStop);
        }

        ctx.state.config.write().await.current_phase = phase;
        self.active.set_phase(&ctx.automation.id, phase).await;
        self.update_progress(ctx, phase, &format!("Phase started: {phase}"), None)
            .await;
        if let Some(history_id) = &ctx.history_id {
            self.history.track_execution_phase(history_id, phase).await;
        }
        self.log(
            &ctx.execution_id,
            &ctx.automation.id,
            LogLevel::Info,
            &phase.to_string(),
            &format!("Phase started: {phase}"),
        )
        .await;
        Ok(())
    }

    async fn update_progress(
        &self,
        ctx: &ExecutionContext,
        phase: ExecutionPhase,
        message: &str,
        progress: Option<(i32, i32)>,
    ) {
        if let Err(e) = self
            .progress
            .update_progress(
                &ctx.execution_id,
                ExecutionStatus::Running,
                phase,
                message,
                progress,
            )
            .await
        {
            tracing::error!(
                "Failed to update progress for execution {}: {}",
                ctx.execution_id,
                e
            );
        }
        self.events.publish(ExecutionEvent {
            automation_id: ctx.automation.id.clone(),
            execution_id: ctx.execution_id.clone(),
            kind: ExecutionEventKind::Progress {
                status: ExecutionStatus::Running,
                phase,
                progress_current: progress.map(|(current, _)| current),
                progress_total: progress.map(|(_, total)| total),
                message: Some(message.to_string()),
            },
        });
    }

    /// Append to the durable log, publish to live observers, and echo into
    /// process logs. Bookkeeping failures are swallowed.
    async fn log(
        &self,
        execution_id: &str,
        automation_id: &str,
        level: LogLevel,
        phase: &str,
        message: &str,
    ) {
        if let Err(e) = self
            .progress
            .append_log(execution_id, automation_id, level, phase, message)
            .await
        {
            tracing::error!(
                "Failed to append progress log for execution {}: {}",
                execution_id,
                e
            );
        }

        self.events.publish(ExecutionEvent {
            automation_id: automation_id.to_string(),
            execution_id: execution_id.to_string(),
            kind: ExecutionEventKind::Log {
                level,
                phase: phase.to_string(),
                message: message.to_string(),
            },
        });

        match level {
            LogLevel::Error => {
                tracing::error!("[automation {}] [{}] {}", automation_id, phase, message)
            }
            LogLevel::Warn => {
                tracing::warn!("[automation {}] [{}] {}", automation_id, phase, message)
            }
            LogLevel::Debug => {
                tracing::debug!("[automation {}] [{}] {}", automation_id, phase, message)
            }
            _ => tracing::info!("[automation {}] [{}] {}", automation_id, phase, message),
        }
    }
}

/// Routes downstream `log` events into the execution log.
struct ExecutionLogSink<'a> {
    executor: &'a TimelineExecutor,
    execution_id: &'a str,
    automation_id: &'a str,
}

#[async_trait]
impl SendLogSink for ExecutionLogSink<'_> {
    async fn log(&self, level: LogLevel, stage: &str, message: &str) {
        self.executor
            .log(self.execution_id, self.automation_id, level, stage, message)
            .await;
    }
}
