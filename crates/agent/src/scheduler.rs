//! Durable delayed actions.
//!
//! [`DelayedActionScheduler`] is the write side used by event handlers: one
//! pending row per (subject, kind), re-scheduling supersedes. [`SchedulerWorker`]
//! claims due rows, hands them to an [`ActionHandler`], and settles each claim
//! as fired, retried with backoff, or failed.
//!
//! Delivery is at-least-once. Handlers re-read live state before acting and
//! report [`ActionOutcome::Skipped`] when the world has moved on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use callhook_core::clock::Clock;
use callhook_core::config::SchedulerConfig;
use callhook_core::domain::conversation::Conversation;
use callhook_core::domain::scheduled::{ActionKind, ScheduledAction};
use callhook_core::scheduling::RetryPolicy;
use callhook_db::repositories::ScheduledActionRepository;
use callhook_db::RepositoryError;

use crate::error::RuntimeError;

#[derive(Clone)]
pub struct DelayedActionScheduler {
    actions: Arc<dyn ScheduledActionRepository>,
    clock: Arc<dyn Clock>,
}

impl DelayedActionScheduler {
    pub fn new(actions: Arc<dyn ScheduledActionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { actions, clock }
    }

    pub async fn schedule(
        &self,
        subject_id: &str,
        kind: ActionKind,
        fire_at: DateTime<Utc>,
        payload: Value,
    ) -> Result<ScheduledAction, RepositoryError> {
        let action = ScheduledAction::pending(subject_id, kind, fire_at, payload, self.clock.now());
        self.actions.schedule(&action).await?;
        debug!(
            event_name = "scheduler.action.scheduled",
            action_id = %action.id,
            subject_id,
            kind = kind.as_str(),
            fire_at = %fire_at,
            "delayed action scheduled"
        );
        Ok(action)
    }

    /// Arms the next follow-up nudge, remembering the counter it was armed at
    /// and the owning business so the handler can scope its lookups.
    pub async fn schedule_follow_up(
        &self,
        conversation: &Conversation,
        fire_at: DateTime<Utc>,
    ) -> Result<ScheduledAction, RepositoryError> {
        self.schedule(
            conversation.id.as_str(),
            ActionKind::FollowUpNudge,
            fire_at,
            json!({
                "business_id": conversation.business_id.as_str(),
                "follow_up_count": conversation.follow_up_count,
            }),
        )
        .await
    }

    /// No-op when nothing is pending.
    pub async fn cancel(&self, subject_id: &str, kind: ActionKind) -> Result<u64, RepositoryError> {
        let cancelled = self.actions.cancel(subject_id, kind, self.clock.now()).await?;
        if cancelled > 0 {
            debug!(
                event_name = "scheduler.action.cancelled",
                subject_id,
                kind = kind.as_str(),
                "pending action cancelled"
            );
        }
        Ok(cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    Fired,
    /// Live state no longer matches what the action was scheduled for.
    Skipped(String),
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: &ScheduledAction) -> Result<ActionOutcome, RuntimeError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub recovered: u64,
    pub claimed: usize,
    pub fired: usize,
    pub skipped: usize,
    pub retried: usize,
    pub failed: usize,
}

pub struct SchedulerWorker {
    actions: Arc<dyn ScheduledActionRepository>,
    handler: Arc<dyn ActionHandler>,
    retry: RetryPolicy,
    batch_size: u32,
    claim_timeout: Duration,
    poll_interval: std::time::Duration,
    worker_id: String,
    clock: Arc<dyn Clock>,
}

impl SchedulerWorker {
    pub fn new(
        actions: Arc<dyn ScheduledActionRepository>,
        handler: Arc<dyn ActionHandler>,
        config: &SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            actions,
            handler,
            retry: RetryPolicy::from_config(config),
            batch_size: config.batch_size.max(1),
            claim_timeout: Duration::seconds(
                i64::try_from(config.claim_timeout_secs).unwrap_or(300),
            ),
            poll_interval: std::time::Duration::from_secs(config.poll_interval_secs.max(1)),
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            clock,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// One poll: recover stale claims, then claim and settle a batch.
    pub async fn run_once(&self) -> Result<WorkerReport, RepositoryError> {
        let now = self.clock.now();
        let mut report = WorkerReport {
            recovered: self.actions.recover_stale(now, self.claim_timeout).await?,
            ..WorkerReport::default()
        };

        let claimed = self.actions.claim_due(now, &self.worker_id, self.batch_size).await?;
        report.claimed = claimed.len();

        for action in claimed {
            match self.handler.handle(&action).await {
                Ok(outcome) => {
                    self.actions.mark_fired(&action.id, self.clock.now()).await?;
                    match outcome {
                        ActionOutcome::Fired => {
                            report.fired += 1;
                            info!(
                                event_name = "scheduler.action.fired",
                                action_id = %action.id,
                                subject_id = %action.subject_id,
                                kind = action.kind.as_str(),
                                attempts = action.attempts,
                                "delayed action fired"
                            );
                        }
                        ActionOutcome::Skipped(reason) => {
                            report.skipped += 1;
                            debug!(
                                event_name = "scheduler.action.skipped",
                                action_id = %action.id,
                                subject_id = %action.subject_id,
                                kind = action.kind.as_str(),
                                reason = %reason,
                                "delayed action no longer applies"
                            );
                        }
                    }
                }
                Err(error) => self.settle_failure(&action, &error, &mut report).await?,
            }
        }
        Ok(report)
    }

    async fn settle_failure(
        &self,
        action: &ScheduledAction,
        error: &RuntimeError,
        report: &mut WorkerReport,
    ) -> Result<(), RepositoryError> {
        let now = self.clock.now();
        let message = error.to_string();
        let retry_after = match error {
            RuntimeError::MalformedAction(_) => None,
            _ => self.retry.next_retry(action.attempts),
        };

        match retry_after {
            Some(delay) => {
                let rearmed =
                    self.actions.mark_retry(&action.id, now + delay, &message, now).await?;
                if rearmed {
                    report.retried += 1;
                }
                warn!(
                    event_name = "scheduler.action.retry",
                    action_id = %action.id,
                    subject_id = %action.subject_id,
                    kind = action.kind.as_str(),
                    attempts = action.attempts,
                    rearmed,
                    error = %message,
                    "delayed action failed; retrying"
                );
            }
            None => {
                self.actions.mark_failed(&action.id, &message, now).await?;
                report.failed += 1;
                warn!(
                    event_name = "scheduler.action.failed",
                    action_id = %action.id,
                    subject_id = %action.subject_id,
                    kind = action.kind.as_str(),
                    attempts = action.attempts,
                    error = %message,
                    "delayed action gave up"
                );
            }
        }
        Ok(())
    }

    /// Polls until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "scheduler.worker.started",
            worker_id = %self.worker_id,
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler worker started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(error) = self.run_once().await {
                warn!(
                    event_name = "scheduler.worker.poll_failed",
                    worker_id = %self.worker_id,
                    error = %error,
                    "scheduler poll failed"
                );
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!(
            event_name = "scheduler.worker.stopped",
            worker_id = %self.worker_id,
            "scheduler worker stopped"
        );
    }
}
