//! Deferred grading task state machine.
//!
//! A credit limit submitted before its external grading data has landed is
//! parked in processing and a grading task is queued. Workers claim the
//! task, pull the enrichment, and hand the subject back to the engine for
//! routing. Transitions are deterministic so retries and crash recovery
//! never double-route a subject.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::SubjectId;

/// Subjects still in their initial status older than this are purged by the
/// cleanup sweep.
pub const STALE_SUBJECT_MAX_AGE_DAYS: i64 = 3;

pub fn sweep_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(STALE_SUBJECT_MAX_AGE_DAYS)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GradingTaskId(pub Uuid);

impl GradingTaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GradingTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GradingTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingTaskState {
    Queued,
    Running,
    Completed,
    RetryableFailed,
    FailedTerminal,
}

impl GradingTaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::RetryableFailed => "retryable_failed",
            Self::FailedTerminal => "failed_terminal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "retryable_failed" => Some(Self::RetryableFailed),
            "failed_terminal" => Some(Self::FailedTerminal),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedTerminal)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingTask {
    pub id: GradingTaskId,
    pub subject_id: SubjectId,
    pub party_code: String,
    pub state: GradingTaskState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct GradingTaskConfig {
    /// How long before a claimed task is considered stale and stealable.
    pub claim_timeout_seconds: i64,
    pub default_max_retries: u32,
    pub retry_backoff_multiplier: u32,
    pub retry_base_delay_seconds: i64,
}

impl Default for GradingTaskConfig {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: 300,
            default_max_retries: 10,
            retry_backoff_multiplier: 2,
            retry_base_delay_seconds: 2,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("invalid task transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: GradingTaskState, to: GradingTaskState, reason: String },
    #[error("task {0} already claimed by {1}")]
    ClaimConflict(GradingTaskId, String),
    #[error("task {0} not yet available for claiming")]
    NotYetAvailable(GradingTaskId),
}

/// Policy for handling a failed pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    Retry,
    FailTerminal,
}

/// Pure state machine over [`GradingTask`]. Persistence of the task rows is
/// the store's concern; this type only decides which transitions are legal
/// and how retry backoff is scheduled.
#[derive(Clone, Debug, Default)]
pub struct GradingTaskEngine {
    config: GradingTaskConfig,
}

impl GradingTaskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GradingTaskConfig) -> Self {
        Self { config }
    }

    pub fn create_task(
        &self,
        subject_id: SubjectId,
        party_code: impl Into<String>,
        now: DateTime<Utc>,
    ) -> GradingTask {
        GradingTask {
            id: GradingTaskId::new(),
            subject_id,
            party_code: party_code.into(),
            state: GradingTaskState::Queued,
            retry_count: 0,
            max_retries: self.config.default_max_retries,
            available_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transitions Queued or RetryableFailed into Running under the given
    /// worker. A Running task with an expired claim may be stolen.
    pub fn claim(
        &self,
        mut task: GradingTask,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<GradingTask, TaskError> {
        match task.state {
            GradingTaskState::Queued | GradingTaskState::RetryableFailed => {}
            GradingTaskState::Running => {
                if let Some(claimed_at) = task.claimed_at {
                    let stale_at =
                        claimed_at + Duration::seconds(self.config.claim_timeout_seconds);
                    if now < stale_at {
                        return Err(TaskError::ClaimConflict(
                            task.id,
                            task.claimed_by.clone().unwrap_or_default(),
                        ));
                    }
                }
            }
            state => {
                return Err(TaskError::InvalidTransition {
                    from: state,
                    to: GradingTaskState::Running,
                    reason: "task already in terminal state".to_string(),
                });
            }
        }

        if now < task.available_at {
            return Err(TaskError::NotYetAvailable(task.id));
        }

        task.state = GradingTaskState::Running;
        task.claimed_by = Some(worker_id.into());
        task.claimed_at = Some(now);
        task.updated_at = now;
        Ok(task)
    }

    pub fn complete(
        &self,
        mut task: GradingTask,
        now: DateTime<Utc>,
    ) -> Result<GradingTask, TaskError> {
        if task.state != GradingTaskState::Running {
            return Err(TaskError::InvalidTransition {
                from: task.state,
                to: GradingTaskState::Completed,
                reason: "only running tasks can complete".to_string(),
            });
        }

        task.state = GradingTaskState::Completed;
        task.claimed_by = None;
        task.claimed_at = None;
        task.updated_at = now;
        Ok(task)
    }

    /// Fails a running task. With [`RetryPolicy::Retry`] and retries left,
    /// the task re-queues with exponential backoff; otherwise it lands in
    /// the terminal failed state.
    pub fn fail(
        &self,
        mut task: GradingTask,
        error: impl Into<String>,
        policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<GradingTask, TaskError> {
        if task.state != GradingTaskState::Running {
            return Err(TaskError::InvalidTransition {
                from: task.state,
                to: GradingTaskState::RetryableFailed,
                reason: "only running tasks can fail".to_string(),
            });
        }

        let error = error.into();
        let should_retry =
            policy == RetryPolicy::Retry && task.retry_count < task.max_retries;

        if should_retry {
            let backoff = self.config.retry_base_delay_seconds
                * i64::from(self.config.retry_backoff_multiplier.pow(task.retry_count));
            task.state = GradingTaskState::RetryableFailed;
            task.retry_count += 1;
            task.available_at = now + Duration::seconds(backoff);
        } else {
            task.state = GradingTaskState::FailedTerminal;
        }

        task.last_error = Some(error);
        task.claimed_by = None;
        task.claimed_at = None;
        task.updated_at = now;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn queued_task(engine: &GradingTaskEngine) -> GradingTask {
        engine.create_task(SubjectId(Uuid::new_v4()), "WITP-1", now())
    }

    #[test]
    fn claim_then_complete_round_trip() {
        let engine = GradingTaskEngine::new();
        let task = queued_task(&engine);

        let running = engine.claim(task, "worker-1", now()).unwrap();
        assert_eq!(running.state, GradingTaskState::Running);
        assert_eq!(running.claimed_by.as_deref(), Some("worker-1"));

        let done = engine.complete(running, now()).unwrap();
        assert_eq!(done.state, GradingTaskState::Completed);
        assert!(done.claimed_by.is_none());
    }

    #[test]
    fn fresh_claim_cannot_be_stolen() {
        let engine = GradingTaskEngine::new();
        let running = engine.claim(queued_task(&engine), "worker-1", now()).unwrap();

        let err = engine.claim(running, "worker-2", now()).unwrap_err();
        assert!(matches!(err, TaskError::ClaimConflict(..)));
    }

    #[test]
    fn stale_claim_is_recoverable() {
        let engine = GradingTaskEngine::new();
        let running = engine.claim(queued_task(&engine), "worker-1", now()).unwrap();

        let later = now() + Duration::seconds(301);
        let stolen = engine.claim(running, "worker-2", later).unwrap();
        assert_eq!(stolen.claimed_by.as_deref(), Some("worker-2"));
    }

    #[test]
    fn failure_backs_off_exponentially() {
        let engine = GradingTaskEngine::new();
        let running = engine.claim(queued_task(&engine), "worker-1", now()).unwrap();

        let failed = engine.fail(running, "source down", RetryPolicy::Retry, now()).unwrap();
        assert_eq!(failed.state, GradingTaskState::RetryableFailed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.available_at, now() + Duration::seconds(2));

        let err = engine.claim(failed.clone(), "worker-1", now()).unwrap_err();
        assert!(matches!(err, TaskError::NotYetAvailable(_)));

        let reclaimed = engine.claim(failed, "worker-1", now() + Duration::seconds(2)).unwrap();
        let failed_again =
            engine.fail(reclaimed, "still down", RetryPolicy::Retry, now()).unwrap();
        assert_eq!(failed_again.available_at, now() + Duration::seconds(4));
    }

    #[test]
    fn retries_exhaust_into_terminal_failure() {
        let engine = GradingTaskEngine::with_config(GradingTaskConfig {
            default_max_retries: 1,
            ..GradingTaskConfig::default()
        });
        let running = engine.claim(queued_task(&engine), "worker-1", now()).unwrap();
        let failed = engine.fail(running, "boom", RetryPolicy::Retry, now()).unwrap();

        let reclaimed =
            engine.claim(failed, "worker-1", now() + Duration::seconds(10)).unwrap();
        let terminal = engine.fail(reclaimed, "boom", RetryPolicy::Retry, now()).unwrap();
        assert_eq!(terminal.state, GradingTaskState::FailedTerminal);

        let err = engine.claim(terminal, "worker-1", now()).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[test]
    fn non_retryable_failure_is_terminal_immediately() {
        let engine = GradingTaskEngine::new();
        let running = engine.claim(queued_task(&engine), "worker-1", now()).unwrap();

        let terminal =
            engine.fail(running, "bad party code", RetryPolicy::FailTerminal, now()).unwrap();
        assert_eq!(terminal.state, GradingTaskState::FailedTerminal);
        assert_eq!(terminal.retry_count, 0);
    }

    #[test]
    fn sweep_cutoff_is_three_days_back() {
        assert_eq!(sweep_cutoff(now()), now() - Duration::days(3));
    }
}
