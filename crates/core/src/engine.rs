//! Workflow engine orchestration.
//!
//! Ties the catalog, path resolver, role gate, and per-kind executors
//! together behind a storage seam. Every compound mutation is expressed as
//! a plan applied by the store in one transaction, so a crash between
//! resolve and persist never leaves a half-replaced chain.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::catalog::ApprovalCatalog;
use crate::domain::{
    first_pending, EntryId, LifecycleStatus, QueueEntry, Subject, SubjectDetail, SubjectId,
};
use crate::errors::{DomainError, WorkflowError};
use crate::executor::{ExecutorRegistry, SideEffect};
use crate::gate::{authorize_transition, Actor, GateAction};
use crate::resolver::{PathResolver, ResolutionEffect};
use crate::tasks::{sweep_cutoff, GradingTask, GradingTaskEngine, RetryPolicy};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("subject `{0}` not found")]
    SubjectNotFound(SubjectId),
    #[error("queue entry `{0}` not found")]
    EntryNotFound(EntryId),
    #[error("queue entry `{0}` no longer holds the status the decision was authorized against")]
    EntryConflict(EntryId),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::SubjectNotFound(id) => Self::SubjectNotFound(id),
            StoreError::EntryConflict(id) => Self::Domain(DomainError::ConcurrentDecision(id)),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Per-entry status stamp inside a transition.
///
/// `expected` is the status the gate authorized against; the store writes
/// the update only while the row still holds it, so of two racing
/// decisions on one entry exactly one commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryUpdate {
    pub entry: EntryId,
    pub status: LifecycleStatus,
    pub expected: LifecycleStatus,
    pub remarks: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Everything a decision mutates, applied atomically by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub subject: Subject,
    pub entry_updates: Vec<EntryUpdate>,
    pub side_effects: Vec<SideEffect>,
}

/// Storage seam for the engine. Implementations must make `replace_chain`
/// and `apply_transition` transactional.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_catalog(&self) -> Result<ApprovalCatalog, StoreError>;

    async fn load_subject(&self, id: SubjectId) -> Result<Subject, StoreError>;

    async fn save_subject(&self, subject: &Subject) -> Result<(), StoreError>;

    /// All queue entries for a subject, in no particular order.
    async fn entries(&self, subject_id: SubjectId) -> Result<Vec<QueueEntry>, StoreError>;

    /// Deletes any existing entries for the subject, inserts the new chain,
    /// persists the subject, and applies the side effects, atomically.
    async fn replace_chain(
        &self,
        subject: &Subject,
        entries: &[QueueEntry],
        side_effects: &[SideEffect],
    ) -> Result<(), StoreError>;

    async fn apply_transition(&self, plan: &TransitionPlan) -> Result<(), StoreError>;

    /// Persists the parked subject and its queued grading task together.
    async fn defer_for_grading(
        &self,
        subject: &Subject,
        task: &GradingTask,
    ) -> Result<(), StoreError>;

    async fn save_grading_task(&self, task: &GradingTask) -> Result<(), StoreError>;

    async fn due_grading_tasks(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<GradingTask>, StoreError>;

    /// Deletes subjects still in their initial status created before the
    /// cutoff. Returns how many were removed.
    async fn purge_stale_subjects(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The resolved chain was empty; the subject closed approved directly.
    AutoApproved,
    /// A chain was materialized and the subject moved to its first stage.
    Routed { process: String, stage: String, chain_len: usize },
    /// Grading data is not in yet; the subject is parked and a grading
    /// task was queued.
    DeferredToGrading { task_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved { completed: bool, next_stage: Option<String> },
    Rejected,
}

pub struct WorkflowEngine<S: WorkflowStore> {
    store: S,
    resolver: PathResolver,
    executors: ExecutorRegistry,
    tasks: GradingTaskEngine,
    audit: Arc<dyn AuditSink>,
    clock: Clock,
}

impl<S: WorkflowStore> WorkflowEngine<S> {
    pub fn new(store: S, resolver: PathResolver) -> Self {
        Self {
            store,
            resolver,
            executors: ExecutorRegistry::with_defaults(),
            tasks: GradingTaskEngine::new(),
            audit: Arc::new(TracingAuditSink),
            clock: system_clock(),
        }
    }

    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_task_engine(mut self, tasks: GradingTaskEngine) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Submits a subject into its approval flow.
    ///
    /// Credit limits without pulled grading data are parked in processing
    /// and resolved later by the grading task; everything else is routed
    /// immediately.
    pub async fn submit_subject(&self, id: SubjectId) -> Result<SubmitOutcome, WorkflowError> {
        let now = (self.clock)();
        let mut subject = self.store.load_subject(id).await?;

        match subject.status {
            LifecycleStatus::Init | LifecycleStatus::Draft | LifecycleStatus::Submitted => {}
            from => {
                return Err(DomainError::InvalidLifecycleTransition {
                    from,
                    to: LifecycleStatus::Submitted,
                }
                .into());
            }
        }
        subject.status = LifecycleStatus::Submitted;
        subject.stage = None;
        subject.updated_at = now;

        if let SubjectDetail::CreditLimit(detail) = &subject.detail {
            if !detail.info_pulled {
                subject.status = LifecycleStatus::Processing;
                let task = self.tasks.create_task(subject.id, detail.party_code.clone(), now);
                self.store.defer_for_grading(&subject, &task).await?;
                info!(subject = %subject.id, task = %task.id, "submission deferred to grading");
                self.audit.emit(
                    AuditEvent::new(
                        Some(subject.subject_ref()),
                        subject.id.to_string(),
                        "grading_deferred",
                        AuditCategory::Task,
                        "engine",
                        AuditOutcome::Success,
                    )
                    .with_metadata("task_id", task.id.to_string()),
                );
                return Ok(SubmitOutcome::DeferredToGrading { task_id: task.id.to_string() });
            }
        }

        self.route_subject(subject, now).await
    }

    /// Applies an approver's decision to the subject's chain.
    pub async fn act_on_entry(
        &self,
        subject_id: SubjectId,
        actor: &Actor,
        action: GateAction,
        remarks: Option<String>,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let now = (self.clock)();
        let mut subject = self.store.load_subject(subject_id).await?;

        if matches!(
            subject.status,
            LifecycleStatus::Approved | LifecycleStatus::Rejected | LifecycleStatus::Archived
        ) {
            return Err(DomainError::InvalidLifecycleTransition {
                from: subject.status,
                to: match action {
                    GateAction::Approve => LifecycleStatus::Approved,
                    GateAction::Reject => LifecycleStatus::Rejected,
                },
            }
            .into());
        }

        let mut entries = self.store.entries(subject_id).await?;
        let target = match authorize_transition(&entries, actor, action) {
            Ok(target) => target,
            Err(denial) => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(subject.subject_ref()),
                        subject_id.to_string(),
                        "decision_denied",
                        AuditCategory::Gate,
                        actor.user_id.clone(),
                        AuditOutcome::Denied,
                    )
                    .with_metadata("reason", denial.to_string()),
                );
                return Err(denial.into());
            }
        };

        let executor = self
            .executors
            .get(subject.kind())
            .ok_or(DomainError::MissingExecutor(subject.kind()))?
            .clone();

        let outcome = match action {
            GateAction::Approve => {
                let mut entry_updates = Vec::new();
                for entry in &mut entries {
                    if entry.id == target {
                        entry.status = LifecycleStatus::Approved;
                        entry.remarks = remarks.clone();
                        entry.updated_at = now;
                        entry_updates.push(EntryUpdate {
                            entry: entry.id,
                            status: LifecycleStatus::Approved,
                            expected: LifecycleStatus::Pending,
                            remarks: remarks.clone(),
                            updated_at: now,
                        });
                    }
                }

                let next = first_pending(&entries).cloned();
                let side_effects = executor.on_approved(&mut subject, next.as_ref());
                let completed = subject.status == LifecycleStatus::Approved;
                subject.updated_at = now;

                let plan = TransitionPlan { subject: subject.clone(), entry_updates, side_effects };
                self.store.apply_transition(&plan).await?;

                DecisionOutcome::Approved { completed, next_stage: subject.stage.clone() }
            }
            GateAction::Reject => {
                // Rejection at any step terminates the whole chain.
                let mut entry_updates = Vec::new();
                for entry in &mut entries {
                    let authorized_against = entry.status;
                    entry.status = LifecycleStatus::Rejected;
                    entry.updated_at = now;
                    if entry.id == target {
                        entry.remarks = remarks.clone();
                    }
                    entry_updates.push(EntryUpdate {
                        entry: entry.id,
                        status: LifecycleStatus::Rejected,
                        expected: authorized_against,
                        remarks: entry.remarks.clone(),
                        updated_at: now,
                    });
                }

                let side_effects = executor.on_rejected(&mut subject);
                subject.updated_at = now;

                let plan = TransitionPlan { subject: subject.clone(), entry_updates, side_effects };
                self.store.apply_transition(&plan).await?;

                DecisionOutcome::Rejected
            }
        };

        self.audit.emit(
            AuditEvent::new(
                Some(subject.subject_ref()),
                subject_id.to_string(),
                match action {
                    GateAction::Approve => "entry_approved",
                    GateAction::Reject => "chain_rejected",
                },
                AuditCategory::Executor,
                actor.user_id.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("stage", subject.stage.clone().unwrap_or_default()),
        );

        Ok(outcome)
    }

    /// Ordered chain listing, optionally filtered by entry status.
    pub async fn list_chain(
        &self,
        subject_id: SubjectId,
        status: Option<LifecycleStatus>,
    ) -> Result<Vec<QueueEntry>, WorkflowError> {
        let mut entries = self.store.entries(subject_id).await?;
        if let Some(status) = status {
            entries.retain(|entry| entry.status == status);
        }
        entries.sort_by(|a, b| {
            (a.node.forward_step, a.created_at).cmp(&(b.node.forward_step, b.created_at))
        });
        Ok(entries)
    }

    /// Runs one grading task end to end: claim, pull and route, settle.
    ///
    /// Source failures re-queue the task with backoff; anything else fails
    /// it terminally so a poisoned subject cannot spin forever.
    pub async fn process_grading_task(
        &self,
        task: GradingTask,
        worker_id: &str,
    ) -> Result<GradingTask, WorkflowError> {
        let now = (self.clock)();
        let running = self.tasks.claim(task, worker_id, now).map_err(WorkflowError::from)?;
        self.store.save_grading_task(&running).await?;

        let subject_id = running.subject_id;
        let settled = match self.route_parked_subject(subject_id).await {
            Ok(_) => self.tasks.complete(running, (self.clock)())?,
            Err(err) => {
                warn!(subject = %subject_id, error = %err, "grading task attempt failed");
                let policy = match &err {
                    WorkflowError::ExternalSource(_) | WorkflowError::Persistence(_) => {
                        RetryPolicy::Retry
                    }
                    _ => RetryPolicy::FailTerminal,
                };
                self.tasks.fail(running, err.to_string(), policy, (self.clock)())?
            }
        };

        self.store.save_grading_task(&settled).await?;
        self.audit.emit(
            AuditEvent::new(
                None,
                settled.subject_id.to_string(),
                "grading_task_settled",
                AuditCategory::Task,
                worker_id.to_string(),
                if settled.state.is_terminal() && settled.last_error.is_none() {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Failed
                },
            )
            .with_metadata("state", settled.state.as_str()),
        );
        Ok(settled)
    }

    /// Claims and runs every grading task whose backoff has elapsed.
    pub async fn drain_grading_tasks(
        &self,
        worker_id: &str,
        limit: u32,
    ) -> Result<usize, WorkflowError> {
        let now = (self.clock)();
        let due = self.store.due_grading_tasks(now, limit).await?;
        let mut processed = 0;
        for task in due {
            match self.process_grading_task(task, worker_id).await {
                Ok(_) => processed += 1,
                // Lost the claim race to another worker; move on.
                Err(WorkflowError::Task(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(processed)
    }

    /// Purges subjects abandoned in their initial status.
    pub async fn sweep_stale_subjects(&self) -> Result<u64, WorkflowError> {
        let cutoff = sweep_cutoff((self.clock)());
        let removed = self.store.purge_stale_subjects(cutoff).await?;
        if removed > 0 {
            info!(removed, "purged stale subjects");
            self.audit.emit(
                AuditEvent::new(
                    None,
                    "sweep".to_string(),
                    "stale_subjects_purged",
                    AuditCategory::System,
                    "engine",
                    AuditOutcome::Success,
                )
                .with_metadata("removed", removed.to_string()),
            );
        }
        Ok(removed)
    }

    async fn route_parked_subject(&self, id: SubjectId) -> Result<SubmitOutcome, WorkflowError> {
        let now = (self.clock)();
        let subject = self.store.load_subject(id).await?;
        if subject.status != LifecycleStatus::Processing {
            return Err(DomainError::InvalidLifecycleTransition {
                from: subject.status,
                to: LifecycleStatus::Pending,
            }
            .into());
        }
        self.route_subject(subject, now).await
    }

    async fn route_subject(
        &self,
        mut subject: Subject,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, WorkflowError> {
        let catalog = self.store.load_catalog().await?;
        let resolved = self.resolver.resolve(&catalog, &subject, now).await?;

        let mut side_effects = Vec::new();
        for effect in resolved.effects {
            match effect {
                ResolutionEffect::TagPriorHistory { prior, history_step, history_stage } => {
                    side_effects.push(SideEffect::TagPriorHistory {
                        prior,
                        history_step,
                        history_stage,
                    });
                }
                ResolutionEffect::ApplyEnrichment { grade, enrichment } => {
                    if let SubjectDetail::CreditLimit(detail) = &mut subject.detail {
                        detail.grade = grade;
                        detail.overdue_days = enrichment.overdue_days;
                        detail.party_status = Some(enrichment.party_status);
                        detail.default_address = Some(enrichment.default_address);
                        detail.collections = enrichment.collections;
                        detail.info_pulled = true;
                    }
                }
            }
        }

        subject.process = resolved.process.clone();

        if resolved.chain.is_empty() {
            // Nothing to wait on: the subject closes approved outright.
            let executor = self
                .executors
                .get(subject.kind())
                .ok_or(DomainError::MissingExecutor(subject.kind()))?;
            side_effects.extend(executor.on_approved(&mut subject, None));
            subject.updated_at = now;
            self.store.replace_chain(&subject, &[], &side_effects).await?;
            info!(subject = %subject.id, "empty chain, auto-approved");
            self.audit.emit(AuditEvent::new(
                Some(subject.subject_ref()),
                subject.id.to_string(),
                "auto_approved",
                AuditCategory::Resolver,
                "engine",
                AuditOutcome::Success,
            ));
            return Ok(SubmitOutcome::AutoApproved);
        }

        let entries: Vec<QueueEntry> = resolved
            .chain
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                // Stagger stamps so same-ordinal entries keep chain order.
                let created_at = now + Duration::microseconds(idx as i64);
                QueueEntry {
                    id: EntryId::new(),
                    subject: subject.subject_ref(),
                    node: node.clone(),
                    status: LifecycleStatus::Pending,
                    remarks: None,
                    created_at,
                    updated_at: created_at,
                }
            })
            .collect();

        let stage = entries[0].stage_name();
        subject.status = LifecycleStatus::Pending;
        subject.stage = Some(stage.clone());
        subject.updated_at = now;

        self.store.replace_chain(&subject, &entries, &side_effects).await?;
        info!(
            subject = %subject.id,
            process = %subject.process.0,
            chain_len = entries.len(),
            %stage,
            "chain replaced"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(subject.subject_ref()),
                subject.id.to_string(),
                "chain_replaced",
                AuditCategory::Queue,
                "engine",
                AuditOutcome::Success,
            )
            .with_metadata("process", subject.process.0.clone())
            .with_metadata("chain_len", entries.len().to_string()),
        );

        Ok(SubmitOutcome::Routed {
            process: subject.process.0.clone(),
            stage,
            chain_len: entries.len(),
        })
    }
}
