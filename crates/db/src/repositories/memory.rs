//! In-memory [`WorkflowStore`] for tests and demos.
//!
//! Mirrors the transactional semantics of the SQL store over locked maps.
//! Each compound operation takes every lock it touches before mutating, so
//! partial application is not observable from other tasks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use ratify_core::catalog::ApprovalCatalog;
use ratify_core::domain::{EntryId, LifecycleStatus, QueueEntry, Subject, SubjectId};
use ratify_core::engine::{StoreError, TransitionPlan, WorkflowStore};
use ratify_core::executor::SideEffect;
use ratify_core::tasks::{GradingTask, GradingTaskId, GradingTaskState};

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    catalog: RwLock<ApprovalCatalog>,
    subjects: RwLock<HashMap<SubjectId, Subject>>,
    entries: RwLock<HashMap<EntryId, QueueEntry>>,
    tasks: RwLock<HashMap<GradingTaskId, GradingTask>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: ApprovalCatalog) -> Self {
        Self { catalog: RwLock::new(catalog), ..Self::default() }
    }

    pub async fn set_catalog(&self, catalog: ApprovalCatalog) {
        *self.catalog.write().await = catalog;
    }

    pub async fn insert_subject(&self, subject: Subject) {
        self.subjects.write().await.insert(subject.id, subject);
    }

    pub async fn subject(&self, id: SubjectId) -> Option<Subject> {
        self.subjects.read().await.get(&id).cloned()
    }

    pub async fn task(&self, id: GradingTaskId) -> Option<GradingTask> {
        self.tasks.read().await.get(&id).cloned()
    }

    pub async fn subject_count(&self) -> usize {
        self.subjects.read().await.len()
    }

    fn apply_side_effects(
        subjects: &mut HashMap<SubjectId, Subject>,
        side_effects: &[SideEffect],
        now: DateTime<Utc>,
    ) {
        for effect in side_effects {
            match effect {
                SideEffect::ArchivePrior { prior, successor } => {
                    if let Some(prior_subject) = subjects.get_mut(prior) {
                        prior_subject.status = LifecycleStatus::Archived;
                        prior_subject.lineage = Some(*successor);
                        prior_subject.history_step = None;
                        prior_subject.history_stage = None;
                        prior_subject.updated_at = now;
                    }
                }
                SideEffect::TagPriorHistory { prior, history_step, history_stage } => {
                    if let Some(prior_subject) = subjects.get_mut(prior) {
                        prior_subject.history_step = Some(*history_step);
                        prior_subject.history_stage = Some(history_stage.clone());
                        prior_subject.updated_at = now;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load_catalog(&self) -> Result<ApprovalCatalog, StoreError> {
        Ok(self.catalog.read().await.clone())
    }

    async fn load_subject(&self, id: SubjectId) -> Result<Subject, StoreError> {
        self.subjects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::SubjectNotFound(id))
    }

    async fn save_subject(&self, subject: &Subject) -> Result<(), StoreError> {
        self.subjects.write().await.insert(subject.id, subject.clone());
        Ok(())
    }

    async fn entries(&self, subject_id: SubjectId) -> Result<Vec<QueueEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.subject.id == subject_id)
            .cloned()
            .collect())
    }

    async fn replace_chain(
        &self,
        subject: &Subject,
        entries: &[QueueEntry],
        side_effects: &[SideEffect],
    ) -> Result<(), StoreError> {
        let mut subjects = self.subjects.write().await;
        let mut stored_entries = self.entries.write().await;

        stored_entries.retain(|_, entry| entry.subject.id != subject.id);
        for entry in entries {
            stored_entries.insert(entry.id, entry.clone());
        }
        subjects.insert(subject.id, subject.clone());
        Self::apply_side_effects(&mut subjects, side_effects, subject.updated_at);
        Ok(())
    }

    async fn apply_transition(&self, plan: &TransitionPlan) -> Result<(), StoreError> {
        let mut subjects = self.subjects.write().await;
        let mut stored_entries = self.entries.write().await;

        for update in &plan.entry_updates {
            let entry = stored_entries
                .get_mut(&update.entry)
                .ok_or(StoreError::EntryNotFound(update.entry))?;
            if entry.status != update.expected {
                return Err(StoreError::EntryConflict(update.entry));
            }
            entry.status = update.status;
            entry.remarks = update.remarks.clone();
            entry.updated_at = update.updated_at;
        }
        subjects.insert(plan.subject.id, plan.subject.clone());
        Self::apply_side_effects(&mut subjects, &plan.side_effects, plan.subject.updated_at);
        Ok(())
    }

    async fn defer_for_grading(
        &self,
        subject: &Subject,
        task: &GradingTask,
    ) -> Result<(), StoreError> {
        let mut subjects = self.subjects.write().await;
        let mut tasks = self.tasks.write().await;
        subjects.insert(subject.id, subject.clone());
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn save_grading_task(&self, task: &GradingTask) -> Result<(), StoreError> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn due_grading_tasks(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<GradingTask>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut due: Vec<GradingTask> = tasks
            .values()
            .filter(|task| {
                matches!(
                    task.state,
                    GradingTaskState::Queued | GradingTaskState::RetryableFailed
                ) && task.available_at <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|task| task.available_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn purge_stale_subjects(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut subjects = self.subjects.write().await;
        let before = subjects.len();
        subjects.retain(|_, subject| {
            subject.status != LifecycleStatus::Init || subject.created_at >= cutoff
        });
        Ok((before - subjects.len()) as u64)
    }
}
