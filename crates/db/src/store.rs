//! SQLite-backed [`WorkflowStore`].
//!
//! Compound operations (`replace_chain`, `apply_transition`,
//! `defer_for_grading`) run inside a single transaction so a crash mid-way
//! never leaves a subject disagreeing with its queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use ratify_core::catalog::ApprovalCatalog;
use ratify_core::domain::{QueueEntry, Subject, SubjectId};
use ratify_core::engine::{StoreError, TransitionPlan, WorkflowStore};
use ratify_core::executor::SideEffect;
use ratify_core::tasks::GradingTask;

use crate::repositories::{
    catalog::SqlCatalogRepository, format_ts, queue, subject, tasks, RepositoryError,
};
use crate::DbPool;

pub struct SqlWorkflowStore {
    pool: DbPool,
    catalog: SqlCatalogRepository,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        let catalog = SqlCatalogRepository::new(pool.clone());
        Self { pool, catalog }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn apply_side_effects(
        conn: &mut sqlx::SqliteConnection,
        successor: SubjectId,
        side_effects: &[SideEffect],
        now: &str,
    ) -> Result<(), RepositoryError> {
        for effect in side_effects {
            match effect {
                SideEffect::ArchivePrior { prior, successor: next } => {
                    debug!(prior = %prior, successor = %next, "archiving prior subject");
                    subject::archive_prior(conn, *prior, *next, now).await?;
                }
                SideEffect::TagPriorHistory { prior, history_step, history_stage } => {
                    debug!(prior = %prior, successor = %successor, "tagging prior history");
                    subject::tag_prior_history(conn, *prior, *history_step, history_stage, now)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn load_catalog(&self) -> Result<ApprovalCatalog, StoreError> {
        self.catalog.load().await.map_err(StoreError::from)
    }

    async fn load_subject(&self, id: SubjectId) -> Result<Subject, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        subject::fetch_subject(&mut conn, id)
            .await
            .map_err(StoreError::from)?
            .ok_or(StoreError::SubjectNotFound(id))
    }

    async fn save_subject(&self, subject: &Subject) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        subject::upsert_subject(&mut conn, subject).await.map_err(StoreError::from)
    }

    async fn entries(&self, subject_id: SubjectId) -> Result<Vec<QueueEntry>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        queue::fetch_entries(&mut conn, subject_id).await.map_err(StoreError::from)
    }

    async fn replace_chain(
        &self,
        subject_row: &Subject,
        entries: &[QueueEntry],
        side_effects: &[SideEffect],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let now = format_ts(subject_row.updated_at);

        subject::upsert_subject(&mut tx, subject_row).await.map_err(StoreError::from)?;
        queue::delete_entries(&mut tx, subject_row.id).await.map_err(StoreError::from)?;
        for entry in entries {
            queue::insert_entry(&mut tx, entry).await.map_err(StoreError::from)?;
        }
        Self::apply_side_effects(&mut tx, subject_row.id, side_effects, &now)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(backend)
    }

    async fn apply_transition(&self, plan: &TransitionPlan) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let now = format_ts(plan.subject.updated_at);

        for update in &plan.entry_updates {
            match queue::update_entry_status(&mut tx, update).await.map_err(StoreError::from)? {
                queue::EntryWrite::Applied => {}
                queue::EntryWrite::Stale => return Err(StoreError::EntryConflict(update.entry)),
                queue::EntryWrite::Missing => return Err(StoreError::EntryNotFound(update.entry)),
            }
        }
        subject::upsert_subject(&mut tx, &plan.subject).await.map_err(StoreError::from)?;
        Self::apply_side_effects(&mut tx, plan.subject.id, &plan.side_effects, &now)
            .await
            .map_err(StoreError::from)?;

        tx.commit().await.map_err(backend)
    }

    async fn defer_for_grading(
        &self,
        subject_row: &Subject,
        task: &GradingTask,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        subject::upsert_subject(&mut tx, subject_row).await.map_err(StoreError::from)?;
        tasks::upsert_task(&mut tx, task).await.map_err(StoreError::from)?;
        tx.commit().await.map_err(backend)
    }

    async fn save_grading_task(&self, task: &GradingTask) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        tasks::upsert_task(&mut conn, task).await.map_err(StoreError::from)
    }

    async fn due_grading_tasks(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<GradingTask>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        tasks::fetch_due(&mut conn, &format_ts(now), limit).await.map_err(StoreError::from)
    }

    async fn purge_stale_subjects(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        subject::delete_stale_init_subjects(&mut conn, &format_ts(cutoff))
            .await
            .map_err(StoreError::from)
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
