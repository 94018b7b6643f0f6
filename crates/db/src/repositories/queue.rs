//! Row mapping and statement helpers for the approval queue.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use ratify_core::domain::{
    BindingId, ChainNode, EntryId, LifecycleStatus, QueueEntry, StepId, SubjectId, SubjectKind,
    SubjectRef,
};
use ratify_core::engine::EntryUpdate;

use super::{format_ts, parse_ts, parse_uuid, RepositoryError};

pub(crate) fn row_to_entry(row: &SqliteRow) -> Result<QueueEntry, RepositoryError> {
    let id: String = get(row, "id")?;
    let kind: String = get(row, "subject_kind")?;
    let subject_id: String = get(row, "subject_id")?;
    let status: String = get(row, "status")?;

    Ok(QueueEntry {
        id: EntryId(parse_uuid(&id)?),
        subject: SubjectRef {
            kind: SubjectKind::parse(&kind)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown kind `{kind}`")))?,
            id: SubjectId(parse_uuid(&subject_id)?),
        },
        node: ChainNode {
            binding_id: BindingId(get(row, "binding_id")?),
            step_id: StepId(get(row, "step_id")?),
            user_id: get(row, "user_id")?,
            step_codename: get(row, "step_codename")?,
            forward_step: row
                .try_get("forward_step")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?,
            backward_step: row
                .try_get("backward_step")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        },
        status: LifecycleStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status}`")))?,
        remarks: row.try_get("remarks").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        created_at: parse_ts(&get::<String>(row, "created_at")?)?,
        updated_at: parse_ts(&get::<String>(row, "updated_at")?)?,
    })
}

pub(crate) async fn fetch_entries(
    conn: &mut SqliteConnection,
    subject_id: SubjectId,
) -> Result<Vec<QueueEntry>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, subject_kind, subject_id, binding_id, step_id, user_id, step_codename,
                forward_step, backward_step, status, remarks, created_at, updated_at
         FROM approval_queue
         WHERE subject_id = ?1
         ORDER BY forward_step, created_at",
    )
    .bind(subject_id.0.to_string())
    .fetch_all(conn)
    .await?;
    rows.iter().map(row_to_entry).collect()
}

pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &QueueEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_queue
             (id, subject_kind, subject_id, binding_id, step_id, user_id, step_codename,
              forward_step, backward_step, status, remarks, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(entry.id.0.to_string())
    .bind(entry.subject.kind.as_str())
    .bind(entry.subject.id.0.to_string())
    .bind(&entry.node.binding_id.0)
    .bind(&entry.node.step_id.0)
    .bind(&entry.node.user_id)
    .bind(&entry.node.step_codename)
    .bind(entry.node.forward_step)
    .bind(entry.node.backward_step)
    .bind(entry.status.as_str())
    .bind(&entry.remarks)
    .bind(format_ts(entry.created_at))
    .bind(format_ts(entry.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_entries(
    conn: &mut SqliteConnection,
    subject_id: SubjectId,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM approval_queue WHERE subject_id = ?1")
        .bind(subject_id.0.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

/// Outcome of a guarded entry write.
pub(crate) enum EntryWrite {
    Applied,
    /// The row exists but no longer holds the status the decision expects.
    Stale,
    Missing,
}

/// Stamps one entry with a decision. The write is conditional on the
/// status the decision was authorized against, so a concurrently decided
/// row is reported instead of silently overwritten.
pub(crate) async fn update_entry_status(
    conn: &mut SqliteConnection,
    update: &EntryUpdate,
) -> Result<EntryWrite, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_queue SET status = ?2, remarks = ?3, updated_at = ?4
         WHERE id = ?1 AND status = ?5",
    )
    .bind(update.entry.0.to_string())
    .bind(update.status.as_str())
    .bind(&update.remarks)
    .bind(format_ts(update.updated_at))
    .bind(update.expected.as_str())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        return Ok(EntryWrite::Applied);
    }

    let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM approval_queue WHERE id = ?1)")
        .bind(update.entry.0.to_string())
        .fetch_one(conn)
        .await?;
    Ok(if exists == 1 { EntryWrite::Stale } else { EntryWrite::Missing })
}

fn get<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}
