//! Row mapping and statement helpers for deferred grading tasks.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use ratify_core::domain::SubjectId;
use ratify_core::tasks::{GradingTask, GradingTaskId, GradingTaskState};

use super::{format_ts, parse_opt_ts, parse_ts, parse_uuid, RepositoryError};

pub(crate) fn row_to_task(row: &SqliteRow) -> Result<GradingTask, RepositoryError> {
    let id: String = get(row, "id")?;
    let subject_id: String = get(row, "subject_id")?;
    let state: String = get(row, "state")?;
    let retry_count: i64 = get_i64(row, "retry_count")?;
    let max_retries: i64 = get_i64(row, "max_retries")?;
    let claimed_at: Option<String> =
        row.try_get("claimed_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(GradingTask {
        id: GradingTaskId(parse_uuid(&id)?),
        subject_id: SubjectId(parse_uuid(&subject_id)?),
        party_code: get(row, "party_code")?,
        state: GradingTaskState::parse(&state)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown task state `{state}`")))?,
        retry_count: retry_count as u32,
        max_retries: max_retries as u32,
        available_at: parse_ts(&get::<String>(row, "available_at")?)?,
        claimed_by: row
            .try_get("claimed_by")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        claimed_at: parse_opt_ts(claimed_at)?,
        last_error: row
            .try_get("last_error")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        created_at: parse_ts(&get::<String>(row, "created_at")?)?,
        updated_at: parse_ts(&get::<String>(row, "updated_at")?)?,
    })
}

pub(crate) async fn upsert_task(
    conn: &mut SqliteConnection,
    task: &GradingTask,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO grading_task
             (id, subject_id, party_code, state, retry_count, max_retries, available_at,
              claimed_by, claimed_at, last_error, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
             state = excluded.state,
             retry_count = excluded.retry_count,
             max_retries = excluded.max_retries,
             available_at = excluded.available_at,
             claimed_by = excluded.claimed_by,
             claimed_at = excluded.claimed_at,
             last_error = excluded.last_error,
             updated_at = excluded.updated_at",
    )
    .bind(task.id.0.to_string())
    .bind(task.subject_id.0.to_string())
    .bind(&task.party_code)
    .bind(task.state.as_str())
    .bind(task.retry_count as i64)
    .bind(task.max_retries as i64)
    .bind(format_ts(task.available_at))
    .bind(&task.claimed_by)
    .bind(task.claimed_at.map(format_ts))
    .bind(&task.last_error)
    .bind(format_ts(task.created_at))
    .bind(format_ts(task.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Tasks eligible for claiming at `now`: queued or awaiting a retry whose
/// backoff has elapsed, oldest schedule first. Running tasks with a stale
/// claim are recovered by the claim path, not here.
pub(crate) async fn fetch_due(
    conn: &mut SqliteConnection,
    now: &str,
    limit: u32,
) -> Result<Vec<GradingTask>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, subject_id, party_code, state, retry_count, max_retries, available_at,
                claimed_by, claimed_at, last_error, created_at, updated_at
         FROM grading_task
         WHERE state IN ('queued', 'retryable_failed') AND available_at <= ?1
         ORDER BY available_at
         LIMIT ?2",
    )
    .bind(now)
    .bind(limit as i64)
    .fetch_all(conn)
    .await?;
    rows.iter().map(row_to_task).collect()
}

fn get<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn get_i64(row: &SqliteRow, column: &str) -> Result<i64, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}
