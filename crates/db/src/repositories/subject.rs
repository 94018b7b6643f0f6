//! Row mapping and statement helpers for the subject table.
//!
//! Helpers take `&mut SqliteConnection` so callers can compose them inside
//! a surrounding transaction.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use ratify_core::domain::{
    LifecycleStatus, ProcessCode, Subject, SubjectDetail, SubjectId, SystemCode,
};

use super::{format_ts, parse_ts, parse_uuid, RepositoryError};

pub(crate) fn row_to_subject(row: &SqliteRow) -> Result<Subject, RepositoryError> {
    let id: String = get(row, "id")?;
    let status: String = get(row, "status")?;
    let detail_json: String = get(row, "detail")?;
    let lineage: Option<String> = get_opt(row, "lineage_id")?;

    let detail: SubjectDetail = serde_json::from_str(&detail_json)
        .map_err(|e| RepositoryError::Decode(format!("bad subject detail: {e}")))?;

    Ok(Subject {
        id: SubjectId(parse_uuid(&id)?),
        system: SystemCode(get(row, "system_code")?),
        process: ProcessCode(get(row, "process_code")?),
        status: LifecycleStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status}`")))?,
        stage: get_opt(row, "stage")?,
        lineage: lineage.as_deref().map(parse_uuid).transpose()?.map(SubjectId),
        history_step: row
            .try_get("history_step")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        history_stage: get_opt(row, "history_stage")?,
        stepper_index: row
            .try_get("stepper_index")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        detail,
        created_at: parse_ts(&get::<String>(row, "created_at")?)?,
        updated_at: parse_ts(&get::<String>(row, "updated_at")?)?,
    })
}

pub(crate) async fn fetch_subject(
    conn: &mut SqliteConnection,
    id: SubjectId,
) -> Result<Option<Subject>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, kind, system_code, process_code, status, stage, lineage_id,
                history_step, history_stage, stepper_index, detail, created_at, updated_at
         FROM subject WHERE id = ?1",
    )
    .bind(id.0.to_string())
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(row_to_subject).transpose()
}

pub(crate) async fn upsert_subject(
    conn: &mut SqliteConnection,
    subject: &Subject,
) -> Result<(), RepositoryError> {
    let detail_json = serde_json::to_string(&subject.detail)
        .map_err(|e| RepositoryError::Decode(format!("bad subject detail: {e}")))?;

    sqlx::query(
        "INSERT INTO subject
             (id, kind, system_code, process_code, status, stage, lineage_id,
              history_step, history_stage, stepper_index, detail, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
             kind = excluded.kind,
             system_code = excluded.system_code,
             process_code = excluded.process_code,
             status = excluded.status,
             stage = excluded.stage,
             lineage_id = excluded.lineage_id,
             history_step = excluded.history_step,
             history_stage = excluded.history_stage,
             stepper_index = excluded.stepper_index,
             detail = excluded.detail,
             updated_at = excluded.updated_at",
    )
    .bind(subject.id.0.to_string())
    .bind(subject.kind().as_str())
    .bind(&subject.system.0)
    .bind(&subject.process.0)
    .bind(subject.status.as_str())
    .bind(&subject.stage)
    .bind(subject.lineage.map(|id| id.0.to_string()))
    .bind(subject.history_step)
    .bind(&subject.history_stage)
    .bind(subject.stepper_index)
    .bind(detail_json)
    .bind(format_ts(subject.created_at))
    .bind(format_ts(subject.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Archives a superseded prior version: terminal archived status, lineage
/// repointed at the successor, history markers cleared.
pub(crate) async fn archive_prior(
    conn: &mut SqliteConnection,
    prior: SubjectId,
    successor: SubjectId,
    updated_at: &str,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE subject
         SET status = 'archived', lineage_id = ?2, history_step = NULL,
             history_stage = NULL, updated_at = ?3
         WHERE id = ?1",
    )
    .bind(prior.0.to_string())
    .bind(successor.0.to_string())
    .bind(updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn tag_prior_history(
    conn: &mut SqliteConnection,
    prior: SubjectId,
    history_step: i32,
    history_stage: &str,
    updated_at: &str,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE subject SET history_step = ?2, history_stage = ?3, updated_at = ?4
         WHERE id = ?1",
    )
    .bind(prior.0.to_string())
    .bind(history_step)
    .bind(history_stage)
    .bind(updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_stale_init_subjects(
    conn: &mut SqliteConnection,
    cutoff: &str,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query("DELETE FROM subject WHERE status = 'init' AND created_at < ?1")
        .bind(cutoff)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

fn get<T>(row: &SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn get_opt(row: &SqliteRow, column: &str) -> Result<Option<String>, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}
