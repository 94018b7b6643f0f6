use sqlx::Row;

use ratify_core::catalog::ApprovalCatalog;
use ratify_core::domain::{
    ApprovalProcess, ApprovalStep, ApprovalSystem, ApproverBinding, BindingId, ProcessCode,
    StepId, SystemCode,
};

use super::{parse_ts, RepositoryError};
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Loads the full catalog. Referential problems in the stored rows
    /// surface as decode errors rather than silently dropping entries.
    pub async fn load(&self) -> Result<ApprovalCatalog, RepositoryError> {
        let system_rows =
            sqlx::query("SELECT code, display_name, description FROM approval_system")
                .fetch_all(&self.pool)
                .await?;
        let systems = system_rows
            .iter()
            .map(|row| -> Result<ApprovalSystem, RepositoryError> {
                Ok(ApprovalSystem {
                    code: SystemCode(try_get(row, "code")?),
                    display_name: try_get(row, "display_name")?,
                    description: row
                        .try_get("description")
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let process_rows =
            sqlx::query("SELECT system_code, code, display_name FROM approval_process")
                .fetch_all(&self.pool)
                .await?;
        let processes = process_rows
            .iter()
            .map(|row| -> Result<ApprovalProcess, RepositoryError> {
                Ok(ApprovalProcess {
                    code: ProcessCode(try_get(row, "code")?),
                    display_name: try_get(row, "display_name")?,
                    system: SystemCode(try_get(row, "system_code")?),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let step_rows = sqlx::query(
            "SELECT id, system_code, process_code, codename, forward_step, backward_step,
                    remarks, created_at
             FROM approval_step",
        )
        .fetch_all(&self.pool)
        .await?;
        let steps = step_rows
            .iter()
            .map(|row| -> Result<ApprovalStep, RepositoryError> {
                Ok(ApprovalStep {
                    id: StepId(try_get(row, "id")?),
                    system: SystemCode(try_get(row, "system_code")?),
                    process: ProcessCode(try_get(row, "process_code")?),
                    codename: try_get(row, "codename")?,
                    forward_step: row
                        .try_get("forward_step")
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                    backward_step: row
                        .try_get("backward_step")
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                    remarks: row
                        .try_get("remarks")
                        .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                    created_at: parse_ts(&try_get(row, "created_at")?)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let binding_rows = sqlx::query(
            "SELECT id, step_id, user_id, is_active, created_at FROM approver_binding",
        )
        .fetch_all(&self.pool)
        .await?;
        let bindings = binding_rows
            .iter()
            .map(|row| -> Result<ApproverBinding, RepositoryError> {
                let is_active: i64 = row
                    .try_get("is_active")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(ApproverBinding {
                    id: BindingId(try_get(row, "id")?),
                    step_id: StepId(try_get(row, "step_id")?),
                    user_id: try_get(row, "user_id")?,
                    is_active: is_active != 0,
                    created_at: parse_ts(&try_get(row, "created_at")?)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        ApprovalCatalog::new(systems, processes, steps, bindings)
            .map_err(|err| RepositoryError::Decode(err.to_string()))
    }
}

fn try_get(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}
