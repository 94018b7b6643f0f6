pub mod chain;
pub mod config;
pub mod decide;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod submit;
pub mod sweep;
pub mod worker;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use ratify_core::config::AppConfig;
use ratify_core::domain::SubjectId;
use ratify_core::engine::WorkflowEngine;
use ratify_core::errors::{InterfaceError, WorkflowError};
use ratify_core::resolver::grading::InMemoryGradingSource;
use ratify_core::resolver::PathResolver;
use ratify_core::tasks::GradingTaskEngine;
use ratify_db::{connect_with_settings, SqlWorkflowStore};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: Value) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: Some(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Shared failure triple for the async blocks: (error_class, message, exit code).
pub(crate) type CommandFailure = (&'static str, String, u8);

pub(crate) fn build_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Connects the pool and assembles a fully wired engine.
///
/// The external finance bridge is addressed by `grading.dsn`; until a client
/// for it ships, grading pulls resolve against the fixture source and yield
/// the documented defaults.
pub(crate) async fn open_engine(
    config: &AppConfig,
) -> Result<WorkflowEngine<SqlWorkflowStore>, CommandFailure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

    let resolver = PathResolver::new(Arc::new(InMemoryGradingSource::new()));
    Ok(WorkflowEngine::new(SqlWorkflowStore::new(pool), resolver)
        .with_task_engine(GradingTaskEngine::with_config(config.engine.task_config())))
}

/// Folds a `WorkflowError` through the interface classification so the CLI
/// reports the same error classes as any other surface would.
pub(crate) fn classify_workflow_error(error: WorkflowError) -> CommandFailure {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let interface = error.into_interface(correlation_id);
    let message = interface.to_string();
    match interface {
        InterfaceError::BadRequest { .. } => ("bad_request", message, 2),
        InterfaceError::Forbidden { .. } => ("forbidden", message, 6),
        InterfaceError::Conflict { .. } => ("conflict", message, 6),
        InterfaceError::ServiceUnavailable { .. } => ("backend_unavailable", message, 4),
        InterfaceError::Internal { .. } => ("engine_internal", message, 5),
    }
}

pub(crate) fn parse_subject_id(raw: &str) -> Result<SubjectId, CommandFailure> {
    raw.parse::<uuid::Uuid>()
        .map(SubjectId)
        .map_err(|error| ("invalid_argument", format!("bad subject id `{raw}`: {error}"), 2u8))
}
