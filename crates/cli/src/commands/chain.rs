use ratify_core::config::{AppConfig, LoadOptions};
use ratify_core::domain::{LifecycleStatus, QueueEntry};

use super::{build_runtime, classify_workflow_error, open_engine, parse_subject_id, CommandResult};

pub fn run(subject: &str, status: Option<&str>) -> CommandResult {
    let status_filter = match status {
        Some(raw) => match LifecycleStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return CommandResult::failure(
                    "chain",
                    "invalid_argument",
                    format!("unknown status filter `{raw}`"),
                    2,
                );
            }
        },
        None => None,
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("chain", "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match build_runtime("chain") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let subject_id = parse_subject_id(subject)?;
        let engine = open_engine(&config).await?;
        let entries = engine
            .list_chain(subject_id, status_filter)
            .await
            .map_err(classify_workflow_error)?;
        Ok::<Vec<QueueEntry>, super::CommandFailure>(entries)
    });

    match result {
        Ok(entries) => {
            let message = format!("{} chain entries", entries.len());
            let data = serde_json::to_value(&entries).unwrap_or(serde_json::Value::Null);
            CommandResult::success_with_data("chain", message, data)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chain", error_class, message, exit_code)
        }
    }
}
