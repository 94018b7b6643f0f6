use ratify_core::config::{AppConfig, LoadOptions};

use super::{build_runtime, classify_workflow_error, open_engine, CommandResult};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("sweep", "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match build_runtime("sweep") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let engine = open_engine(&config).await?;
        let removed = engine.sweep_stale_subjects().await.map_err(classify_workflow_error)?;
        Ok::<u64, super::CommandFailure>(removed)
    });

    match result {
        Ok(removed) => CommandResult::success_with_data(
            "sweep",
            format!("purged {removed} stale subject(s)"),
            serde_json::json!({ "removed": removed }),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
