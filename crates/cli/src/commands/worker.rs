use ratify_core::config::{AppConfig, LoadOptions};

use super::{build_runtime, open_engine, CommandResult};

fn init_logging(config: &AppConfig) {
    use ratify_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    // try_init so repeated invocations in one process do not panic.
    let result = match config.logging.format {
        Compact => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .compact()
            .try_init(),
        Pretty => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .pretty()
            .try_init(),
        Json => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .json()
            .try_init(),
    };
    let _ = result;
}

pub fn run(limit: u32) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("worker", "config_validation", error.to_string(), 2);
        }
    };

    init_logging(&config);

    let runtime = match build_runtime("worker") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let engine = open_engine(&config).await?;
        let processed = engine
            .drain_grading_tasks(&config.engine.worker_id, limit)
            .await
            .map_err(super::classify_workflow_error)?;
        Ok::<usize, super::CommandFailure>(processed)
    });

    match result {
        Ok(processed) => {
            let message = format!(
                "worker `{}` settled {processed} grading task(s)",
                config.engine.worker_id
            );
            CommandResult::success_with_data(
                "worker",
                message,
                serde_json::json!({ "processed": processed }),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("worker", error_class, message, exit_code)
        }
    }
}
