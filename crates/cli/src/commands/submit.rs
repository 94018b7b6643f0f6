use ratify_core::config::{AppConfig, LoadOptions};
use ratify_core::engine::SubmitOutcome;

use super::{build_runtime, classify_workflow_error, open_engine, parse_subject_id, CommandResult};

pub fn run(subject: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("submit", "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match build_runtime("submit") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let subject_id = parse_subject_id(subject)?;
        let engine = open_engine(&config).await?;
        let outcome =
            engine.submit_subject(subject_id).await.map_err(classify_workflow_error)?;
        Ok::<SubmitOutcome, super::CommandFailure>(outcome)
    });

    match result {
        Ok(outcome) => {
            let message = match &outcome {
                SubmitOutcome::AutoApproved => "subject auto-approved, no chain required".to_string(),
                SubmitOutcome::Routed { process, stage, chain_len } => format!(
                    "subject routed to `{process}` at stage `{stage}` with {chain_len} approval steps"
                ),
                SubmitOutcome::DeferredToGrading { task_id } => {
                    format!("subject deferred, grading task `{task_id}` queued")
                }
            };
            let data = serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null);
            CommandResult::success_with_data("submit", message, data)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("submit", error_class, message, exit_code)
        }
    }
}
