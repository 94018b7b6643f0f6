use ratify_core::config::{AppConfig, LoadOptions};
use ratify_core::engine::DecisionOutcome;
use ratify_core::gate::{Actor, GateAction};

use super::{build_runtime, classify_workflow_error, open_engine, parse_subject_id, CommandResult};

pub fn run(
    subject: &str,
    user: &str,
    roles: &[String],
    action: &str,
    remarks: Option<String>,
) -> CommandResult {
    let gate_action = match action.to_ascii_lowercase().as_str() {
        "approve" => GateAction::Approve,
        "reject" => GateAction::Reject,
        other => {
            return CommandResult::failure(
                "decide",
                "invalid_argument",
                format!("unknown action `{other}`, expected `approve` or `reject`"),
                2,
            );
        }
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("decide", "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match build_runtime("decide") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let actor = Actor::new(user, roles.to_vec());

    let result = runtime.block_on(async {
        let subject_id = parse_subject_id(subject)?;
        let engine = open_engine(&config).await?;
        let outcome = engine
            .act_on_entry(subject_id, &actor, gate_action, remarks)
            .await
            .map_err(classify_workflow_error)?;
        Ok::<DecisionOutcome, super::CommandFailure>(outcome)
    });

    match result {
        Ok(outcome) => {
            let message = match &outcome {
                DecisionOutcome::Approved { completed: true, .. } => {
                    "approval recorded, chain complete".to_string()
                }
                DecisionOutcome::Approved { completed: false, next_stage } => format!(
                    "approval recorded, chain now waiting on `{}`",
                    next_stage.as_deref().unwrap_or("unknown")
                ),
                DecisionOutcome::Rejected => "rejection recorded, chain terminated".to_string(),
            };
            let data = serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null);
            CommandResult::success_with_data("decide", message, data)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("decide", error_class, message, exit_code)
        }
    }
}
