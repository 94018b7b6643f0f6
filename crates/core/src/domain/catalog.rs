use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemCode(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessCode(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingId(pub String);

impl std::fmt::Display for SystemCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for ProcessCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Top-level business domain partition for workflows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSystem {
    pub code: SystemCode,
    pub display_name: String,
    pub description: Option<String>,
}

/// A named workflow variant within a system, with its own step ladder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalProcess {
    pub code: ProcessCode,
    pub display_name: String,
    pub system: SystemCode,
}

/// One rung of a process's ladder. The codename must match an actor role
/// name for gating; it is only meaningful within its (system, process).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub system: SystemCode,
    pub process: ProcessCode,
    pub codename: String,
    pub forward_step: i32,
    /// Stored for future rollback behavior; not consulted today.
    pub backward_step: i32,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Binds a user account to a step. Inactive bindings are excluded from
/// chain computation but never retroactively alter materialized queues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverBinding {
    pub id: BindingId,
    pub step_id: StepId,
    pub user_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
