use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EntryId, LifecycleStatus, QueueEntry};

/// The user attempting an approval action, with every workflow role they
/// hold. A single matching role is enough to act on a step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self { user_id: user_id.into(), roles }
    }

    fn matches_codename(&self, codename: &str) -> bool {
        let key = normalize_key(codename);
        self.roles.iter().any(|role| normalize_key(role) == key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Approve,
    Reject,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateDenial {
    #[error("user `{user_id}` holds no role matching any step of this chain")]
    NoMatchingStep { user_id: String },
    #[error("step `{codename}` was already approved")]
    AlreadyApproved { codename: String },
    #[error("step `{blocked_by}` must act before `{codename}`")]
    PriorStepPending { codename: String, blocked_by: String },
}

/// Resolves which queue entry an actor is allowed to act on.
///
/// The actor's entry is the first chain-ordered PENDING entry whose step
/// codename matches one of their roles; matching entries already approved
/// count as satisfied predecessors, so a rung with several approvers stays
/// actionable for the rest of them. Approvals additionally require every
/// unmatched entry ahead of the target to be approved already. Rejections
/// skip that ordering check: any matched approver may stop the flow at any
/// point.
pub fn authorize_transition(
    entries: &[QueueEntry],
    actor: &Actor,
    action: GateAction,
) -> Result<EntryId, GateDenial> {
    let mut ordered: Vec<&QueueEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| {
        (a.node.forward_step, a.created_at).cmp(&(b.node.forward_step, b.created_at))
    });

    let mut target: Option<&QueueEntry> = None;
    let mut matched_approved: Option<&QueueEntry> = None;
    let mut blocked_by: Option<String> = None;

    for entry in &ordered {
        if actor.matches_codename(&entry.node.step_codename) {
            if entry.status == LifecycleStatus::Pending {
                target = Some(entry);
                break;
            }
            if entry.status == LifecycleStatus::Approved && matched_approved.is_none() {
                matched_approved = Some(entry);
            }
            continue;
        }
        if entry.status != LifecycleStatus::Approved && blocked_by.is_none() {
            blocked_by = Some(entry.node.step_codename.clone());
        }
    }

    let Some(target) = target else {
        if let Some(approved) = matched_approved {
            return Err(GateDenial::AlreadyApproved {
                codename: approved.node.step_codename.clone(),
            });
        }
        return Err(GateDenial::NoMatchingStep { user_id: actor.user_id.clone() });
    };

    if action == GateAction::Approve {
        if let Some(blocked_by) = blocked_by {
            return Err(GateDenial::PriorStepPending {
                codename: target.node.step_codename.clone(),
                blocked_by,
            });
        }
    }

    Ok(target.id)
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
