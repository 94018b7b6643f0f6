use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::{BindingId, StepId};
use crate::domain::subject::{LifecycleStatus, SubjectRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One resolved element of an approval chain: the approver binding plus the
/// step facts the queue and gate need without re-joining the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainNode {
    pub binding_id: BindingId,
    pub step_id: StepId,
    pub user_id: String,
    pub step_codename: String,
    pub forward_step: i32,
    pub backward_step: i32,
}

/// A materialized, per-subject instance of a chain node with its own status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub subject: SubjectRef,
    pub node: ChainNode,
    pub status: LifecycleStatus,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Current stage name for this entry, lowercased like subject stages.
    pub fn stage_name(&self) -> String {
        self.node.step_codename.to_ascii_lowercase()
    }
}

/// First pending entry of an ordered chain slice, by (forward_step,
/// created_at). Callers pass entries already ordered by the store, but the
/// scan re-derives the minimum so in-memory mutations cannot skew it.
pub fn first_pending(entries: &[QueueEntry]) -> Option<&QueueEntry> {
    entries
        .iter()
        .filter(|entry| entry.status == LifecycleStatus::Pending)
        .min_by(|a, b| {
            a.node
                .forward_step
                .cmp(&b.node.forward_step)
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::domain::catalog::{BindingId, StepId};
    use crate::domain::subject::{LifecycleStatus, SubjectId, SubjectKind, SubjectRef};

    use super::{first_pending, ChainNode, EntryId, QueueEntry};

    fn entry(forward_step: i32, status: LifecycleStatus, age_secs: i64) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            id: EntryId::new(),
            subject: SubjectRef { kind: SubjectKind::Party, id: SubjectId(Uuid::nil()) },
            node: ChainNode {
                binding_id: BindingId(format!("b-{forward_step}")),
                step_id: StepId(format!("s-{forward_step}")),
                user_id: format!("u-{forward_step}"),
                step_codename: format!("step{forward_step}"),
                forward_step,
                backward_step: forward_step,
            },
            status,
            remarks: None,
            created_at: now - Duration::seconds(age_secs),
            updated_at: now,
        }
    }

    #[test]
    fn first_pending_picks_lowest_forward_step() {
        let entries = vec![
            entry(2, LifecycleStatus::Pending, 0),
            entry(1, LifecycleStatus::Approved, 0),
            entry(3, LifecycleStatus::Pending, 0),
        ];

        let first = first_pending(&entries).expect("one pending entry");
        assert_eq!(first.node.forward_step, 2);
    }

    #[test]
    fn first_pending_breaks_ordinal_ties_by_creation_order() {
        let older = entry(1, LifecycleStatus::Pending, 60);
        let newer = entry(1, LifecycleStatus::Pending, 0);
        let entries = vec![newer, older.clone()];

        let first = first_pending(&entries).expect("pending entries");
        assert_eq!(first.id, older.id);
    }

    #[test]
    fn first_pending_is_none_when_chain_is_exhausted() {
        let entries = vec![
            entry(1, LifecycleStatus::Approved, 0),
            entry(2, LifecycleStatus::Approved, 0),
        ];
        assert!(first_pending(&entries).is_none());
    }
}
