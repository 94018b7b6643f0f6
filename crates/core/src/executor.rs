use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{
    LifecycleStatus, ProcessCode, QueueEntry, Subject, SubjectDetail, SubjectId, SubjectKind,
};
use crate::resolver::PROCESS_EXISTING_PARTY;

/// Store-level mutation an executor asks for on subjects other than the one
/// being finalized. Applied by the engine inside the same transaction as
/// the subject update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffect {
    /// Archive the prior version: status becomes archived, its lineage is
    /// pointed at the successor, and its history markers are cleared.
    ArchivePrior { prior: SubjectId, successor: SubjectId },
    /// Update the prior version's history markers to mirror the step
    /// currently pending on the successor.
    TagPriorHistory { prior: SubjectId, history_step: i32, history_stage: String },
}

/// Per-kind finalization policy, invoked after the gate admits a decision
/// and the queue entry has been stamped.
pub trait SubjectExecutor: Send + Sync {
    fn kind(&self) -> SubjectKind;

    /// Reacts to an approval. `next_pending` is the first still-pending
    /// entry after the stamp, or `None` when the chain is exhausted.
    fn on_approved(&self, subject: &mut Subject, next_pending: Option<&QueueEntry>)
        -> Vec<SideEffect>;

    /// Reacts to a rejection. The queue cascade has already marked every
    /// entry rejected; executors only settle the subject itself.
    fn on_rejected(&self, subject: &mut Subject) -> Vec<SideEffect> {
        subject.status = LifecycleStatus::Rejected;
        subject.stage = Some(LifecycleStatus::Rejected.as_str().to_string());
        Vec::new()
    }
}

fn advance_stage(subject: &mut Subject, next_pending: &QueueEntry) {
    subject.stage = Some(next_pending.stage_name());
    info!(subject = %subject.id, stage = ?subject.stage, "advanced to next stage");
}

fn close_approved(subject: &mut Subject) {
    subject.status = LifecycleStatus::Approved;
    subject.stage = Some(LifecycleStatus::Approved.as_str().to_string());
    info!(subject = %subject.id, "work cycle completed");
}

/// Party finalization. New parties flip onto the existing-party flow once
/// fully approved; resubmissions archive the version they supersede.
#[derive(Clone, Copy, Debug, Default)]
pub struct PartyExecutor;

impl SubjectExecutor for PartyExecutor {
    fn kind(&self) -> SubjectKind {
        SubjectKind::Party
    }

    fn on_approved(
        &self,
        subject: &mut Subject,
        next_pending: Option<&QueueEntry>,
    ) -> Vec<SideEffect> {
        let on_existing_flow = subject.process.0 == PROCESS_EXISTING_PARTY;

        let Some(next_pending) = next_pending else {
            let mut effects = Vec::new();
            if on_existing_flow {
                match subject.lineage.take() {
                    Some(prior) => {
                        effects.push(SideEffect::ArchivePrior { prior, successor: subject.id });
                    }
                    None => {
                        warn!(subject = %subject.id, "existing-party flow closed without a prior version");
                    }
                }
            } else {
                subject.process = ProcessCode(PROCESS_EXISTING_PARTY.to_string());
                if let SubjectDetail::Party(detail) = &mut subject.detail {
                    for contact in &mut detail.contacts {
                        contact.is_existing = true;
                    }
                }
                info!(subject = %subject.id, "party and contacts marked as existing");
            }

            subject.stepper_index = 0;
            close_approved(subject);
            return effects;
        };

        let mut effects = Vec::new();
        if on_existing_flow {
            if let Some(prior) = subject.lineage {
                effects.push(SideEffect::TagPriorHistory {
                    prior,
                    history_step: next_pending.node.forward_step,
                    history_stage: next_pending.stage_name(),
                });
            }
        }
        advance_stage(subject, next_pending);
        effects
    }
}

/// Stage-only finalization shared by subjects with no post-approval
/// bookkeeping beyond status and stage.
#[derive(Clone, Copy, Debug)]
pub struct StageOnlyExecutor {
    kind: SubjectKind,
}

impl StageOnlyExecutor {
    pub fn new(kind: SubjectKind) -> Self {
        Self { kind }
    }
}

impl SubjectExecutor for StageOnlyExecutor {
    fn kind(&self) -> SubjectKind {
        self.kind
    }

    fn on_approved(
        &self,
        subject: &mut Subject,
        next_pending: Option<&QueueEntry>,
    ) -> Vec<SideEffect> {
        match next_pending {
            Some(next) => advance_stage(subject, next),
            None => close_approved(subject),
        }
        Vec::new()
    }
}

/// Dispatch table from subject kind to its executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<SubjectKind, Arc<dyn SubjectExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering every built-in subject kind.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(PartyExecutor))
            .register(Arc::new(StageOnlyExecutor::new(SubjectKind::CreditLimit)))
            .register(Arc::new(StageOnlyExecutor::new(SubjectKind::ShipLocation)))
    }

    pub fn register(mut self, executor: Arc<dyn SubjectExecutor>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    pub fn get(&self, kind: SubjectKind) -> Option<&Arc<dyn SubjectExecutor>> {
        self.executors.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::domain::{
        BindingId, ChainNode, Contact, EntryId, PartyCategory, PartyDetail, PartyDocuments,
        StepId, SubjectRef, SystemCode,
    };

    fn party(process: &str, lineage: Option<SubjectId>) -> Subject {
        let now = Utc::now();
        Subject {
            id: SubjectId(Uuid::new_v4()),
            system: SystemCode("scm".to_string()),
            process: ProcessCode(process.to_string()),
            status: LifecycleStatus::Pending,
            stage: Some("incharge".to_string()),
            lineage,
            history_step: None,
            history_stage: None,
            stepper_index: 4,
            detail: SubjectDetail::Party(PartyDetail {
                category: PartyCategory::GeneralCorporate,
                documents: PartyDocuments::default(),
                contacts: vec![Contact { id: Uuid::new_v4(), has_phone: true, is_existing: false }],
            }),
            created_at: now,
            updated_at: now,
        }
    }

    fn pending_entry(subject: &Subject, codename: &str, forward: i32) -> QueueEntry {
        QueueEntry {
            id: EntryId(Uuid::new_v4()),
            subject: SubjectRef { kind: subject.kind(), id: subject.id },
            node: ChainNode {
                binding_id: BindingId("b".to_string()),
                step_id: StepId("s".to_string()),
                user_id: "u".to_string(),
                step_codename: codename.to_string(),
                forward_step: forward,
                backward_step: forward - 1,
            },
            status: LifecycleStatus::Pending,
            remarks: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn exhausted_new_party_flips_to_existing_flow() {
        let mut subject = party("new_code_all_ok", None);
        let effects = PartyExecutor.on_approved(&mut subject, None);

        assert!(effects.is_empty());
        assert_eq!(subject.process.0, PROCESS_EXISTING_PARTY);
        assert_eq!(subject.status, LifecycleStatus::Approved);
        assert_eq!(subject.stage.as_deref(), Some("approved"));
        assert_eq!(subject.stepper_index, 0);
        let SubjectDetail::Party(detail) = &subject.detail else { unreachable!() };
        assert!(detail.contacts.iter().all(|contact| contact.is_existing));
    }

    #[test]
    fn exhausted_existing_party_archives_prior() {
        let prior = SubjectId(Uuid::new_v4());
        let mut subject = party(PROCESS_EXISTING_PARTY, Some(prior));
        let effects = PartyExecutor.on_approved(&mut subject, None);

        assert_eq!(effects, vec![SideEffect::ArchivePrior { prior, successor: subject.id }]);
        assert_eq!(subject.lineage, None);
        assert_eq!(subject.status, LifecycleStatus::Approved);
    }

    #[test]
    fn existing_party_mid_chain_tags_prior_history() {
        let prior = SubjectId(Uuid::new_v4());
        let mut subject = party(PROCESS_EXISTING_PARTY, Some(prior));
        let next = pending_entry(&subject, "DHOS", 2);
        let effects = PartyExecutor.on_approved(&mut subject, Some(&next));

        assert_eq!(
            effects,
            vec![SideEffect::TagPriorHistory {
                prior,
                history_step: 2,
                history_stage: "dhos".to_string(),
            }]
        );
        assert_eq!(subject.stage.as_deref(), Some("dhos"));
        assert_eq!(subject.status, LifecycleStatus::Pending);
    }

    #[test]
    fn stage_only_executor_advances_then_closes() {
        let mut subject = party("ship_location_change", None);
        subject.detail = SubjectDetail::ShipLocation;
        let executor = StageOnlyExecutor::new(SubjectKind::ShipLocation);

        let next = pending_entry(&subject, "logistics", 2);
        assert!(executor.on_approved(&mut subject, Some(&next)).is_empty());
        assert_eq!(subject.stage.as_deref(), Some("logistics"));

        assert!(executor.on_approved(&mut subject, None).is_empty());
        assert_eq!(subject.status, LifecycleStatus::Approved);
        assert_eq!(subject.stage.as_deref(), Some("approved"));
    }

    #[test]
    fn rejection_settles_subject_terminally() {
        let mut subject = party("new_code_all_ok", None);
        let effects = PartyExecutor.on_rejected(&mut subject);

        assert!(effects.is_empty());
        assert_eq!(subject.status, LifecycleStatus::Rejected);
        assert_eq!(subject.stage.as_deref(), Some("rejected"));
    }

    #[test]
    fn default_registry_covers_all_kinds() {
        let registry = ExecutorRegistry::with_defaults();
        for kind in [SubjectKind::Party, SubjectKind::CreditLimit, SubjectKind::ShipLocation] {
            assert!(registry.get(kind).is_some());
        }
    }
}
