pub mod catalog;
pub mod queue;
pub mod subject;

pub use catalog::{ApprovalProcess, ApprovalStep, ApprovalSystem, ApproverBinding, BindingId, ProcessCode, StepId, SystemCode};
pub use queue::{first_pending, ChainNode, EntryId, QueueEntry};
pub use subject::{
    CollectionRow, Contact, CreditLimitDetail, Grade, LifecycleStatus, PartyCategory, PartyDetail,
    PartyDocuments, Subject, SubjectDetail, SubjectId, SubjectKind, SubjectRef,
};
