pub mod audit;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod gate;
pub mod resolver;
pub mod tasks;

pub use catalog::{ApprovalCatalog, CatalogError};
pub use domain::{
    ApprovalProcess, ApprovalStep, ApprovalSystem, ApproverBinding, BindingId, ChainNode,
    EntryId, Grade, LifecycleStatus, ProcessCode, QueueEntry, StepId, Subject, SubjectDetail,
    SubjectId, SubjectKind, SubjectRef, SystemCode,
};
pub use engine::{
    DecisionOutcome, EntryUpdate, StoreError, SubmitOutcome, TransitionPlan, WorkflowEngine,
    WorkflowStore,
};
pub use errors::{DomainError, InterfaceError, WorkflowError};
pub use executor::{ExecutorRegistry, SideEffect, SubjectExecutor};
pub use gate::{Actor, GateAction, GateDenial};
pub use resolver::{PathResolver, ResolutionEffect, ResolvedPath};
pub use tasks::{GradingTask, GradingTaskEngine, GradingTaskId, GradingTaskState};
