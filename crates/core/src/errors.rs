use thiserror::Error;

use crate::catalog::CatalogError;
use crate::domain::{EntryId, LifecycleStatus, SubjectId, SubjectKind};
use crate::gate::GateDenial;
use crate::resolver::grading::GradingSourceError;
use crate::resolver::ResolveError;
use crate::tasks::TaskError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid lifecycle transition from {from:?} to {to:?}")]
    InvalidLifecycleTransition { from: LifecycleStatus, to: LifecycleStatus },
    #[error(transparent)]
    Gate(#[from] GateDenial),
    #[error("no executor registered for subject kind {0:?}")]
    MissingExecutor(SubjectKind),
    #[error("queue entry `{0}` was decided by another actor first")]
    ConcurrentDecision(EntryId),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("subject `{0}` not found")]
    SubjectNotFound(SubjectId),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("external data source failure: {0}")]
    ExternalSource(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<GateDenial> for WorkflowError {
    fn from(value: GateDenial) -> Self {
        Self::Domain(DomainError::Gate(value))
    }
}

impl From<CatalogError> for WorkflowError {
    fn from(value: CatalogError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<GradingSourceError> for WorkflowError {
    fn from(value: GradingSourceError) -> Self {
        Self::ExternalSource(value.to_string())
    }
}

impl From<ResolveError> for WorkflowError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::Catalog(err) => err.into(),
            ResolveError::Grading(err) => err.into(),
            ResolveError::MissingLineage(id) => Self::Domain(DomainError::InvariantViolation(
                format!("subject `{id}` has no linked prior version"),
            )),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "Your role is not authorized for this approval step.",
            Self::Conflict { .. } => "This approval step was already decided.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl WorkflowError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<WorkflowError> for InterfaceError {
    fn from(value: WorkflowError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            WorkflowError::Domain(DomainError::Gate(GateDenial::AlreadyApproved { .. })) => {
                Self::Conflict {
                    message: "approval step already decided".to_owned(),
                    correlation_id: unassigned,
                }
            }
            WorkflowError::Domain(DomainError::Gate(denial)) => {
                Self::Forbidden { message: denial.to_string(), correlation_id: unassigned }
            }
            WorkflowError::Domain(DomainError::ConcurrentDecision(_)) => Self::Conflict {
                message: "approval step already decided".to_owned(),
                correlation_id: unassigned,
            },
            WorkflowError::Domain(_)
            | WorkflowError::SubjectNotFound(_)
            | WorkflowError::Task(_) => Self::BadRequest {
                message: "workflow validation failed".to_owned(),
                correlation_id: unassigned,
            },
            WorkflowError::Persistence(message) | WorkflowError::ExternalSource(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
            WorkflowError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_approval_maps_to_conflict() {
        let err = WorkflowError::from(GateDenial::AlreadyApproved {
            codename: "incharge".to_owned(),
        });
        let interface = err.into_interface("corr-1");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.user_message(), "This approval step was already decided.");
    }

    #[test]
    fn concurrent_decision_maps_to_conflict() {
        let err =
            WorkflowError::Domain(DomainError::ConcurrentDecision(EntryId(uuid::Uuid::nil())));
        assert!(matches!(InterfaceError::from(err), InterfaceError::Conflict { .. }));
    }

    #[test]
    fn gate_denial_maps_to_forbidden() {
        let err = WorkflowError::from(GateDenial::NoMatchingStep { user_id: "u1".to_owned() });
        assert!(matches!(InterfaceError::from(err), InterfaceError::Forbidden { .. }));
    }

    #[test]
    fn persistence_failure_maps_to_service_unavailable_with_correlation() {
        let interface =
            WorkflowError::Persistence("connection reset".to_owned()).into_interface("corr-9");
        match interface {
            InterfaceError::ServiceUnavailable { correlation_id, .. } => {
                assert_eq!(correlation_id, "corr-9");
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
