use thiserror::Error;

use callhook_core::errors::{ApplicationError, DomainError};
use callhook_core::flows::FlowTransitionError;
use callhook_core::patch::PatchError;
use callhook_core::ports::IntegrationError;
use callhook_db::RepositoryError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// Only surfaced where the caller needs the failure: operator sends and
    /// review messages the worker should retry.
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("outbound message blocked: {0}")]
    Blocked(String),
    #[error("scheduled action is malformed: {0}")]
    MalformedAction(String),
}

impl RuntimeError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }
}

impl From<RuntimeError> for ApplicationError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::Repository(error) => Self::Persistence(error.to_string()),
            RuntimeError::Flow(error) => Self::Domain(DomainError::FlowTransition(error)),
            RuntimeError::Patch(error) => Self::Domain(DomainError::Patch(error)),
            RuntimeError::Integration(error) => Self::Integration(error),
            RuntimeError::NotFound { entity, id } => Self::NotFound { entity, id },
            RuntimeError::Blocked(reason) | RuntimeError::MalformedAction(reason) => {
                Self::Domain(DomainError::InvariantViolation(reason))
            }
        }
    }
}
