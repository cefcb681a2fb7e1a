use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid {machine} transition from {from} to {to}")]
    InvalidTransition {
        machine: &'static str,
        from: String,
        to: String,
    },

    #[error("Invalid {machine} reason {reason} for state {state}")]
    InvalidReason {
        machine: &'static str,
        state: String,
        reason: String,
    },

    /// Not a failure: present the event again after `after`.
    #[error("Requeue after {after:?}: {message}")]
    RequeueAfter { after: Duration, message: String },

    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    #[error("Model error: {0}")]
    Model(#[from] scanwarden_model::ModelError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{} errors occurred; first: {}", .0.len(), first_message(.0))]
    Aggregate(Vec<OrchestratorError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn first_message(errors: &[OrchestratorError]) -> String {
    errors
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl OrchestratorError {
    pub fn requeue_after(after: Duration, message: impl Into<String>) -> Self {
        OrchestratorError::RequeueAfter {
            after,
            message: message.into(),
        }
    }

    /// Collapses a list of errors into one, or `None` when empty.
    pub fn join(mut errors: Vec<OrchestratorError>) -> Option<OrchestratorError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(OrchestratorError::Aggregate(errors)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::Backend(err) if err.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
