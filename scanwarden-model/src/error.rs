use thiserror::Error;

/// Errors produced by model constructors and merge routines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Two observations of the same asset disagree on a field that must match.
    #[error("cannot merge {field}: {left:?} does not match {right:?}")]
    MergeConflict {
        field: &'static str,
        left: String,
        right: String,
    },
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
