//! Error types for cellflow core.

use thiserror::Error;

use cellflow_engine::EngineError;

/// Errors of the workspace, document and sheet API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Unknown document '{0}'")]
    UnknownDocument(String),

    #[error("Unknown sheet '{0}'")]
    UnknownSheet(String),

    #[error("No cell '{0}'")]
    UnknownLocalId(String),

    #[error("Index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Invalid range '{0}'")]
    InvalidRange(String),

    #[error("Expected {expected} cells, got {found}")]
    ShapeMismatch { expected: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, CoreError>;
