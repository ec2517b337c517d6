//! Error types for the cellflow engine.

use thiserror::Error;

/// Errors of the graph and engine API.
///
/// Problems with a cell's content (syntax, collisions, runtime failures) are
/// not errors of the API: they are reported on the cell itself as
/// [`CellError`](crate::engine::CellError)s.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Cell '{0}' already exists")]
    DuplicateId(String),

    #[error("Unknown cell {0}")]
    UnknownCell(String),

    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("Resource '{0}' already exists")]
    DuplicateResource(String),

    #[error("Invalid reference '{0}'")]
    InvalidReference(String),

    #[error("Cell '{0}' is a range proxy and cannot be edited")]
    RangeCell(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
