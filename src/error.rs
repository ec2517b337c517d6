//! Error types for the cellflow command line

use thiserror::Error;

/// Errors in the command line itself. Failing cells are reported on stdout.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("Invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("No cells given (use -c/--cell)")]
    NoCells,

    #[error("Failed to load functions from {path}: {message}")]
    Functions { path: String, message: String },
}
