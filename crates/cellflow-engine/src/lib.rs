//! cellflow_engine - reactive cell graph, scheduler and language contexts.

pub mod engine;
pub mod error;

pub use error::{EngineError, Result};
