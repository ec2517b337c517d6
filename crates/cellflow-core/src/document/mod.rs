//! Documents: ordered sequences of cells.

mod ops;
mod state;

pub use state::{Document, DocumentMut, DocumentSpec};
pub(crate) use state::DocumentState;
