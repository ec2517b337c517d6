//! cellflow-core - UI-agnostic resource model: workspace, documents, sheets.

pub mod cell;
pub mod document;
pub mod error;
pub mod sheet;
pub mod workspace;

pub use cell::{CellInit, CellPatch};
pub use document::{Document, DocumentMut, DocumentSpec};
pub use error::{CoreError, Result};
pub use sheet::{ColumnMeta, Sheet, SheetMut, SheetSpec};
pub use workspace::{DEFAULT_MAX_CYCLES, Workspace};

pub use cellflow_engine::engine::{CellRef, CellStatus, ErrorKind, Value};
