//! Sheets: 2-D grids of cells with per-column metadata.
//!
//! Every position of a sheet holds a cell named after it (`A1`, `B3`). Text
//! starting with `=` is an expression, anything else a literal; empty text is
//! an empty literal. Row and column edits move cells, rename them after their
//! new position and rewrite every reference into the sheet, including the
//! ones in other resources.

mod ops;
mod state;

pub use state::{ColumnMeta, Sheet, SheetMut, SheetSpec};
pub(crate) use ops::check_widths;
pub(crate) use state::SheetState;
