//! Reactive cell engine API.
//!
//! - [`CellGraph`], [`Cell`], [`Namespace`] - cell storage, edges and derived status
//! - [`Engine`] - the incremental scheduler (register, evaluate, update)
//! - [`LanguageContext`], [`Host`], [`ContextRegistry`] - pluggable languages
//! - [`MiniContext`] - the built-in `mini` language on top of Rhai
//! - [`CellRef`], [`RangeRef`] - A1 notation
//! - [`transform_expression`] - reference rewriting for row/column edits
//! - [`format_value`] - display formatting of values

pub(crate) mod cell;
mod cell_ref;
pub(crate) mod context;
mod cycle;
pub(crate) mod deps;
mod format;
pub(crate) mod graph;
pub(crate) mod mini;
mod range;
mod scheduler;
mod transform;
mod value;

pub use cell::{
    Cell, CellError, CellId, CellKind, CellSource, CellSpec, CellStatus, ContentPatch, ErrorKind,
};
pub use cell_ref::{BROKEN_REF, CellRef, QUALIFIER, RangeRef, qualify, split_qualified};
pub use context::{
    Analysis, AnalyzeFuture, ContextRegistry, ExecuteFuture, Host, InputRef, LanguageContext,
};
pub use deps::{RefTarget, RefToken, extract_references, replace_references};
pub use format::{format_number, format_value};
pub use graph::{CellGraph, Namespace, ResourceKind};
pub use mini::{MINI, MiniContext, from_dynamic, to_dynamic};
pub use scheduler::{ActionKind, CycleReport, Engine};
pub use transform::{
    Dimension, RefScope, StructuralEdit, transform_expression, transform_expression_for,
};
pub use value::{Table, TableColumn, Value};

pub use rhai::Dynamic;
