//! Cell data structures.
//!
//! A [`Cell`] is one node of the [`CellGraph`](super::CellGraph): a plain
//! cell carrying an expression or a literal, or a range cell standing in for a
//! range reference. The engine owns all mutable state; hosts read it through
//! the getters.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cell_ref::{RangeRef, qualify};
use super::context::{Analysis, InputRef};
use super::value::Value;

/// Opaque cell handle. Assigned in insertion order and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub(crate) u64);

impl CellId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    /// Not analysed since the last content change.
    #[default]
    Unknown,
    /// Inputs are available, evaluation can be scheduled.
    Ready,
    /// Blocked on inputs, or evaluation in flight.
    Waiting,
    Ok,
    Broken,
    Failed,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Unknown => "unknown",
            CellStatus::Ready => "ready",
            CellStatus::Waiting => "waiting",
            CellStatus::Ok => "ok",
            CellStatus::Broken => "broken",
            CellStatus::Failed => "failed",
        }
    }

    /// `Broken` or `Failed`.
    pub fn is_error(&self) -> bool {
        matches!(self, CellStatus::Broken | CellStatus::Failed)
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Syntax,
    Context,
    Collision,
    Unresolved,
    Cycle,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Context => "context",
            ErrorKind::Collision => "collision",
            ErrorKind::Unresolved => "unresolved",
            ErrorKind::Cycle => "cycle",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem attached to a cell. Cell errors are data: they end up in
/// [`Cell::errors`], never in a Rust `Err` of the engine API.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CellError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CellError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn context(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Context, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }
}

/// Content of a plain cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellSource {
    /// Evaluated by the language context of the cell.
    Expression(String),
    /// Literal content, parsed with [`Value::parse_literal`].
    Constant(String),
}

impl CellSource {
    /// Sheet cell text: `=` introduces an expression, anything else is a
    /// literal.
    pub fn from_sheet_text(text: &str) -> Self {
        match text.trim_start().strip_prefix('=') {
            Some(expr) => CellSource::Expression(expr.trim_start().to_string()),
            None => CellSource::Constant(text.to_string()),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            CellSource::Expression(s) | CellSource::Constant(s) => s,
        }
    }

    /// Text as typed into a sheet, the inverse of [`from_sheet_text`](Self::from_sheet_text).
    pub fn sheet_text(&self) -> String {
        match self {
            CellSource::Expression(s) => format!("= {}", s),
            CellSource::Constant(s) => s.clone(),
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, CellSource::Expression(_))
    }
}

/// Everything needed to add a plain cell to the graph.
#[derive(Clone, Debug)]
pub struct CellSpec {
    pub resource: String,
    pub local: String,
    pub source: CellSource,
    /// Language override; `None` uses the resource's language.
    pub lang: Option<String>,
}

impl CellSpec {
    pub fn expression(resource: &str, local: &str, source: &str) -> Self {
        Self {
            resource: resource.to_string(),
            local: local.to_string(),
            source: CellSource::Expression(source.to_string()),
            lang: None,
        }
    }

    pub fn sheet(resource: &str, local: &str, text: &str) -> Self {
        Self {
            resource: resource.to_string(),
            local: local.to_string(),
            source: CellSource::from_sheet_text(text),
            lang: None,
        }
    }

    pub fn with_lang(mut self, lang: Option<String>) -> Self {
        self.lang = lang;
        self
    }
}

/// Partial update of a plain cell.
#[derive(Clone, Debug, Default)]
pub struct ContentPatch {
    pub source: Option<CellSource>,
    /// `Some(None)` clears the override.
    pub lang: Option<Option<String>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CellKind {
    Plain {
        source: CellSource,
        lang: Option<String>,
    },
    /// Synthetic proxy aggregating the cells of a range.
    Range { range: RangeRef },
}

/// Versions of the resolved inputs a value was computed from.
pub(crate) type InputStamp = Vec<(CellId, u64)>;

#[derive(Clone, Debug)]
pub struct Cell {
    pub(crate) id: CellId,
    pub(crate) name: String,
    pub(crate) resource: String,
    pub(crate) local: String,
    pub(crate) kind: CellKind,
    pub(crate) status: CellStatus,
    pub(crate) value: Option<Value>,
    /// Syntax or context error, cleared by a content change.
    pub(crate) static_error: Option<CellError>,
    /// Collision, cycle or unresolved; recomputed every cycle.
    pub(crate) graph_error: Option<CellError>,
    pub(crate) runtime_error: Option<CellError>,
    pub(crate) dirty: bool,
    pub(crate) analysis: Option<Analysis>,
    /// Bumped on every content change.
    pub(crate) revision: u64,
    /// Bumped whenever the value or runtime error changes.
    pub(crate) version: u64,
    /// Inputs the current value or runtime error was computed from.
    pub(crate) stamp: Option<InputStamp>,
}

impl Cell {
    pub(crate) fn new(id: CellId, resource: &str, local: &str, kind: CellKind) -> Self {
        Self {
            id,
            name: qualify(resource, local),
            resource: resource.to_string(),
            local: local.to_string(),
            kind,
            status: CellStatus::Unknown,
            value: None,
            static_error: None,
            graph_error: None,
            runtime_error: None,
            dirty: true,
            analysis: None,
            revision: 0,
            version: 0,
            stamp: None,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Qualified name, `resource!local`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Name local to the resource (`A3`, `cell1`).
    pub fn local_id(&self) -> &str {
        &self.local
    }

    pub fn kind(&self) -> &CellKind {
        &self.kind
    }

    pub fn status(&self) -> CellStatus {
        self.status
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Current errors: static first, then graph errors, then runtime.
    pub fn errors(&self) -> Vec<&CellError> {
        let runtime = match self.status {
            CellStatus::Failed => self.runtime_error.as_ref(),
            _ => None,
        };
        self.static_error
            .iter()
            .chain(self.graph_error.iter())
            .chain(runtime)
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }

    pub fn inputs(&self) -> &[InputRef] {
        self.analysis.as_ref().map(|a| a.inputs.as_slice()).unwrap_or(&[])
    }

    pub fn outputs(&self) -> &[String] {
        self.analysis.as_ref().map(|a| a.outputs.as_slice()).unwrap_or(&[])
    }

    pub fn source(&self) -> Option<&CellSource> {
        match &self.kind {
            CellKind::Plain { source, .. } => Some(source),
            CellKind::Range { .. } => None,
        }
    }

    /// Expression or literal text; the range text for range cells.
    pub fn source_text(&self) -> String {
        match &self.kind {
            CellKind::Plain { source, .. } => source.text().to_string(),
            CellKind::Range { range } => range.to_string(),
        }
    }

    /// Language override of a plain cell.
    pub fn lang(&self) -> Option<&str> {
        match &self.kind {
            CellKind::Plain { lang, .. } => lang.as_deref(),
            CellKind::Range { .. } => None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_range(&self) -> bool {
        matches!(self.kind, CellKind::Range { .. })
    }

    pub(crate) fn set_value(&mut self, value: Value, stamp: InputStamp) {
        let changed = self.runtime_error.is_some() || self.value.as_ref() != Some(&value);
        self.value = Some(value);
        self.runtime_error = None;
        self.stamp = Some(stamp);
        if changed {
            self.version += 1;
        }
    }

    pub(crate) fn set_runtime_error(&mut self, error: CellError, stamp: InputStamp) {
        let changed = self.value.is_some() || self.runtime_error.as_ref() != Some(&error);
        self.value = None;
        self.runtime_error = Some(error);
        self.stamp = Some(stamp);
        if changed {
            self.version += 1;
        }
    }

    /// Forget analysis and results after a content change.
    pub(crate) fn invalidate(&mut self) {
        self.revision += 1;
        self.dirty = true;
        self.analysis = None;
        self.static_error = None;
        self.runtime_error = None;
        self.stamp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sheet_text_classification() {
        assert_eq!(
            CellSource::from_sheet_text("= A1 * 2"),
            CellSource::Expression("A1 * 2".into())
        );
        assert_eq!(CellSource::from_sheet_text("12"), CellSource::Constant("12".into()));
        assert_eq!(CellSource::from_sheet_text("=sum(A1:B4)").sheet_text(), "= sum(A1:B4)");
    }

    #[test]
    fn test_version_only_moves_on_change() {
        let mut cell = Cell::new(
            CellId(0),
            "doc1",
            "cell1",
            CellKind::Plain {
                source: CellSource::Expression("1".into()),
                lang: None,
            },
        );
        cell.set_value(Value::Number(1.0), vec![]);
        assert_eq!(cell.version, 1);
        cell.set_value(Value::Number(1.0), vec![]);
        assert_eq!(cell.version, 1);
        cell.set_runtime_error(CellError::runtime("boom"), vec![]);
        assert_eq!(cell.version, 2);
        assert!(cell.value().is_none());
    }

    #[test]
    fn test_errors_hide_runtime_unless_failed() {
        let mut cell = Cell::new(
            CellId(3),
            "doc1",
            "cell1",
            CellKind::Plain {
                source: CellSource::Expression("1".into()),
                lang: None,
            },
        );
        cell.set_runtime_error(CellError::runtime("boom"), vec![]);
        assert!(!cell.has_errors());
        cell.status = CellStatus::Failed;
        assert_eq!(cell.errors()[0].kind, ErrorKind::Runtime);
        assert_eq!(cell.name(), "doc1!cell1");
        assert_eq!(cell.id().to_string(), "#3");
    }
}
