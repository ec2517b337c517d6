//! Language context contract.
//!
//! A [`LanguageContext`] knows one expression language: it can analyse an
//! expression into its inputs and outputs, and execute it given the values of
//! those inputs. Both operations are asynchronous so a context may live in
//! another process. Contexts are looked up by language name through a
//! [`Host`].

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;

use super::cell::CellError;
use super::cell_ref::{BROKEN_REF, CellRef, RangeRef, qualify};
use super::deps::{RefTarget, RefToken};
use super::value::Value;

/// One input of an analysed expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InputRef {
    /// `A1` or `sheet1!A1`. Unqualified references belong to the resource of
    /// the cell that contains them.
    Cell {
        resource: Option<String>,
        cell: CellRef,
    },
    /// `A1:B2` or `sheet1!A1:B2`, normalized.
    Range {
        resource: Option<String>,
        range: RangeRef,
    },
    /// A free variable, provided by a cell of the same resource that binds it.
    Symbol(String),
    /// The broken-reference marker.
    Broken,
}

impl InputRef {
    /// Key under which the value of this input is passed to
    /// [`LanguageContext::execute`]: the reference as written (ranges
    /// normalized) or the symbol name.
    pub fn key(&self) -> String {
        match self {
            InputRef::Cell { resource, cell } => with_resource(resource, &cell.to_string()),
            InputRef::Range { resource, range } => with_resource(resource, &range.to_string()),
            InputRef::Symbol(name) => name.clone(),
            InputRef::Broken => BROKEN_REF.to_string(),
        }
    }
}

fn with_resource(resource: &Option<String>, local: &str) -> String {
    match resource {
        Some(resource) => qualify(resource, local),
        None => local.to_string(),
    }
}

impl From<RefToken> for InputRef {
    fn from(token: RefToken) -> Self {
        match token.target {
            RefTarget::Cell(cell) => InputRef::Cell {
                resource: token.resource,
                cell,
            },
            RefTarget::Range(range) => InputRef::Range {
                resource: token.resource,
                range: range.normalized(),
            },
            RefTarget::Broken => InputRef::Broken,
        }
    }
}

/// Result of analysing an expression.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Analysis {
    pub inputs: Vec<InputRef>,
    /// Names bound by the expression.
    pub outputs: Vec<String>,
}

pub type AnalyzeFuture = BoxFuture<'static, Result<Analysis, CellError>>;
pub type ExecuteFuture = BoxFuture<'static, Result<Value, CellError>>;

/// Capability interface of an expression language.
///
/// `analyze` fails with `syntax` (or `context` if the backend is gone);
/// `execute` fails with `runtime`.
pub trait LanguageContext: Send + Sync {
    fn analyze(&self, source: &str) -> AnalyzeFuture;

    fn execute(&self, source: &str, inputs: HashMap<String, Value>) -> ExecuteFuture;
}

/// Resolves language names to contexts.
pub trait Host: Send + Sync {
    /// Fails with a `context` error when no context serves `lang`.
    fn context(&self, lang: &str) -> Result<Arc<dyn LanguageContext>, CellError>;
}

/// A [`Host`] backed by a concurrent map of registered contexts.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: DashMap<String, Arc<dyn LanguageContext>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, lang: &str, context: Arc<dyn LanguageContext>) {
        self.contexts.insert(lang.to_string(), context);
    }

    /// Drop the context for `lang`. Cells of that language fail with a
    /// `context` error from then on.
    pub fn remove(&self, lang: &str) -> bool {
        self.contexts.remove(lang).is_some()
    }

    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.contexts.iter().map(|e| e.key().clone()).collect();
        langs.sort();
        langs
    }
}

impl Host for ContextRegistry {
    fn context(&self, lang: &str) -> Result<Arc<dyn LanguageContext>, CellError> {
        self.contexts
            .get(lang)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CellError::context(format!("No context for language {}", lang)))
    }
}
