use cellflow_engine::engine::{Cell, CellGraph, CellId, Engine, MINI, qualify};

use crate::cell::CellInit;

/// Everything needed to add a document to a workspace.
#[derive(Clone, Debug)]
pub struct DocumentSpec {
    pub id: String,
    /// Default language of the document's cells.
    pub lang: String,
    /// `false` puts the document in manual execution mode.
    pub autorun: bool,
    pub cells: Vec<CellInit>,
}

impl DocumentSpec {
    pub fn new(id: &str, lang: &str) -> Self {
        Self {
            id: id.to_string(),
            lang: lang.to_string(),
            autorun: true,
            cells: Vec::new(),
        }
    }

    pub fn with_autorun(mut self, autorun: bool) -> Self {
        self.autorun = autorun;
        self
    }

    pub fn with_cells<I, C>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CellInit>,
    {
        self.cells.extend(cells.into_iter().map(Into::into));
        self
    }
}

impl Default for DocumentSpec {
    fn default() -> Self {
        Self::new("doc1", MINI)
    }
}

/// Order of a document's cells.
pub(crate) struct DocumentState {
    pub(crate) id: String,
    pub(crate) cells: Vec<CellId>,
    /// Counter for generated local ids.
    pub(crate) next_auto: usize,
}

impl DocumentState {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            cells: Vec::new(),
            next_auto: 1,
        }
    }
}

/// Read access to a document.
pub struct Document<'a> {
    pub(crate) state: &'a DocumentState,
    pub(crate) graph: &'a CellGraph,
}

impl<'a> Document<'a> {
    pub fn id(&self) -> &'a str {
        &self.state.id
    }

    /// Cells in document order.
    pub fn cells(&self) -> Vec<&'a Cell> {
        let graph = self.graph;
        self.state
            .cells
            .iter()
            .filter_map(|id| graph.get_cell(*id))
            .collect()
    }

    pub fn cell_ids(&self) -> &'a [CellId] {
        &self.state.cells
    }

    /// Look a cell up by its local id.
    pub fn cell(&self, local: &str) -> Option<&'a Cell> {
        self.graph
            .lookup(&qualify(&self.state.id, local))
            .and_then(|id| self.graph.get_cell(id))
    }

    pub fn len(&self) -> usize {
        self.state.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.cells.is_empty()
    }

    pub fn autorun(&self) -> bool {
        self.graph
            .namespace(&self.state.id)
            .is_none_or(|ns| ns.autorun)
    }
}

/// Write access to a document.
pub struct DocumentMut<'a> {
    pub(crate) state: &'a mut DocumentState,
    pub(crate) engine: &'a mut Engine,
}

impl DocumentMut<'_> {
    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn as_document(&self) -> Document<'_> {
        Document {
            state: self.state,
            graph: self.engine.graph(),
        }
    }
}
