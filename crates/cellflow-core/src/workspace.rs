//! The workspace: one engine and the documents and sheets living in it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use cellflow_engine::engine::{CycleReport, Engine, Host, Namespace};

use crate::document::{Document, DocumentMut, DocumentSpec, DocumentState};
use crate::error::{CoreError, Result};
use crate::sheet::{Sheet, SheetMut, SheetSpec, SheetState};

/// Default bound for [`Workspace::play`].
pub const DEFAULT_MAX_CYCLES: usize = 1000;

/// Owns the engine and the layout of every resource.
///
/// Edits through documents and sheets are applied to the graph right away,
/// in call order. Their effects are computed by the following cycles.
pub struct Workspace {
    engine: Engine,
    documents: HashMap<String, DocumentState>,
    sheets: HashMap<String, SheetState>,
}

impl Workspace {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self::with_engine(Engine::new(host))
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine,
            documents: HashMap::new(),
            sheets: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Run one engine cycle.
    pub fn cycle(&mut self) -> CycleReport {
        self.engine.cycle()
    }

    pub fn needs_update(&self) -> bool {
        self.engine.needs_update()
    }

    /// Cycle until nothing is left to do. Returns the number of cycles run.
    pub fn play(&mut self, max_cycles: usize) -> usize {
        self.engine.run_until_quiescent(max_cycles)
    }

    pub fn add_document(&mut self, spec: DocumentSpec) -> Result<()> {
        let namespace = Namespace::document(&spec.lang).with_autorun(spec.autorun);
        self.engine.graph_mut().add_namespace(&spec.id, namespace)?;
        self.documents
            .insert(spec.id.clone(), DocumentState::new(&spec.id));
        info!(document = %spec.id, lang = %spec.lang, cells = spec.cells.len(), "add document");

        let id = spec.id;
        let filled = self.document_mut(&id).and_then(|mut doc| {
            spec.cells
                .into_iter()
                .try_for_each(|init| doc.append_cell(init).map(drop))
        });
        filled.inspect_err(|error| self.discard(&id, error))
    }

    pub fn add_sheet(&mut self, spec: SheetSpec) -> Result<()> {
        let width = spec
            .cells
            .first()
            .map(Vec::len)
            .unwrap_or(spec.columns.len());
        crate::sheet::check_widths(&spec.cells, width)?;

        self.engine
            .graph_mut()
            .add_namespace(&spec.id, Namespace::sheet(&spec.lang))?;
        let state = SheetState::new(&spec.id, width, spec.columns);
        self.engine
            .graph_mut()
            .set_column_names(&spec.id, state.column_names())?;
        self.sheets.insert(spec.id.clone(), state);
        info!(sheet = %spec.id, lang = %spec.lang, rows = spec.cells.len(), cols = width, "add sheet");

        let filled = self
            .sheet_mut(&spec.id)
            .and_then(|mut sheet| sheet.place_rows(0, spec.cells));
        filled.inspect_err(|error| self.discard(&spec.id, error))
    }

    /// Drop a resource whose creation failed part way, so that the same id
    /// can be added again.
    fn discard(&mut self, id: &str, error: &CoreError) {
        warn!(resource = %id, %error, "resource not added");
        if let Err(error) = self.engine.graph_mut().remove_namespace(id) {
            warn!(resource = %id, %error, "rollback failed");
        }
        self.documents.remove(id);
        self.sheets.remove(id);
    }

    /// Remove a document or sheet with all of its cells.
    pub fn remove_resource(&mut self, id: &str) -> Result<()> {
        self.engine.graph_mut().remove_namespace(id)?;
        self.documents.remove(id);
        self.sheets.remove(id);
        info!(resource = %id, "remove resource");
        Ok(())
    }

    pub fn document(&self, id: &str) -> Result<Document<'_>> {
        let state = self
            .documents
            .get(id)
            .ok_or_else(|| CoreError::UnknownDocument(id.to_string()))?;
        Ok(Document {
            state,
            graph: self.engine.graph(),
        })
    }

    pub fn document_mut(&mut self, id: &str) -> Result<DocumentMut<'_>> {
        let state = self
            .documents
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownDocument(id.to_string()))?;
        Ok(DocumentMut {
            state,
            engine: &mut self.engine,
        })
    }

    pub fn sheet(&self, id: &str) -> Result<Sheet<'_>> {
        let state = self
            .sheets
            .get(id)
            .ok_or_else(|| CoreError::UnknownSheet(id.to_string()))?;
        Ok(Sheet {
            state,
            graph: self.engine.graph(),
        })
    }

    pub fn sheet_mut(&mut self, id: &str) -> Result<SheetMut<'_>> {
        let state = self
            .sheets
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownSheet(id.to_string()))?;
        Ok(SheetMut {
            state,
            engine: &mut self.engine,
        })
    }

    /// Ids of all documents, sorted.
    pub fn documents(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.documents.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of all sheets, sorted.
    pub fn sheets(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sheets.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
