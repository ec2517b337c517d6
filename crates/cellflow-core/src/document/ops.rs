use tracing::{debug, info};

use cellflow_engine::engine::{CellId, CellSource, CellSpec, ContentPatch, qualify};

use super::DocumentMut;
use crate::cell::{CellInit, CellPatch};
use crate::error::{CoreError, Result};

impl DocumentMut<'_> {
    /// Insert a cell before position `index` (`index == len` appends).
    pub fn insert_cell_at(&mut self, index: usize, init: impl Into<CellInit>) -> Result<CellId> {
        let len = self.state.cells.len();
        if index > len {
            return Err(CoreError::IndexOutOfBounds { index, len });
        }
        let init = init.into();
        let local = match init.id {
            Some(local) => local,
            None => self.next_local_id(),
        };
        let spec = CellSpec::expression(&self.state.id, &local, &init.source).with_lang(init.lang);
        let id = self.engine.graph_mut().add_cell(spec)?;
        debug!(document = %self.state.id, cell = %local, index, "insert cell");
        self.state.cells.insert(index, id);
        Ok(id)
    }

    pub fn append_cell(&mut self, init: impl Into<CellInit>) -> Result<CellId> {
        let index = self.state.cells.len();
        self.insert_cell_at(index, init)
    }

    pub fn remove_cell(&mut self, local: &str) -> Result<()> {
        let id = self.cell_id(local)?;
        self.engine.graph_mut().remove_cell(id)?;
        self.state.cells.retain(|c| *c != id);
        debug!(document = %self.state.id, cell = %local, "remove cell");
        Ok(())
    }

    pub fn update_cell(&mut self, local: &str, patch: impl Into<CellPatch>) -> Result<()> {
        let id = self.cell_id(local)?;
        let patch = patch.into();
        let content = ContentPatch {
            source: patch.source.map(CellSource::Expression),
            lang: patch.lang,
        };
        self.engine.graph_mut().update_cell_content(id, content)?;
        Ok(())
    }

    /// Switch between automatic and manual execution.
    pub fn set_autorun(&mut self, autorun: bool) -> Result<()> {
        info!(document = %self.state.id, autorun, "execution mode");
        self.engine.graph_mut().set_autorun(&self.state.id, autorun)?;
        Ok(())
    }

    /// Change the default language. Cells without an override are analysed
    /// again by the new language.
    pub fn set_lang(&mut self, lang: &str) -> Result<()> {
        info!(document = %self.state.id, lang, "document language");
        self.engine.graph_mut().set_lang(&self.state.id, lang)?;
        Ok(())
    }

    /// Allow every cell of the document to run once.
    pub fn run_all(&mut self) -> Result<()> {
        self.engine.allow_resource(&self.state.id)?;
        Ok(())
    }

    pub fn cell_id(&self, local: &str) -> Result<CellId> {
        self.engine
            .graph()
            .lookup(&qualify(&self.state.id, local))
            .filter(|id| self.state.cells.contains(id))
            .ok_or_else(|| CoreError::UnknownLocalId(local.to_string()))
    }

    fn next_local_id(&mut self) -> String {
        loop {
            let local = format!("cell{}", self.state.next_auto);
            self.state.next_auto += 1;
            if !self.engine.graph().has_name(&qualify(&self.state.id, &local)) {
                return local;
            }
        }
    }
}
