use tracing::{debug, info};

use cellflow_engine::engine::{
    CellId, CellRef, CellSource, CellSpec, ContentPatch, RefScope, StructuralEdit,
    transform_expression_for,
};

use super::{ColumnMeta, SheetMut};
use crate::cell::{CellInit, CellPatch};
use crate::error::{CoreError, Result};

/// Every row must be `width` cells wide.
pub(crate) fn check_widths(rows: &[Vec<CellInit>], width: usize) -> Result<()> {
    match rows.iter().find(|row| row.len() != width) {
        Some(row) => Err(CoreError::ShapeMismatch {
            expected: width,
            found: row.len(),
        }),
        None => Ok(()),
    }
}

/// Exclusive end of `count` items deleted from `pos` out of `len`.
fn deleted_end(pos: usize, count: usize, len: usize) -> Result<usize> {
    match pos.checked_add(count) {
        Some(end) if end <= len => Ok(end),
        Some(end) => Err(CoreError::IndexOutOfBounds { index: end - 1, len }),
        None => Err(CoreError::IndexOutOfBounds { index: usize::MAX, len }),
    }
}

fn collect_rows<R, C>(rows: impl IntoIterator<Item = R>) -> Vec<Vec<CellInit>>
where
    R: IntoIterator<Item = C>,
    C: Into<CellInit>,
{
    rows.into_iter()
        .map(|row| row.into_iter().map(Into::into).collect())
        .collect()
}

impl SheetMut<'_> {
    pub fn update_cell(&mut self, local: &str, patch: impl Into<CellPatch>) -> Result<()> {
        let id = self.state.id_of(local)?;
        let patch = patch.into();
        let content = ContentPatch {
            source: patch.source.map(|text| CellSource::from_sheet_text(&text)),
            lang: patch.lang,
        };
        self.engine.graph_mut().update_cell_content(id, content)?;
        Ok(())
    }

    pub fn set_column_meta(&mut self, col: usize, meta: ColumnMeta) -> Result<()> {
        let len = self.state.cols;
        let slot = self
            .state
            .columns
            .get_mut(col)
            .ok_or(CoreError::IndexOutOfBounds { index: col, len })?;
        *slot = meta;
        self.sync_column_names()
    }

    /// Change the default language of the sheet's expressions.
    pub fn set_lang(&mut self, lang: &str) -> Result<()> {
        info!(sheet = %self.state.id, lang, "sheet language");
        self.engine.graph_mut().set_lang(&self.state.id, lang)?;
        Ok(())
    }

    /// Insert `rows` before row `pos`. Every row must be as wide as the sheet.
    pub fn insert_rows<R, C>(&mut self, pos: usize, rows: impl IntoIterator<Item = R>) -> Result<()>
    where
        R: IntoIterator<Item = C>,
        C: Into<CellInit>,
    {
        let rows = collect_rows(rows);
        let len = self.state.rows();
        if pos > len {
            return Err(CoreError::IndexOutOfBounds { index: pos, len });
        }
        // An empty sheet takes the width of its first rows.
        if len == 0 && self.state.cols == 0 {
            let width = rows.first().map(Vec::len).unwrap_or(0);
            self.state.cols = width;
            self.state.columns.resize(width, ColumnMeta::default());
        }
        check_widths(&rows, self.state.cols)?;
        if rows.is_empty() {
            return Ok(());
        }

        let edit = StructuralEdit::insert_rows(pos, rows.len());
        info!(sheet = %self.state.id, pos, count = rows.len(), "insert rows");
        self.rename_moved(&edit)?;
        self.rewrite_references(&edit)?;
        self.place_rows(pos, rows)
    }

    /// Delete `count` rows starting at row `pos`.
    pub fn delete_rows(&mut self, pos: usize, count: usize) -> Result<()> {
        let len = self.state.rows();
        if count == 0 {
            return Ok(());
        }
        let end = deleted_end(pos, count, len)?;

        let edit = StructuralEdit::delete_rows(pos, count);
        info!(sheet = %self.state.id, pos, count, "delete rows");
        let renames = self.moved_cells(&edit);
        let removed: Vec<CellId> = self.state.grid.drain(pos..end).flatten().collect();
        self.remove_cells(&removed)?;
        self.engine.graph_mut().rename_cells(&renames)?;
        self.rewrite_references(&edit)?;
        Ok(())
    }

    /// Insert columns before column `pos`. `cols` holds the new cells per
    /// row: one entry per sheet row, each as long as the number of columns
    /// inserted.
    pub fn insert_cols<R, C>(&mut self, pos: usize, cols: impl IntoIterator<Item = R>) -> Result<()>
    where
        R: IntoIterator<Item = C>,
        C: Into<CellInit>,
    {
        let per_row = collect_rows(cols);
        let len = self.state.cols;
        if pos > len {
            return Err(CoreError::IndexOutOfBounds { index: pos, len });
        }
        if per_row.len() != self.state.rows() {
            return Err(CoreError::ShapeMismatch {
                expected: self.state.rows(),
                found: per_row.len(),
            });
        }
        let count = per_row.first().map(Vec::len).unwrap_or(0);
        check_widths(&per_row, count)?;
        if count == 0 {
            return Ok(());
        }

        let edit = StructuralEdit::insert_cols(pos, count);
        info!(sheet = %self.state.id, pos, count, "insert columns");
        self.rename_moved(&edit)?;
        self.rewrite_references(&edit)?;

        for (row, inits) in per_row.into_iter().enumerate() {
            let mut ids = Vec::with_capacity(inits.len());
            for (i, init) in inits.into_iter().enumerate() {
                ids.push(self.create_cell(row, pos + i, init)?);
            }
            self.state.grid[row].splice(pos..pos, ids);
        }
        self.state.cols += count;
        self.state
            .columns
            .splice(pos..pos, std::iter::repeat_n(ColumnMeta::default(), count));
        self.sync_column_names()
    }

    /// Delete `count` columns starting at column `pos`.
    pub fn delete_cols(&mut self, pos: usize, count: usize) -> Result<()> {
        let len = self.state.cols;
        if count == 0 {
            return Ok(());
        }
        let end = deleted_end(pos, count, len)?;

        let edit = StructuralEdit::delete_cols(pos, count);
        info!(sheet = %self.state.id, pos, count, "delete columns");
        let renames = self.moved_cells(&edit);
        let removed: Vec<CellId> = self
            .state
            .grid
            .iter_mut()
            .flat_map(|row| row.drain(pos..end).collect::<Vec<_>>())
            .collect();
        self.remove_cells(&removed)?;
        self.engine.graph_mut().rename_cells(&renames)?;
        self.rewrite_references(&edit)?;

        self.state.cols -= count;
        self.state.columns.drain(pos..end);
        self.sync_column_names()
    }

    /// Create cells for `rows` and put them in the grid before row `pos`.
    /// References elsewhere are left alone.
    pub(crate) fn place_rows(&mut self, pos: usize, rows: Vec<Vec<CellInit>>) -> Result<()> {
        let mut placed = Vec::with_capacity(rows.len());
        for (i, inits) in rows.into_iter().enumerate() {
            let mut ids = Vec::with_capacity(inits.len());
            for (col, init) in inits.into_iter().enumerate() {
                ids.push(self.create_cell(pos + i, col, init)?);
            }
            placed.push(ids);
        }
        self.state.grid.splice(pos..pos, placed);
        Ok(())
    }

    fn create_cell(&mut self, row: usize, col: usize, init: CellInit) -> Result<CellId> {
        let local = CellRef::new(col, row).to_string();
        let spec = CellSpec::sheet(&self.state.id, &local, &init.source).with_lang(init.lang);
        Ok(self.engine.graph_mut().add_cell(spec)?)
    }

    fn remove_cells(&mut self, ids: &[CellId]) -> Result<()> {
        let graph = self.engine.graph_mut();
        for id in ids {
            graph.remove_cell(*id)?;
        }
        debug!(sheet = %self.state.id, count = ids.len(), "cells removed");
        Ok(())
    }

    /// New local ids of the cells an edit moves, from the current grid.
    fn moved_cells(&self, edit: &StructuralEdit) -> Vec<(CellId, String)> {
        let mut moved = Vec::new();
        for (row, ids) in self.state.grid.iter().enumerate() {
            for (col, id) in ids.iter().enumerate() {
                let pos = CellRef::new(col, row);
                if let Some(new_pos) = edit.map_cell(&pos)
                    && new_pos != pos
                {
                    moved.push((*id, new_pos.to_string()));
                }
            }
        }
        moved
    }

    fn rename_moved(&mut self, edit: &StructuralEdit) -> Result<()> {
        let renames = self.moved_cells(edit);
        self.engine.graph_mut().rename_cells(&renames)?;
        Ok(())
    }

    /// Rewrite every expression that refers into this sheet: unqualified and
    /// self-qualified references of the sheet's own cells, qualified
    /// references everywhere else.
    fn rewrite_references(&mut self, edit: &StructuralEdit) -> Result<()> {
        let sheet = self.state.id.as_str();
        let graph = self.engine.graph_mut();
        let rewrites: Vec<(CellId, String)> = graph
            .cells()
            .filter_map(|cell| {
                let CellSource::Expression(expr) = cell.source()? else {
                    return None;
                };
                let scope = if cell.resource() == sheet {
                    RefScope::Local { sheet }
                } else {
                    RefScope::Foreign { sheet }
                };
                let rewritten = transform_expression_for(expr, edit, scope);
                (rewritten != *expr).then(|| (cell.id(), rewritten))
            })
            .collect();

        for (id, expr) in rewrites {
            debug!(cell = %id, %expr, "reference rewritten");
            let patch = ContentPatch {
                source: Some(CellSource::Expression(expr)),
                lang: None,
            };
            graph.update_cell_content(id, patch)?;
        }
        Ok(())
    }

    fn sync_column_names(&mut self) -> Result<()> {
        let names = self.state.column_names();
        self.engine.graph_mut().set_column_names(&self.state.id, names)?;
        Ok(())
    }
}
