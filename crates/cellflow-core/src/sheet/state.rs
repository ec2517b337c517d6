use serde::{Deserialize, Serialize};

use cellflow_engine::engine::{Cell, CellGraph, CellId, CellRef, Engine, MINI, RangeRef};

use crate::cell::CellInit;
use crate::error::{CoreError, Result};

/// Metadata of one sheet column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Name used for this column in table values.
    pub name: Option<String>,
    /// Declared type, informational.
    #[serde(rename = "type")]
    pub ty: Option<String>,
}

impl ColumnMeta {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ty: None,
        }
    }

    pub fn with_type(mut self, ty: &str) -> Self {
        self.ty = Some(ty.to_string());
        self
    }
}

/// Everything needed to add a sheet to a workspace.
#[derive(Clone, Debug)]
pub struct SheetSpec {
    pub id: String,
    pub lang: String,
    pub columns: Vec<ColumnMeta>,
    /// Rows of cell contents; every row must have the same width.
    pub cells: Vec<Vec<CellInit>>,
}

impl SheetSpec {
    pub fn new(id: &str, lang: &str) -> Self {
        Self {
            id: id.to_string(),
            lang: lang.to_string(),
            columns: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnMeta>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_cells<R, C>(mut self, rows: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = C>,
        C: Into<CellInit>,
    {
        self.cells = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        self
    }
}

impl Default for SheetSpec {
    fn default() -> Self {
        Self::new("sheet1", MINI)
    }
}

/// Grid of a sheet: `grid[row][col]`.
pub(crate) struct SheetState {
    pub(crate) id: String,
    pub(crate) grid: Vec<Vec<CellId>>,
    pub(crate) cols: usize,
    pub(crate) columns: Vec<ColumnMeta>,
}

impl SheetState {
    pub(crate) fn new(id: &str, cols: usize, mut columns: Vec<ColumnMeta>) -> Self {
        let cols = cols.max(columns.len());
        columns.resize(cols, ColumnMeta::default());
        Self {
            id: id.to_string(),
            grid: Vec::new(),
            cols,
            columns,
        }
    }

    pub(crate) fn rows(&self) -> usize {
        self.grid.len()
    }

    pub(crate) fn id_at(&self, row: usize, col: usize) -> Option<CellId> {
        self.grid.get(row).and_then(|r| r.get(col)).copied()
    }

    pub(crate) fn id_of(&self, local: &str) -> Result<CellId> {
        CellRef::from_str(local)
            .and_then(|pos| self.id_at(pos.row, pos.col))
            .ok_or_else(|| CoreError::UnknownLocalId(local.to_string()))
    }

    pub(crate) fn column_names(&self) -> Vec<Option<String>> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Read access to a sheet.
pub struct Sheet<'a> {
    pub(crate) state: &'a SheetState,
    pub(crate) graph: &'a CellGraph,
}

impl<'a> Sheet<'a> {
    pub fn id(&self) -> &'a str {
        &self.state.id
    }

    /// `(rows, columns)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.state.rows(), self.state.cols)
    }

    /// All cells, row by row.
    pub fn cells(&self) -> Vec<Vec<&'a Cell>> {
        let graph = self.graph;
        self.state
            .grid
            .iter()
            .map(|row| row.iter().filter_map(|id| graph.get_cell(*id)).collect())
            .collect()
    }

    /// Cells of a range such as `A2:B3`, row by row.
    pub fn query_cells(&self, range: &str) -> Result<Vec<Vec<&'a Cell>>> {
        let range = RangeRef::from_str(range)
            .ok_or_else(|| CoreError::InvalidRange(range.to_string()))?
            .normalized();
        let (rows, cols) = self.dimensions();
        if range.end.row >= rows || range.end.col >= cols {
            return Err(CoreError::InvalidRange(range.to_string()));
        }
        Ok((range.start.row..=range.end.row)
            .map(|row| {
                (range.start.col..=range.end.col)
                    .filter_map(|col| self.cell_at(row, col))
                    .collect()
            })
            .collect())
    }

    pub fn cell_at(&self, row: usize, col: usize) -> Option<&'a Cell> {
        let graph = self.graph;
        self.state.id_at(row, col).and_then(|id| graph.get_cell(id))
    }

    /// Look a cell up by its local id (`A1`).
    pub fn cell(&self, local: &str) -> Option<&'a Cell> {
        let pos = CellRef::from_str(local)?;
        self.cell_at(pos.row, pos.col)
    }

    /// Name of a column: its metadata name, or its letters.
    pub fn column_name(&self, col: usize) -> String {
        self.state
            .columns
            .get(col)
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| CellRef::col_to_letters(col))
    }

    pub fn column_type(&self, col: usize) -> Option<&'a str> {
        self.state.columns.get(col).and_then(|c| c.ty.as_deref())
    }

    pub fn columns(&self) -> &'a [ColumnMeta] {
        &self.state.columns
    }
}

/// Write access to a sheet.
pub struct SheetMut<'a> {
    pub(crate) state: &'a mut SheetState,
    pub(crate) engine: &'a mut Engine,
}

impl SheetMut<'_> {
    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn as_sheet(&self) -> Sheet<'_> {
        Sheet {
            state: self.state,
            graph: self.engine.graph(),
        }
    }
}
