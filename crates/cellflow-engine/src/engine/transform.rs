//! Reference rewriting for structural edits.
//!
//! When rows or columns are inserted into or deleted from a sheet, every
//! expression that points into that sheet has to follow the cells it meant.
//!
//! Rules, applied per endpoint on the edited axis:
//! - Insert `count` at `pos`: coordinates `>= pos` move by `+count`
//! - Delete `[pos, pos + count)`: coordinates before are unchanged, coordinates
//!   after move by `-count`, coordinates inside are unresolved
//! - An unresolved single-cell reference becomes `#REF!`
//! - A range with one unresolved endpoint is clamped to the surviving part; a
//!   range with both endpoints unresolved becomes `#REF!`

use serde::{Deserialize, Serialize};

use super::cell_ref::{BROKEN_REF, CellRef, RangeRef, qualify};
use super::deps::{RefTarget, RefToken, replace_references};

/// Axis of a structural edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Row,
    Column,
}

impl Dimension {
    /// Get the coordinate value from a CellRef for this dimension
    pub fn get_coord(&self, cell_ref: &CellRef) -> usize {
        match self {
            Dimension::Row => cell_ref.row,
            Dimension::Column => cell_ref.col,
        }
    }

    /// Create a new CellRef with modified coordinate in this dimension
    pub fn with_coord(&self, cell_ref: &CellRef, coord: usize) -> CellRef {
        match self {
            Dimension::Row => CellRef::new(cell_ref.col, coord),
            Dimension::Column => CellRef::new(coord, cell_ref.row),
        }
    }
}

/// An insertion (`count > 0`) or deletion (`count < 0`) of whole rows or
/// columns starting at `pos`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralEdit {
    pub dim: Dimension,
    pub pos: usize,
    pub count: isize,
}

impl StructuralEdit {
    pub fn insert_rows(pos: usize, count: usize) -> Self {
        Self { dim: Dimension::Row, pos, count: count as isize }
    }

    pub fn delete_rows(pos: usize, count: usize) -> Self {
        Self { dim: Dimension::Row, pos, count: -(count as isize) }
    }

    pub fn insert_cols(pos: usize, count: usize) -> Self {
        Self { dim: Dimension::Column, pos, count: count as isize }
    }

    pub fn delete_cols(pos: usize, count: usize) -> Self {
        Self { dim: Dimension::Column, pos, count: -(count as isize) }
    }

    pub fn is_insert(&self) -> bool {
        self.count > 0
    }

    /// Number of rows/columns inserted or deleted.
    pub fn span(&self) -> usize {
        self.count.unsigned_abs()
    }

    /// New position of a coordinate, `None` if it falls inside a deleted span.
    pub fn map_coord(&self, coord: usize) -> Option<usize> {
        if self.count >= 0 {
            if coord >= self.pos {
                Some(coord + self.span())
            } else {
                Some(coord)
            }
        } else if coord < self.pos {
            Some(coord)
        } else if coord >= self.pos + self.span() {
            Some(coord - self.span())
        } else {
            None
        }
    }

    /// New position of a cell, `None` if its row/column was deleted.
    pub fn map_cell(&self, cell: &CellRef) -> Option<CellRef> {
        self.map_coord(self.dim.get_coord(cell))
            .map(|coord| self.dim.with_coord(cell, coord))
    }

    /// New extent of a range, clamped when one side was deleted and `None`
    /// when the whole range was deleted. The result is normalized.
    pub fn map_range(&self, range: &RangeRef) -> Option<RangeRef> {
        let range = range.normalized();
        let start = self.dim.get_coord(&range.start);
        let end = self.dim.get_coord(&range.end);
        let (new_start, new_end) = match (self.map_coord(start), self.map_coord(end)) {
            (Some(s), Some(e)) => (s, e),
            // Start deleted: the range now begins right where the deletion was.
            (None, Some(e)) => (self.pos, e),
            // End deleted: the range now ends just before the deletion.
            (Some(s), None) => (s, self.pos.checked_sub(1)?),
            (None, None) => return None,
        };
        Some(
            RangeRef::new(
                self.dim.with_coord(&range.start, new_start),
                self.dim.with_coord(&range.end, new_end),
            )
            .normalized(),
        )
    }
}

/// Which references of an expression an edit applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefScope<'a> {
    /// Every reference, qualified or not.
    Any,
    /// An expression living inside `sheet`: unqualified references and
    /// references qualified with `sheet`.
    Local { sheet: &'a str },
    /// An expression living elsewhere: only references qualified with `sheet`.
    Foreign { sheet: &'a str },
}

impl RefScope<'_> {
    fn applies_to(&self, token: &RefToken) -> bool {
        match (self, token.resource.as_deref()) {
            (RefScope::Any, _) => true,
            (RefScope::Local { .. }, None) => true,
            (RefScope::Local { sheet }, Some(resource)) => resource == *sheet,
            (RefScope::Foreign { .. }, None) => false,
            (RefScope::Foreign { sheet }, Some(resource)) => resource == *sheet,
        }
    }
}

/// Rewrite every reference in `expression` for a structural edit.
pub fn transform_expression(expression: &str, edit: &StructuralEdit) -> String {
    transform_expression_for(expression, edit, RefScope::Any)
}

/// Rewrite the references of `expression` selected by `scope`.
///
/// Cell references whose coordinates don't move keep their original text.
/// Ranges come out normalized.
pub fn transform_expression_for(
    expression: &str,
    edit: &StructuralEdit,
    scope: RefScope<'_>,
) -> String {
    replace_references(expression, |token| {
        if !scope.applies_to(token) {
            return None;
        }
        let local = match &token.target {
            RefTarget::Broken => return None,
            RefTarget::Cell(cell) => {
                let moved = edit.map_cell(cell);
                if moved.as_ref() == Some(cell) {
                    return None;
                }
                moved.map(|c| c.to_string())
            }
            // Ranges are written back in canonical form even when unmoved.
            RefTarget::Range(range) => {
                edit.map_range(range).map(|r| {
                    if r.is_single() {
                        r.start.to_string()
                    } else {
                        r.to_string()
                    }
                })
            }
        };
        Some(match (local, &token.resource) {
            (None, _) => BROKEN_REF.to_string(),
            (Some(local), Some(resource)) => qualify(resource, &local),
            (Some(local), None) => local,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(expr: &str, pos: usize, count: isize) -> String {
        transform_expression(expr, &StructuralEdit { dim: Dimension::Column, pos, count })
    }

    fn row(expr: &str, pos: usize, count: isize) -> String {
        transform_expression(expr, &StructuralEdit { dim: Dimension::Row, pos, count })
    }

    #[test]
    fn test_single_col_insert_and_delete() {
        assert_eq!(col("C1", 1, 2), "E1");
        assert_eq!(col("C1", 4, 1), "C1");
        assert_eq!(col("C1", 0, -2), "A1");
        assert_eq!(col("C1", 4, -1), "C1");
        assert_eq!(col("C1", 2, -1), BROKEN_REF);
        assert_eq!(col("C1", 1, -4), BROKEN_REF);
    }

    #[test]
    fn test_single_row_insert_and_delete() {
        assert_eq!(row("C3", 1, 3), "C6");
        assert_eq!(row("C3", 4, 1), "C3");
        assert_eq!(row("C3", 0, -2), "C1");
        assert_eq!(row("C3", 4, -1), "C3");
        assert_eq!(row("C3", 2, -1), BROKEN_REF);
        assert_eq!(row("C3", 1, -4), BROKEN_REF);
    }

    #[test]
    fn test_range_col_edits() {
        assert_eq!(col("C3:F10", 2, 2), "E3:H10");
        assert_eq!(col("C3:F10", 4, 3), "C3:I10");
        assert_eq!(col("C3:F10", 7, 1), "C3:F10");
        assert_eq!(col("C3:F10", 1, -1), "B3:E10");
        assert_eq!(col("C3:F10", 1, -4), "B3:B10");
        assert_eq!(col("C3:F10", 3, -2), "C3:D10");
        assert_eq!(col("C3:F10", 4, -3), "C3:D10");
        assert_eq!(col("C3:F10", 7, -1), "C3:F10");
    }

    #[test]
    fn test_range_row_edits() {
        assert_eq!(row("C3:F10", 1, 3), "C6:F13");
        assert_eq!(row("C3:F10", 6, 2), "C3:F12");
        assert_eq!(row("C3:F10", 12, 1), "C3:F10");
        assert_eq!(row("C3:F10", 1, -1), "C2:F9");
        assert_eq!(row("C3:F10", 1, -4), "C2:F6");
        assert_eq!(row("C3:F10", 5, -2), "C3:F8");
        assert_eq!(row("C3:F10", 7, -6), "C3:F7");
        assert_eq!(row("C3:F10", 12, -1), "C3:F10");
    }

    #[test]
    fn test_range_fully_deleted_is_broken() {
        assert_eq!(row("sum(A2:B3) + 1", 1, -3), "sum(#REF!) + 1");
    }

    #[test]
    fn test_inverted_range_is_normalized_when_moved() {
        assert_eq!(row("A3:A1", 0, 1), "A2:A4");
    }

    #[test]
    fn test_inverted_range_is_normalized_when_unmoved() {
        assert_eq!(row("A3:A1", 5, 1), "A1:A3");
        assert_eq!(col("sum(B2:A1) + C1", 4, 2), "sum(A1:B2) + C1");
        assert_eq!(row("sheet2!B2:A1", 9, 1), "sheet2!A1:B2");
    }

    #[test]
    fn test_scope_filters_references() {
        let edit = StructuralEdit::insert_rows(0, 1);
        let expr = "A1 + sheet1!A1 + sheet2!A1";
        assert_eq!(
            transform_expression_for(expr, &edit, RefScope::Local { sheet: "sheet1" }),
            "A2 + sheet1!A2 + sheet2!A1"
        );
        assert_eq!(
            transform_expression_for(expr, &edit, RefScope::Foreign { sheet: "sheet1" }),
            "A1 + sheet1!A2 + sheet2!A1"
        );
    }

    #[test]
    fn test_broken_qualified_reference_drops_prefix() {
        let edit = StructuralEdit::delete_rows(2, 1);
        assert_eq!(
            transform_expression_for("x = sheet1!A3 * 2", &edit, RefScope::Foreign { sheet: "sheet1" }),
            "x = #REF! * 2"
        );
    }

    #[test]
    fn test_string_literals_are_untouched() {
        assert_eq!(col(r#"A1 & "A1""#, 0, 1), r#"B1 & "A1""#);
    }
}
