//! Cell and range reference parsing and formatting.
//!
//! Provides bidirectional conversion between spreadsheet-style references
//! (e.g. "A1", "B2", "AA100", "A1:C3") and zero-indexed coordinates, plus the
//! helpers for qualified ids of the form `resource!ref`.
//!
//! # Examples
//!
//! ```
//! use cellflow_engine::engine::{CellRef, RangeRef};
//!
//! let cell = CellRef::from_str("B3").unwrap();
//! assert_eq!(cell.col, 1);
//! assert_eq!(cell.row, 2);
//! assert_eq!(cell.to_string(), "B3");
//!
//! let range = RangeRef::from_str("A2:A1").unwrap().normalized();
//! assert_eq!(range.to_string(), "A1:A2");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker that replaces a reference whose target was deleted.
pub const BROKEN_REF: &str = "#REF!";

/// Separator between the resource id and the local reference of a qualified id.
pub const QUALIFIER: char = '!';

/// A reference to a cell by column and row indices (0-indexed).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(col: usize, row: usize) -> CellRef {
        CellRef { row, col }
    }

    /// Parse a cell reference from spreadsheet notation (e.g., "A1", "B2", "AA10").
    /// Returns None if the input is invalid.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(name: &str) -> Option<CellRef> {
        Self::parse_a1(name)
    }

    fn parse_a1(name: &str) -> Option<CellRef> {
        let split = name.find(|c: char| c.is_ascii_digit())?;
        let (letters, numbers) = name.split_at(split);
        if letters.is_empty()
            || !letters.bytes().all(|b| b.is_ascii_alphabetic())
            || !numbers.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let mut col_acc = 0usize;
        for c in letters.to_ascii_uppercase().bytes() {
            let digit = (c - b'A') as usize + 1;
            col_acc = col_acc.checked_mul(26)?.checked_add(digit)?;
        }
        let col = col_acc.checked_sub(1)?;

        let row = numbers.parse::<usize>().ok()?.checked_sub(1)?;

        Some(CellRef::new(col, row))
    }

    /// Convert column index to spreadsheet-style letters (0 -> A, 25 -> Z, 26 -> AA).
    pub fn col_to_letters(col: usize) -> String {
        let mut result = String::new();
        let mut n = col as u128 + 1;
        while n > 0 {
            n -= 1;
            result.insert(0, (b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        result
    }
}

impl std::str::FromStr for CellRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_a1(s).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row + 1)
    }
}

/// A rectangular span of cells, `start:end`, both ends inclusive.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RangeRef {
    pub start: CellRef,
    pub end: CellRef,
}

impl RangeRef {
    pub fn new(start: CellRef, end: CellRef) -> RangeRef {
        RangeRef { start, end }
    }

    /// Parse `A1:B2`. A bare `A1` is accepted as a one-cell range.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Option<RangeRef> {
        match text.split_once(':') {
            Some((start, end)) => Some(RangeRef::new(
                CellRef::from_str(start.trim())?,
                CellRef::from_str(end.trim())?,
            )),
            None => {
                let cell = CellRef::from_str(text.trim())?;
                Some(RangeRef::new(cell, cell))
            }
        }
    }

    /// Swap endpoints per axis so that start <= end on both rows and columns.
    pub fn normalized(&self) -> RangeRef {
        RangeRef {
            start: CellRef::new(self.start.col.min(self.end.col), self.start.row.min(self.end.row)),
            end: CellRef::new(self.start.col.max(self.end.col), self.start.row.max(self.end.row)),
        }
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Number of rows spanned (assumes a normalized range).
    pub fn rows(&self) -> usize {
        self.end.row - self.start.row + 1
    }

    /// Number of columns spanned (assumes a normalized range).
    pub fn cols(&self) -> usize {
        self.end.col - self.start.col + 1
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        let r = self.normalized();
        (r.start.row..=r.end.row).contains(&cell.row) && (r.start.col..=r.end.col).contains(&cell.col)
    }

    /// All cells of the (normalized) range in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + use<> {
        let r = self.normalized();
        (r.start.row..=r.end.row)
            .flat_map(move |row| (r.start.col..=r.end.col).map(move |col| CellRef::new(col, row)))
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Build a qualified id `resource!local`.
pub fn qualify(resource: &str, local: &str) -> String {
    format!("{}{}{}", resource, QUALIFIER, local)
}

/// Split a qualified id into `(resource, local)`.
pub fn split_qualified(id: &str) -> Option<(&str, &str)> {
    id.split_once(QUALIFIER)
        .filter(|(resource, local)| !resource.is_empty() && !local.is_empty())
}
