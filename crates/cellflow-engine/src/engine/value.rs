//! Cell values.
//!
//! A value is what a cell evaluates to: a scalar, an array (the value of a
//! single-row or single-column range) or a table (the value of a rectangular
//! range).

use serde::{Deserialize, Serialize};

/// One named column of a [`Table`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub values: Vec<Value>,
}

/// Column-oriented table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<TableColumn>,
    pub rows: usize,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// All values, row by row.
    pub fn iter_row_major(&self) -> impl Iterator<Item = &Value> {
        (0..self.rows).flat_map(move |r| self.columns.iter().filter_map(move |c| c.values.get(r)))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Array(Vec<Value>),
    Table(Table),
}

impl Value {
    /// Parse the literal content of a constant cell.
    /// - Empty string or whitespace -> Null
    /// - `true` / `false` -> Bool
    /// - Quoted string -> Text (without quotes)
    /// - Valid number -> Number
    /// - Otherwise -> Text
    pub fn parse_literal(input: &str) -> Value {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match trimmed {
            "true" | "TRUE" => return Value::Bool(true),
            "false" | "FALSE" => return Value::Bool(false),
            _ => {}
        }
        if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
            return Value::Text(trimmed[1..trimmed.len() - 1].to_string());
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return Value::Number(n);
        }
        Value::Text(trimmed.to_string())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Array(_) => "array",
            Value::Table(_) => "table",
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal() {
        assert_eq!(Value::parse_literal("  "), Value::Null);
        assert_eq!(Value::parse_literal("42"), Value::Number(42.0));
        assert_eq!(Value::parse_literal("-1.5"), Value::Number(-1.5));
        assert_eq!(Value::parse_literal("\"7\""), Value::Text("7".into()));
        assert_eq!(Value::parse_literal("TRUE"), Value::Bool(true));
        assert_eq!(Value::parse_literal("hello"), Value::Text("hello".into()));
    }

    #[test]
    fn test_table_row_major_iteration() {
        let table = Table {
            columns: vec![
                TableColumn { name: "A".into(), values: vec![1.0.into(), 3.0.into()] },
                TableColumn { name: "B".into(), values: vec![2.0.into(), 4.0.into()] },
            ],
            rows: 2,
        };
        let flat: Vec<f64> = table.iter_row_major().filter_map(Value::as_number).collect();
        assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(table.column("B"), Some(&[Value::Number(2.0), Value::Number(4.0)][..]));
    }
}
