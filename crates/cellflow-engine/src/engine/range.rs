//! Range cells.
//!
//! Every distinct range referenced by a live analysis gets one synthetic cell
//! named after the normalized range (`sheet1!A1:B2`). Its inputs are the
//! cells that exist inside the span, re-resolved on every refresh, and its
//! value the aggregation of their values. Reference counts are recomputed
//! from scratch on every cycle: a range nobody reads any more is pruned in
//! the first cycle that observes it.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::cell::{Cell, CellId, CellKind};
use super::cell_ref::{CellRef, RangeRef, qualify};
use super::context::InputRef;
use super::graph::{CellGraph, Resolved};
use super::value::{Table, TableColumn, Value};

/// Create missing range cells and prune unreferenced ones.
pub(crate) fn sync_range_cells(graph: &mut CellGraph) {
    let mut referenced: BTreeMap<String, (String, RangeRef)> = BTreeMap::new();
    for cell in graph.cells() {
        for input in cell.inputs() {
            if let InputRef::Range { resource, range } = input {
                let resource = resource.clone().unwrap_or_else(|| cell.resource().to_string());
                let range = range.normalized();
                referenced.insert(qualify(&resource, &range.to_string()), (resource, range));
            }
        }
    }

    let unreferenced: Vec<CellId> = graph
        .cells()
        .filter(|c| c.is_range() && !referenced.contains_key(c.name()))
        .map(|c| c.id())
        .collect();
    for id in unreferenced {
        if let Ok(cell) = graph.remove_cell(id) {
            debug!(cell = %cell.name(), "range cell pruned");
        }
    }

    for (name, (resource, range)) in referenced {
        // Ranges into unknown resources stay unresolved.
        if graph.has_name(&name) || graph.namespace(&resource).is_none() {
            continue;
        }
        if graph.add_range_cell(&resource, range).is_ok() {
            debug!(cell = %name, "range cell created");
        }
    }
}

/// Grid position of a plain cell named in canonical A1 notation.
pub(crate) fn position(cell: &Cell) -> Option<CellRef> {
    if cell.is_range() {
        return None;
    }
    let pos = CellRef::from_str(cell.local_id())?;
    (pos.to_string() == cell.local_id()).then_some(pos)
}

/// Positioned cells of each resource, row by row.
pub(crate) fn positions<'a>(
    cells: impl Iterator<Item = &'a Cell>,
) -> HashMap<&'a str, Vec<(CellRef, CellId)>> {
    let mut index: HashMap<&str, Vec<(CellRef, CellId)>> = HashMap::new();
    for cell in cells {
        if let Some(pos) = position(cell) {
            index.entry(cell.resource()).or_default().push((pos, cell.id()));
        }
    }
    for positioned in index.values_mut() {
        positioned.sort();
    }
    index
}

/// Inputs of a range cell: the existing cells inside the range. Positions
/// without a cell are not inputs, so the cost follows the cells of the
/// resource rather than the area of the range.
pub(crate) fn span_inputs(
    positioned: Option<&Vec<(CellRef, CellId)>>,
    resource: &str,
    range: &RangeRef,
) -> Vec<(InputRef, Resolved)> {
    positioned
        .into_iter()
        .flatten()
        .filter(|(pos, _)| range.contains(pos))
        .map(|(pos, id)| {
            let input = InputRef::Cell {
                resource: Some(resource.to_string()),
                cell: *pos,
            };
            (input, Resolved::Cell(*id))
        })
        .collect()
}

/// Value of a range cell from the current values of its positions.
///
/// A single row or column is an array; anything wider is a table with one
/// column per sheet column. The range is clipped to the extent of the cells
/// of its resource. Positions inside that extent without a cell or without
/// a value are `Null`.
pub(crate) fn aggregate(graph: &CellGraph, id: CellId) -> Value {
    let Some(cell) = graph.get_cell(id) else {
        return Value::Null;
    };
    let CellKind::Range { range } = cell.kind() else {
        return Value::Null;
    };
    let resource = cell.resource();
    let range = range.normalized();

    let mut values: HashMap<CellRef, Value> = HashMap::new();
    let (mut last_row, mut last_col) = (None, None);
    for c in graph.cells_of(resource) {
        let Some(pos) = position(c) else {
            continue;
        };
        last_row = last_row.max(Some(pos.row));
        last_col = last_col.max(Some(pos.col));
        if range.contains(&pos)
            && let Some(value) = c.value()
        {
            values.insert(pos, value.clone());
        }
    }
    let value_at = |pos: CellRef| values.get(&pos).cloned().unwrap_or(Value::Null);
    let clip = |start: usize, end: usize, last: Option<usize>| {
        let stop = last.map_or(start, |last| end.min(last) + 1);
        start..stop.max(start)
    };
    let rows = clip(range.start.row, range.end.row, last_row);
    let cols = clip(range.start.col, range.end.col, last_col);

    if range.rows() == 1 {
        return Value::Array(cols.map(|col| value_at(CellRef::new(col, range.start.row))).collect());
    }
    if range.cols() == 1 {
        return Value::Array(rows.map(|row| value_at(CellRef::new(range.start.col, row))).collect());
    }

    let namespace = graph.namespace(resource);
    let row_count = rows.clone().count();
    let columns = cols
        .map(|col| {
            let name = namespace
                .map(|ns| ns.column_name(col))
                .unwrap_or_else(|| CellRef::col_to_letters(col));
            let values = rows.clone().map(|row| value_at(CellRef::new(col, row))).collect();
            TableColumn { name, values }
        })
        .collect();
    Value::Table(Table {
        columns,
        rows: row_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::Analysis;
    use crate::engine::graph::Namespace;
    use crate::engine::{CellSpec, CellStatus};
    use std::collections::HashSet;

    fn sheet() -> CellGraph {
        let mut graph = CellGraph::new();
        graph.add_namespace("sheet1", Namespace::sheet("mini")).unwrap();
        graph
    }

    fn set(graph: &mut CellGraph, local: &str, value: f64) {
        let id = graph.add_cell(CellSpec::sheet("sheet1", local, "")).unwrap();
        graph.cell_mut(id).unwrap().value = Some(Value::Number(value));
    }

    fn reader(graph: &mut CellGraph, local: &str, range: &str) -> CellId {
        let id = graph
            .add_cell(CellSpec::sheet("sheet1", local, &format!("= {}", range)))
            .unwrap();
        let cell = graph.cell_mut(id).unwrap();
        cell.dirty = false;
        cell.analysis = Some(Analysis {
            inputs: vec![InputRef::Range {
                resource: None,
                range: RangeRef::from_str(range).unwrap().normalized(),
            }],
            outputs: vec![],
        });
        id
    }

    #[test]
    fn test_ranges_are_created_once_and_pruned() {
        let mut graph = sheet();
        let a = reader(&mut graph, "C1", "A1:A2");
        reader(&mut graph, "C2", "A2:A1");
        sync_range_cells(&mut graph);
        let ranges: Vec<&str> = graph.cells().filter(|c| c.is_range()).map(|c| c.name()).collect();
        assert_eq!(ranges, vec!["sheet1!A1:A2"]);

        graph.remove_cell(a).unwrap();
        sync_range_cells(&mut graph);
        assert!(graph.has_name("sheet1!A1:A2"));

        let others: Vec<CellId> = graph.cells().filter(|c| !c.is_range()).map(|c| c.id()).collect();
        for id in others {
            graph.remove_cell(id).unwrap();
        }
        sync_range_cells(&mut graph);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_range_into_unknown_resource_is_not_created() {
        let mut graph = sheet();
        let id = graph.add_cell(CellSpec::sheet("sheet1", "A1", "= x")).unwrap();
        let cell = graph.cell_mut(id).unwrap();
        cell.dirty = false;
        cell.analysis = Some(Analysis {
            inputs: vec![InputRef::Range {
                resource: Some("nowhere".into()),
                range: RangeRef::from_str("A1:B2").unwrap(),
            }],
            outputs: vec![],
        });
        sync_range_cells(&mut graph);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get_cell(id).unwrap().status(), CellStatus::Broken);
    }

    #[test]
    fn test_aggregate_array_and_table() {
        let mut graph = sheet();
        set(&mut graph, "A1", 1.0);
        set(&mut graph, "B1", 2.0);
        set(&mut graph, "A2", 3.0);
        set(&mut graph, "B2", 4.0);
        set(&mut graph, "B3", 5.0);
        let row = graph.add_range_cell("sheet1", RangeRef::from_str("B1:A1").unwrap()).unwrap();
        let rect = graph.add_range_cell("sheet1", RangeRef::from_str("A1:B2").unwrap()).unwrap();
        let gap = graph.add_range_cell("sheet1", RangeRef::from_str("A2:A3").unwrap()).unwrap();

        assert_eq!(aggregate(&graph, row), Value::from(vec![1.0, 2.0]));
        assert_eq!(aggregate(&graph, gap), Value::Array(vec![Value::Number(3.0), Value::Null]));
        let Value::Table(table) = aggregate(&graph, rect) else {
            panic!("expected a table");
        };
        assert_eq!(table.rows, 2);
        assert_eq!(table.column("A"), Some(&[Value::Number(1.0), Value::Number(3.0)][..]));
        assert_eq!(table.column("B"), Some(&[Value::Number(2.0), Value::Number(4.0)][..]));
    }

    #[test]
    fn test_table_columns_use_column_names() {
        let mut graph = sheet();
        graph
            .set_column_names("sheet1", vec![Some("x".into()), None])
            .unwrap();
        set(&mut graph, "B2", 1.0);
        let rect = graph.add_range_cell("sheet1", RangeRef::from_str("A1:B2").unwrap()).unwrap();
        let Value::Table(table) = aggregate(&graph, rect) else {
            panic!("expected a table");
        };
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["x", "B"]);
    }

    #[test]
    fn test_range_past_the_cells_reads_only_existing_cells() {
        let mut graph = sheet();
        set(&mut graph, "A1", 1.0);
        set(&mut graph, "A2", 2.0);
        let column = graph
            .add_range_cell("sheet1", RangeRef::from_str("A1:A1000000").unwrap())
            .unwrap();
        let wide = graph
            .add_range_cell("sheet1", RangeRef::from_str("A1:ZZ1000000").unwrap())
            .unwrap();
        graph.refresh(&HashSet::new());

        assert_eq!(graph.resolved_inputs(column).count(), 2);
        assert_eq!(graph.resolved_inputs(wide).count(), 2);
        assert_eq!(aggregate(&graph, column), Value::from(vec![1.0, 2.0]));
        let Value::Table(table) = aggregate(&graph, wide) else {
            panic!("expected a table");
        };
        assert_eq!(table.rows, 2);
        assert_eq!(table.columns.len(), 1);

        set(&mut graph, "A5", 5.0);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.resolved_inputs(column).count(), 3);
        assert_eq!(
            aggregate(&graph, column),
            Value::Array(vec![1.0.into(), 2.0.into(), Value::Null, Value::Null, 5.0.into()])
        );
    }

    #[test]
    fn test_range_beyond_the_cells_is_empty() {
        let mut graph = sheet();
        set(&mut graph, "A1", 1.0);
        let below = graph.add_range_cell("sheet1", RangeRef::from_str("A3:A9").unwrap()).unwrap();
        graph.refresh(&HashSet::new());
        assert_eq!(graph.resolved_inputs(below).count(), 0);
        assert_eq!(aggregate(&graph, below), Value::Array(Vec::new()));
    }
}
