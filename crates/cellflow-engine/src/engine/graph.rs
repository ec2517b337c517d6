//! The cell graph.
//!
//! An arena of [`Cell`]s keyed by [`CellId`], a qualified-name index, one
//! [`Namespace`] per resource, and the forward (inputs) and reverse
//! (dependents) edge maps derived from the cells' analyses.
//!
//! Edges are not stored on the cells. They are re-resolved on every
//! [`refresh`](CellGraph::refresh) from the last analysis of each cell, which
//! also recomputes collisions, cycles, ranks and statuses. Graph errors are
//! therefore derived state: they disappear as soon as their cause is gone and
//! reappear as long as it is not.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::cell::{
    Cell, CellError, CellId, CellKind, CellSpec, CellStatus, ContentPatch, ErrorKind, InputStamp,
};
use super::cell_ref::{CellRef, RangeRef, qualify};
use super::context::InputRef;
use super::cycle::order_cells;
use super::range;
use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Document,
    Sheet,
}

/// Per-resource settings shared by the cells of a document or sheet.
#[derive(Clone, Debug)]
pub struct Namespace {
    pub kind: ResourceKind,
    /// Default language of the resource's cells.
    pub lang: String,
    /// `false` puts the resource in manual execution mode.
    pub autorun: bool,
    column_names: Vec<Option<String>>,
}

impl Namespace {
    pub fn document(lang: &str) -> Self {
        Self {
            kind: ResourceKind::Document,
            lang: lang.to_string(),
            autorun: true,
            column_names: Vec::new(),
        }
    }

    pub fn sheet(lang: &str) -> Self {
        Self {
            kind: ResourceKind::Sheet,
            ..Self::document(lang)
        }
    }

    pub fn with_autorun(mut self, autorun: bool) -> Self {
        self.autorun = autorun;
        self
    }

    /// Name of column `col` in table values: the column metadata name if
    /// there is one, the column letters otherwise.
    pub fn column_name(&self, col: usize) -> String {
        self.column_names
            .get(col)
            .and_then(|n| n.clone())
            .unwrap_or_else(|| CellRef::col_to_letters(col))
    }

    pub fn column_names(&self) -> &[Option<String>] {
        &self.column_names
    }
}

/// What an input of a cell currently points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Resolved {
    Cell(CellId),
    Missing,
    /// A symbol bound by more than one cell.
    Ambiguous,
    Broken,
}

#[derive(Default)]
pub struct CellGraph {
    cells: BTreeMap<CellId, Cell>,
    names: HashMap<String, CellId>,
    namespaces: HashMap<String, Namespace>,
    next_id: u64,
    forward: HashMap<CellId, Vec<(InputRef, Resolved)>>,
    reverse: HashMap<CellId, BTreeSet<CellId>>,
    ranked: Vec<CellId>,
    structure_changed: bool,
}

impl CellGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // Namespaces

    pub fn add_namespace(&mut self, resource: &str, namespace: Namespace) -> Result<()> {
        if self.namespaces.contains_key(resource) {
            return Err(EngineError::DuplicateResource(resource.to_string()));
        }
        self.namespaces.insert(resource.to_string(), namespace);
        Ok(())
    }

    /// Remove a resource and all of its cells.
    pub fn remove_namespace(&mut self, resource: &str) -> Result<Vec<Cell>> {
        if self.namespaces.remove(resource).is_none() {
            return Err(EngineError::UnknownResource(resource.to_string()));
        }
        let ids: Vec<CellId> = self
            .cells
            .values()
            .filter(|c| c.resource == resource)
            .map(|c| c.id)
            .collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            removed.push(self.remove_cell(id)?);
        }
        Ok(removed)
    }

    pub fn namespace(&self, resource: &str) -> Option<&Namespace> {
        self.namespaces.get(resource)
    }

    pub fn set_autorun(&mut self, resource: &str, autorun: bool) -> Result<()> {
        let ns = self.namespace_mut(resource)?;
        ns.autorun = autorun;
        Ok(())
    }

    pub fn set_lang(&mut self, resource: &str, lang: &str) -> Result<()> {
        self.namespace_mut(resource)?.lang = lang.to_string();
        // Cells without an override now belong to another context.
        let ids: Vec<CellId> = self
            .cells
            .values()
            .filter(|c| c.resource == resource && c.lang().is_none() && !c.is_range())
            .map(|c| c.id)
            .collect();
        for id in ids {
            if let Some(cell) = self.cells.get_mut(&id) {
                cell.invalidate();
            }
        }
        Ok(())
    }

    /// Column names used for table values of ranges over this resource.
    /// Changing them re-evaluates the affected range cells.
    pub fn set_column_names(&mut self, resource: &str, names: Vec<Option<String>>) -> Result<()> {
        let ns = self.namespace_mut(resource)?;
        if ns.column_names == names {
            return Ok(());
        }
        ns.column_names = names;
        for cell in self.cells.values_mut() {
            if cell.resource == resource && cell.is_range() {
                cell.stamp = None;
            }
        }
        self.structure_changed = true;
        Ok(())
    }

    fn namespace_mut(&mut self, resource: &str) -> Result<&mut Namespace> {
        self.namespaces
            .get_mut(resource)
            .ok_or_else(|| EngineError::UnknownResource(resource.to_string()))
    }

    // Cells

    /// Add a plain cell. Fails if the qualified name is taken or the
    /// resource is unknown.
    pub fn add_cell(&mut self, spec: CellSpec) -> Result<CellId> {
        let kind = CellKind::Plain {
            source: spec.source,
            lang: spec.lang,
        };
        self.insert(&spec.resource, &spec.local, kind)
    }

    pub(crate) fn add_range_cell(&mut self, resource: &str, range: RangeRef) -> Result<CellId> {
        let range = range.normalized();
        self.insert(resource, &range.to_string(), CellKind::Range { range })
    }

    fn insert(&mut self, resource: &str, local: &str, kind: CellKind) -> Result<CellId> {
        if !self.namespaces.contains_key(resource) {
            return Err(EngineError::UnknownResource(resource.to_string()));
        }
        let name = qualify(resource, local);
        if self.names.contains_key(&name) {
            return Err(EngineError::DuplicateId(name));
        }
        let id = CellId(self.next_id);
        self.next_id += 1;
        trace!(cell = %name, %id, "add cell");
        self.names.insert(name, id);
        self.cells.insert(id, Cell::new(id, resource, local, kind));
        self.structure_changed = true;
        Ok(id)
    }

    /// Remove a cell and its edges. Dependents turn `broken` with
    /// `unresolved` on the next refresh unless another cell provides what
    /// they read.
    pub fn remove_cell(&mut self, id: CellId) -> Result<Cell> {
        let cell = self
            .cells
            .remove(&id)
            .ok_or_else(|| EngineError::UnknownCell(id.to_string()))?;
        trace!(cell = %cell.name, %id, "remove cell");
        self.names.remove(&cell.name);
        if let Some(inputs) = self.forward.remove(&id) {
            for (_, resolved) in inputs {
                if let Resolved::Cell(input) = resolved
                    && let Some(deps) = self.reverse.get_mut(&input)
                {
                    deps.remove(&id);
                }
            }
        }
        self.reverse.remove(&id);
        self.ranked.retain(|r| *r != id);
        self.structure_changed = true;
        Ok(cell)
    }

    /// Replace the content of a plain cell and mark it dirty.
    pub fn update_cell_content(&mut self, id: CellId, patch: ContentPatch) -> Result<()> {
        let cell = self
            .cells
            .get_mut(&id)
            .ok_or_else(|| EngineError::UnknownCell(id.to_string()))?;
        let CellKind::Plain { source, lang } = &mut cell.kind else {
            return Err(EngineError::RangeCell(cell.name.clone()));
        };
        if let Some(new_source) = patch.source {
            *source = new_source;
        }
        if let Some(new_lang) = patch.lang {
            *lang = new_lang;
        }
        trace!(cell = %cell.name, "update cell content");
        cell.invalidate();
        Ok(())
    }

    /// Rename cells of one resource in one step. Names are swapped as a
    /// batch, so `A2 -> A3, A3 -> A4` never collides with itself.
    pub fn rename_cells(&mut self, batch: &[(CellId, String)]) -> Result<()> {
        let mut renames: Vec<(CellId, String, String)> = Vec::with_capacity(batch.len());
        let moving: HashSet<CellId> = batch.iter().map(|(id, _)| *id).collect();
        let mut targets: HashSet<String> = HashSet::new();
        for (id, local) in batch {
            let cell = self
                .cells
                .get(id)
                .ok_or_else(|| EngineError::UnknownCell(id.to_string()))?;
            let new_name = qualify(&cell.resource, local);
            let taken = self
                .names
                .get(&new_name)
                .is_some_and(|other| !moving.contains(other));
            if taken || !targets.insert(new_name.clone()) {
                return Err(EngineError::DuplicateId(new_name));
            }
            renames.push((*id, cell.name.clone(), new_name));
        }

        for (_, old_name, _) in &renames {
            self.names.remove(old_name);
        }
        for ((id, _, new_name), (_, local)) in renames.into_iter().zip(batch) {
            self.names.insert(new_name.clone(), id);
            if let Some(cell) = self.cells.get_mut(&id) {
                cell.name = new_name;
                cell.local = local.clone();
            }
        }
        self.structure_changed = true;
        Ok(())
    }

    /// Attach an error to a cell from outside the engine.
    ///
    /// A runtime error sticks until an input value changes or the cell is
    /// edited. Any other kind sticks until the cell is edited.
    pub fn add_error(&mut self, id: CellId, error: CellError) -> Result<()> {
        let stamp = self.input_stamp(id);
        let cell = self
            .cells
            .get_mut(&id)
            .ok_or_else(|| EngineError::UnknownCell(id.to_string()))?;
        debug!(cell = %cell.name, %error, "error added");
        match error.kind {
            ErrorKind::Runtime => cell.set_runtime_error(error, stamp),
            _ => cell.static_error = Some(error),
        }
        self.structure_changed = true;
        Ok(())
    }

    pub fn has_cell(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    pub fn get_cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    pub(crate) fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(&id)
    }

    /// Look a cell up by qualified name (`sheet1!A3`, `sheet1!A1:B2`).
    pub fn lookup(&self, name: &str) -> Option<CellId> {
        self.names.get(name).copied()
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn cell_by_name(&self, name: &str) -> Option<&Cell> {
        self.lookup(name).and_then(|id| self.cells.get(&id))
    }

    /// All cells in insertion order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn cells_of<'a>(&'a self, resource: &'a str) -> impl Iterator<Item = &'a Cell> + 'a {
        self.cells.values().filter(move |c| c.resource == resource)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True if a cell is dirty or cells were added, removed or renamed since
    /// the last refresh.
    pub fn needs_update(&self) -> bool {
        self.structure_changed || self.cells.values().any(|c| c.dirty)
    }

    /// Cells reading `id` directly.
    pub fn dependents(&self, id: CellId) -> Vec<CellId> {
        self.reverse
            .get(&id)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Cells `id` reads from, directly or transitively.
    pub fn predecessors(&self, id: CellId) -> Vec<CellId> {
        let mut seen: BTreeSet<CellId> = BTreeSet::new();
        let mut queue: VecDeque<CellId> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for input in self.resolved_inputs(current) {
                if seen.insert(input) {
                    queue.push_back(input);
                }
            }
        }
        seen.remove(&id);
        seen.into_iter().collect()
    }

    /// Cells in evaluation order as of the last refresh.
    pub fn ranked(&self) -> &[CellId] {
        &self.ranked
    }

    pub(crate) fn resolved_inputs(&self, id: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.forward.get(&id).into_iter().flatten().filter_map(|(_, r)| match r {
            Resolved::Cell(input) => Some(*input),
            _ => None,
        })
    }

    /// Inputs of `id` with the cell each one resolved to.
    pub(crate) fn input_bindings(&self, id: CellId) -> impl Iterator<Item = (&InputRef, CellId)> {
        self.forward.get(&id).into_iter().flatten().filter_map(|(input, r)| match r {
            Resolved::Cell(cell) => Some((input, *cell)),
            _ => None,
        })
    }

    /// Versions of the resolved inputs of `id`.
    pub(crate) fn input_stamp(&self, id: CellId) -> InputStamp {
        self.resolved_inputs(id)
            .map(|input| {
                let version = self.cells.get(&input).map(|c| c.version).unwrap_or_default();
                (input, version)
            })
            .collect()
    }

    /// Re-resolve edges, detect collisions and cycles, rank the cells and
    /// derive every status. `in_flight` are cells with an evaluation
    /// outstanding.
    pub(crate) fn refresh(&mut self, in_flight: &HashSet<CellId>) {
        let providers = self.providers();
        let positions = range::positions(self.cells.values());

        let mut forward: HashMap<CellId, Vec<(InputRef, Resolved)>> = HashMap::new();
        let mut reverse: HashMap<CellId, BTreeSet<CellId>> = HashMap::new();
        let mut edges: Vec<(CellId, CellId)> = Vec::new();
        for cell in self.cells.values() {
            let resolved: Vec<(InputRef, Resolved)> = match &cell.kind {
                CellKind::Range { range } => {
                    range::span_inputs(positions.get(cell.resource.as_str()), &cell.resource, range)
                }
                CellKind::Plain { .. } => cell
                    .inputs()
                    .iter()
                    .map(|input| (input.clone(), self.resolve(cell, input, &providers)))
                    .collect(),
            };
            for (_, r) in &resolved {
                if let Resolved::Cell(input) = r {
                    edges.push((*input, cell.id));
                    reverse.entry(*input).or_default().insert(cell.id);
                }
            }
            forward.insert(cell.id, resolved);
        }
        self.forward = forward;
        self.reverse = reverse;

        let collisions: HashMap<CellId, String> = providers
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .flat_map(|((_, name), ids)| ids.iter().map(move |id| (*id, name.clone())))
            .collect();

        let nodes: Vec<CellId> = self.cells.keys().copied().collect();
        let ordering = order_cells(&nodes, &edges);
        self.ranked = ordering.ranked;

        for id in self.ranked.clone() {
            let (status, graph_error) =
                self.derive(id, collisions.get(&id), ordering.cyclic.contains(&id), in_flight);
            if let Some(cell) = self.cells.get_mut(&id) {
                if cell.status != status {
                    trace!(cell = %cell.name, from = %cell.status, to = %status, "status");
                }
                cell.status = status;
                cell.graph_error = graph_error;
            }
        }
        self.structure_changed = false;
    }

    /// Binders of each `(resource, name)`.
    fn providers(&self) -> HashMap<(String, String), Vec<CellId>> {
        let mut providers: HashMap<(String, String), Vec<CellId>> = HashMap::new();
        for cell in self.cells.values() {
            for name in cell.outputs() {
                providers
                    .entry((cell.resource.clone(), name.clone()))
                    .or_default()
                    .push(cell.id);
            }
        }
        providers
    }

    fn resolve(
        &self,
        cell: &Cell,
        input: &InputRef,
        providers: &HashMap<(String, String), Vec<CellId>>,
    ) -> Resolved {
        let by_name = |resource: &Option<String>, local: String| {
            let resource = resource.as_deref().unwrap_or(&cell.resource);
            match self.names.get(&qualify(resource, &local)) {
                Some(id) => Resolved::Cell(*id),
                None => Resolved::Missing,
            }
        };
        match input {
            InputRef::Cell { resource, cell } => by_name(resource, cell.to_string()),
            InputRef::Range { resource, range } => by_name(resource, range.normalized().to_string()),
            InputRef::Symbol(name) => {
                match providers.get(&(cell.resource.clone(), name.clone())) {
                    Some(ids) if ids.len() == 1 => Resolved::Cell(ids[0]),
                    Some(_) => Resolved::Ambiguous,
                    None => Resolved::Missing,
                }
            }
            InputRef::Broken => Resolved::Broken,
        }
    }

    fn derive(
        &self,
        id: CellId,
        collision: Option<&String>,
        cyclic: bool,
        in_flight: &HashSet<CellId>,
    ) -> (CellStatus, Option<CellError>) {
        let Some(cell) = self.cells.get(&id) else {
            return (CellStatus::Unknown, None);
        };
        if cell.dirty {
            return (CellStatus::Unknown, None);
        }
        if cell.static_error.is_some() {
            return (CellStatus::Broken, None);
        }
        if let Some(name) = collision {
            let error = CellError::new(
                ErrorKind::Collision,
                format!("'{}' is bound by more than one cell", name),
            );
            return (CellStatus::Broken, Some(error));
        }
        if cyclic {
            let error = CellError::new(ErrorKind::Cycle, "Circular dependency detected");
            return (CellStatus::Broken, Some(error));
        }

        let mut waiting = false;
        for (input, resolved) in self.forward.get(&id).into_iter().flatten() {
            let problem = match resolved {
                Resolved::Missing => Some(format!("Could not resolve '{}'", input.key())),
                Resolved::Ambiguous => Some(format!("'{}' is ambiguous", input.key())),
                Resolved::Broken => Some("Broken reference".to_string()),
                Resolved::Cell(input_id) => {
                    let status = self.cells.get(input_id).map(|c| c.status);
                    match status {
                        Some(s) if s.is_error() => {
                            Some(format!("Input '{}' has errors", input.key()))
                        }
                        Some(CellStatus::Ok) => None,
                        _ => {
                            waiting = true;
                            None
                        }
                    }
                }
            };
            if let Some(message) = problem {
                let error = CellError::new(ErrorKind::Unresolved, message);
                return (CellStatus::Broken, Some(error));
            }
        }
        if waiting || in_flight.contains(&id) {
            return (CellStatus::Waiting, None);
        }

        let current = self.input_stamp(id);
        let up_to_date = cell.stamp.as_ref() == Some(&current);
        if up_to_date && cell.runtime_error.is_some() {
            return (CellStatus::Failed, None);
        }
        if up_to_date && cell.value.is_some() {
            return (CellStatus::Ok, None);
        }
        (CellStatus::Ready, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::Analysis;
    use crate::engine::{CellSource, Value};

    fn graph_with_doc() -> CellGraph {
        let mut graph = CellGraph::new();
        graph.add_namespace("doc1", Namespace::document("mini")).unwrap();
        graph
    }

    /// Stand-in for a completed registration.
    fn analysed(graph: &mut CellGraph, id: CellId, inputs: &[&str], outputs: &[&str]) {
        let cell = graph.cell_mut(id).unwrap();
        cell.dirty = false;
        cell.analysis = Some(Analysis {
            inputs: inputs.iter().map(|s| InputRef::Symbol(s.to_string())).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        });
    }

    #[test]
    fn test_add_cell_rejects_duplicates_and_unknown_resources() {
        let mut graph = graph_with_doc();
        graph.add_cell(CellSpec::expression("doc1", "cell1", "1")).unwrap();
        assert_eq!(
            graph.add_cell(CellSpec::expression("doc1", "cell1", "2")),
            Err(EngineError::DuplicateId("doc1!cell1".into()))
        );
        assert_eq!(
            graph.add_cell(CellSpec::expression("nope", "cell1", "2")),
            Err(EngineError::UnknownResource("nope".into()))
        );
        assert!(graph.needs_update());
    }

    #[test]
    fn test_collision_is_derived_every_refresh() {
        let mut graph = graph_with_doc();
        let a = graph.add_cell(CellSpec::expression("doc1", "a", "x = 1")).unwrap();
        let b = graph.add_cell(CellSpec::expression("doc1", "b", "x = 2")).unwrap();
        analysed(&mut graph, a, &[], &["x"]);
        analysed(&mut graph, b, &[], &["x"]);
        graph.refresh(&HashSet::new());
        for id in [a, b] {
            let cell = graph.get_cell(id).unwrap();
            assert_eq!(cell.status(), CellStatus::Broken);
            assert_eq!(cell.errors()[0].kind, ErrorKind::Collision);
        }

        graph.remove_cell(b).unwrap();
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(a).unwrap().status(), CellStatus::Ready);
        assert!(!graph.get_cell(a).unwrap().has_errors());
    }

    #[test]
    fn test_missing_symbol_is_unresolved() {
        let mut graph = graph_with_doc();
        let id = graph.add_cell(CellSpec::expression("doc1", "c", "y * 2")).unwrap();
        analysed(&mut graph, id, &["y"], &[]);
        graph.refresh(&HashSet::new());
        let cell = graph.get_cell(id).unwrap();
        assert_eq!(cell.status(), CellStatus::Broken);
        assert_eq!(cell.errors()[0].kind, ErrorKind::Unresolved);
    }

    #[test]
    fn test_cycle_marks_every_member() {
        let mut graph = graph_with_doc();
        let a = graph.add_cell(CellSpec::expression("doc1", "a", "x = y")).unwrap();
        let b = graph.add_cell(CellSpec::expression("doc1", "b", "y = x")).unwrap();
        let c = graph.add_cell(CellSpec::expression("doc1", "c", "x + 1")).unwrap();
        analysed(&mut graph, a, &["y"], &["x"]);
        analysed(&mut graph, b, &["x"], &["y"]);
        analysed(&mut graph, c, &["x"], &[]);
        graph.refresh(&HashSet::new());
        for id in [a, b] {
            assert_eq!(graph.get_cell(id).unwrap().errors()[0].kind, ErrorKind::Cycle);
        }
        assert_eq!(graph.get_cell(c).unwrap().errors()[0].kind, ErrorKind::Unresolved);
    }

    #[test]
    fn test_status_follows_input_versions() {
        let mut graph = graph_with_doc();
        let x = graph.add_cell(CellSpec::expression("doc1", "x", "x = 1")).unwrap();
        let y = graph.add_cell(CellSpec::expression("doc1", "y", "y = x")).unwrap();
        analysed(&mut graph, x, &[], &["x"]);
        analysed(&mut graph, y, &["x"], &["y"]);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(y).unwrap().status(), CellStatus::Waiting);

        graph.cell_mut(x).unwrap().set_value(Value::Number(1.0), vec![]);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(y).unwrap().status(), CellStatus::Ready);

        let stamp = graph.input_stamp(y);
        graph.cell_mut(y).unwrap().set_value(Value::Number(1.0), stamp);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(y).unwrap().status(), CellStatus::Ok);
        assert_eq!(graph.dependents(x), vec![y]);
        assert_eq!(graph.predecessors(y), vec![x]);

        // Same value again: no new version, dependents stay up to date.
        graph.cell_mut(x).unwrap().set_value(Value::Number(1.0), vec![]);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(y).unwrap().status(), CellStatus::Ok);

        graph.cell_mut(x).unwrap().set_value(Value::Number(2.0), vec![]);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(y).unwrap().status(), CellStatus::Ready);
    }

    #[test]
    fn test_runtime_error_sticks_until_input_changes() {
        let mut graph = graph_with_doc();
        let x = graph.add_cell(CellSpec::expression("doc1", "x", "x = 1")).unwrap();
        let y = graph.add_cell(CellSpec::expression("doc1", "y", "y = x")).unwrap();
        analysed(&mut graph, x, &[], &["x"]);
        analysed(&mut graph, y, &["x"], &["y"]);
        graph.cell_mut(x).unwrap().set_value(Value::Number(1.0), vec![]);
        graph.refresh(&HashSet::new());

        graph.add_error(y, CellError::runtime("Ooops")).unwrap();
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(y).unwrap().status(), CellStatus::Failed);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(y).unwrap().status(), CellStatus::Failed);

        graph.cell_mut(x).unwrap().set_value(Value::Number(2.0), vec![]);
        graph.refresh(&HashSet::new());
        assert_eq!(graph.get_cell(y).unwrap().status(), CellStatus::Ready);
    }

    #[test]
    fn test_rename_cells_swaps_as_a_batch() {
        let mut graph = CellGraph::new();
        graph.add_namespace("sheet1", Namespace::sheet("mini")).unwrap();
        let a2 = graph.add_cell(CellSpec::sheet("sheet1", "A2", "1")).unwrap();
        let a3 = graph.add_cell(CellSpec::sheet("sheet1", "A3", "2")).unwrap();
        graph
            .rename_cells(&[(a2, "A3".to_string()), (a3, "A4".to_string())])
            .unwrap();
        assert_eq!(graph.lookup("sheet1!A3"), Some(a2));
        assert_eq!(graph.lookup("sheet1!A4"), Some(a3));
        assert_eq!(graph.lookup("sheet1!A2"), None);
        assert_eq!(graph.get_cell(a2).unwrap().local_id(), "A3");

        let a1 = graph.add_cell(CellSpec::sheet("sheet1", "A1", "0")).unwrap();
        assert_eq!(
            graph.rename_cells(&[(a1, "A4".to_string())]),
            Err(EngineError::DuplicateId("sheet1!A4".into()))
        );
    }

    #[test]
    fn test_update_cell_content_invalidates() {
        let mut graph = graph_with_doc();
        let id = graph.add_cell(CellSpec::expression("doc1", "c", "x = 1")).unwrap();
        analysed(&mut graph, id, &[], &["x"]);
        graph.refresh(&HashSet::new());
        assert!(!graph.needs_update());

        let patch = ContentPatch {
            source: Some(CellSource::Expression("x = 2".into())),
            lang: None,
        };
        graph.update_cell_content(id, patch).unwrap();
        let cell = graph.get_cell(id).unwrap();
        assert!(cell.is_dirty());
        assert!(cell.outputs().is_empty());
        assert!(graph.needs_update());
    }

    #[test]
    fn test_remove_namespace_drops_cells() {
        let mut graph = graph_with_doc();
        graph.add_cell(CellSpec::expression("doc1", "a", "1")).unwrap();
        graph.add_cell(CellSpec::expression("doc1", "b", "2")).unwrap();
        assert_eq!(graph.remove_namespace("doc1").unwrap().len(), 2);
        assert!(graph.is_empty());
        assert!(graph.namespace("doc1").is_none());
    }
}
