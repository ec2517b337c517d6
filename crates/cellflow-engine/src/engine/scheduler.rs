//! The incremental scheduler.
//!
//! Each call to [`Engine::cycle`] runs three phases on one consistent
//! snapshot of the graph:
//!
//! 1. **collect**: results of operations that completed since the last
//!    cycle are applied, in the order they arrived. A finished evaluation is
//!    the cell's `update` action.
//! 2. **refresh**: range cells are synchronised, then the graph re-resolves
//!    edges and derives every status.
//! 3. **dispatch**: every dirty cell is registered (analysed) and every
//!    `ready` cell that may run is evaluated. Each dispatched operation is a
//!    future handed back to the caller in the [`CycleReport`].
//!
//! A cell never has more than one operation outstanding, and never gets more
//! than one action per cycle. Results that arrive for a removed cell, or for
//! a cell whose content changed after dispatch, are dropped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::oneshot;
use futures::future::{self, BoxFuture};
use futures::{Future, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, trace, warn};

use super::cell::{Cell, CellError, CellId, CellKind, CellSource, CellStatus, ErrorKind, InputStamp};
use super::context::{Analysis, Host, LanguageContext};
use super::graph::CellGraph;
use super::range;
use super::value::Value;
use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Register,
    Evaluate,
    Update,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Register => "register",
            ActionKind::Evaluate => "evaluate",
            ActionKind::Update => "update",
        }
    }
}

enum Outcome {
    Registered(std::result::Result<Analysis, CellError>),
    Evaluated(std::result::Result<Value, CellError>),
}

struct Completion {
    arrival: u64,
    outcome: Outcome,
}

struct Outstanding {
    kind: ActionKind,
    revision: u64,
    /// Inputs the evaluation was dispatched with.
    stamp: InputStamp,
    rx: oneshot::Receiver<Completion>,
}

/// What one cycle did.
#[derive(Default)]
pub struct CycleReport {
    /// The action performed on each cell this cycle.
    pub actions: BTreeMap<CellId, ActionKind>,
    pending: Vec<BoxFuture<'static, ()>>,
}

impl CycleReport {
    pub fn action(&self, id: CellId) -> Option<ActionKind> {
        self.actions.get(&id).copied()
    }

    /// Number of operations dispatched this cycle.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.pending.is_empty()
    }

    /// Drive every operation dispatched this cycle to completion. Their
    /// results are applied by the next cycle.
    pub async fn settle(self) {
        future::join_all(self.pending).await;
    }

    /// Take the dispatched operations, to drive them elsewhere.
    pub fn into_futures(self) -> Vec<BoxFuture<'static, ()>> {
        self.pending
    }
}

pub struct Engine {
    graph: CellGraph,
    host: Arc<dyn Host>,
    outstanding: HashMap<CellId, Outstanding>,
    arrivals: Arc<AtomicU64>,
    /// Manual mode: cells allowed to evaluate once.
    grants: HashSet<CellId>,
    /// Manual mode: cells whose predecessors are granted as they become known.
    chain_grants: HashSet<CellId>,
    cycles: u64,
}

impl Engine {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            graph: CellGraph::new(),
            host,
            outstanding: HashMap::new(),
            arrivals: Arc::new(AtomicU64::new(0)),
            grants: HashSet::new(),
            chain_grants: HashSet::new(),
            cycles: 0,
        }
    }

    pub fn graph(&self) -> &CellGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut CellGraph {
        &mut self.graph
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Number of cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one scheduling cycle.
    pub fn cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let span = debug_span!("cycle", n = self.cycles);
        let _enter = span.enter();

        let mut report = CycleReport::default();
        self.collect(&mut report);
        self.refresh();
        self.dispatch(&mut report);
        trace!(actions = report.actions.len(), pending = report.pending(), "cycle done");
        report
    }

    /// True while another cycle would make progress: the graph changed, an
    /// operation is outstanding, or a cell is ready and allowed to run.
    pub fn needs_update(&self) -> bool {
        self.graph.needs_update()
            || !self.outstanding.is_empty()
            || self
                .graph
                .cells()
                .any(|c| c.status() == CellStatus::Ready && self.may_run(c))
    }

    pub fn is_quiescent(&self) -> bool {
        !self.needs_update()
    }

    /// Work that is scheduled or in flight, per cell: `register` for dirty
    /// cells and running analyses, `evaluate` for runnable ready cells,
    /// `update` for running evaluations whose result is still to be applied.
    pub fn pending_actions(&self) -> BTreeMap<CellId, ActionKind> {
        let mut actions = BTreeMap::new();
        for cell in self.graph.cells() {
            let action = match self.outstanding.get(&cell.id()) {
                Some(op) if op.kind == ActionKind::Register => Some(ActionKind::Register),
                Some(_) => Some(ActionKind::Update),
                None if cell.is_dirty() => Some(ActionKind::Register),
                None if cell.status() == CellStatus::Ready && self.may_run(cell) => {
                    Some(ActionKind::Evaluate)
                }
                None => None,
            };
            if let Some(action) = action {
                actions.insert(cell.id(), action);
            }
        }
        actions
    }

    /// Cycle, settling every cycle's operations, until nothing is left to do
    /// or `max_cycles` is reached. Returns the number of cycles run.
    pub fn run_until_quiescent(&mut self, max_cycles: usize) -> usize {
        let mut cycles = 0;
        while cycles < max_cycles && self.needs_update() {
            let report = self.cycle();
            futures::executor::block_on(report.settle());
            cycles += 1;
        }
        if self.needs_update() {
            warn!(max_cycles, "engine not quiescent after cycle limit");
        }
        cycles
    }

    // Manual execution

    /// Allow one evaluation of `id`.
    pub fn allow_cell(&mut self, id: CellId) -> Result<()> {
        self.ensure_cell(id)?;
        self.grants.insert(id);
        Ok(())
    }

    /// Allow one evaluation of `id` and of everything it depends on.
    pub fn allow_cell_and_predecessors(&mut self, id: CellId) -> Result<()> {
        self.ensure_cell(id)?;
        self.grants.insert(id);
        self.chain_grants.insert(id);
        self.expand_chain_grants();
        Ok(())
    }

    /// Allow one evaluation of every cell of `resource`.
    pub fn allow_resource(&mut self, resource: &str) -> Result<()> {
        if self.graph.namespace(resource).is_none() {
            return Err(EngineError::UnknownResource(resource.to_string()));
        }
        let ids: Vec<CellId> = self.graph.cells_of(resource).map(|c| c.id()).collect();
        self.grants.extend(ids);
        Ok(())
    }

    /// Evaluate `id` again even though its inputs did not change. Clears a
    /// runtime error; a cell with a context error is registered again. In
    /// manual mode this also grants the evaluation.
    pub fn recompute(&mut self, id: CellId) -> Result<()> {
        let cell = self
            .graph
            .cell_mut(id)
            .ok_or_else(|| EngineError::UnknownCell(id.to_string()))?;
        debug!(cell = %cell.name(), "recompute");
        if cell.static_error.as_ref().is_some_and(|e| e.kind == ErrorKind::Context) {
            cell.invalidate();
        } else {
            cell.stamp = None;
        }
        let manual = self
            .graph
            .get_cell(id)
            .and_then(|c| self.graph.namespace(c.resource()))
            .is_some_and(|ns| !ns.autorun);
        if manual {
            self.grants.insert(id);
        }
        Ok(())
    }

    fn ensure_cell(&self, id: CellId) -> Result<()> {
        if self.graph.has_cell(id) {
            Ok(())
        } else {
            Err(EngineError::UnknownCell(id.to_string()))
        }
    }

    fn may_run(&self, cell: &Cell) -> bool {
        if cell.is_range() || self.grants.contains(&cell.id()) {
            return true;
        }
        self.graph
            .namespace(cell.resource())
            .is_none_or(|ns| ns.autorun)
    }

    fn expand_chain_grants(&mut self) {
        let graph = &self.graph;
        self.chain_grants.retain(|id| graph.has_cell(*id));
        for root in &self.chain_grants {
            for id in graph.predecessors(*root) {
                let done = graph.get_cell(id).is_none_or(|c| c.status() == CellStatus::Ok);
                if !done {
                    self.grants.insert(id);
                }
            }
        }
    }

    // Phases

    fn collect(&mut self, report: &mut CycleReport) {
        let mut arrived: Vec<(CellId, Outstanding, Completion)> = Vec::new();
        let ids: Vec<CellId> = self.outstanding.keys().copied().collect();
        for id in ids {
            let Some(op) = self.outstanding.get_mut(&id) else {
                continue;
            };
            match op.rx.try_recv() {
                Ok(Some(completion)) => {
                    if let Some(op) = self.outstanding.remove(&id) {
                        arrived.push((id, op, completion));
                    }
                }
                Ok(None) => {}
                Err(oneshot::Canceled) => {
                    warn!(%id, action = op.kind.as_str(), "operation dropped before completion");
                    self.outstanding.remove(&id);
                }
            }
        }

        arrived.sort_by_key(|(_, _, completion)| completion.arrival);
        for (id, op, completion) in arrived {
            self.apply(id, op, completion.outcome, report);
        }
    }

    fn apply(&mut self, id: CellId, op: Outstanding, outcome: Outcome, report: &mut CycleReport) {
        let Some(cell) = self.graph.cell_mut(id) else {
            debug!(%id, action = op.kind.as_str(), "result for removed cell dropped");
            return;
        };
        if cell.revision != op.revision {
            debug!(cell = %cell.name(), action = op.kind.as_str(), "stale result dropped");
            return;
        }
        match outcome {
            Outcome::Registered(Ok(analysis)) => {
                trace!(cell = %cell.name(), inputs = analysis.inputs.len(), "registered");
                cell.dirty = false;
                cell.analysis = Some(analysis);
            }
            Outcome::Registered(Err(error)) => {
                debug!(cell = %cell.name(), %error, "registration failed");
                cell.dirty = false;
                cell.analysis = None;
                cell.static_error = Some(error);
            }
            Outcome::Evaluated(result) => {
                match result {
                    Ok(value) => {
                        trace!(cell = %cell.name(), ?value, "evaluated");
                        cell.set_value(value, op.stamp);
                    }
                    Err(error) if error.kind == ErrorKind::Runtime => {
                        debug!(cell = %cell.name(), %error, "evaluation failed");
                        cell.set_runtime_error(error, op.stamp);
                    }
                    Err(error) => {
                        warn!(cell = %cell.name(), %error, "evaluation failed");
                        cell.static_error = Some(error);
                    }
                }
                report.actions.insert(id, ActionKind::Update);
            }
        }
    }

    fn refresh(&mut self) {
        range::sync_range_cells(&mut self.graph);
        let in_flight: HashSet<CellId> = self
            .outstanding
            .iter()
            .filter(|(_, op)| op.kind == ActionKind::Evaluate)
            .map(|(id, _)| *id)
            .collect();
        self.graph.refresh(&in_flight);

        let graph = &self.graph;
        self.grants.retain(|id| {
            graph.get_cell(*id).is_some_and(|c| {
                !matches!(c.status(), CellStatus::Ok | CellStatus::Broken | CellStatus::Failed)
            })
        });
        self.expand_chain_grants();
    }

    fn dispatch(&mut self, report: &mut CycleReport) {
        let ranked = self.graph.ranked().to_vec();
        for id in ranked {
            if self.outstanding.contains_key(&id) || report.actions.contains_key(&id) {
                continue;
            }
            let Some(cell) = self.graph.get_cell(id) else {
                continue;
            };
            if cell.is_dirty() {
                self.register(id, report);
            } else if cell.status() == CellStatus::Ready && self.may_run(cell) {
                self.evaluate(id, report);
            }
        }
    }

    fn context_for(&self, cell: &Cell) -> std::result::Result<Arc<dyn LanguageContext>, CellError> {
        let lang = match cell.lang() {
            Some(lang) => lang.to_string(),
            None => self
                .graph
                .namespace(cell.resource())
                .map(|ns| ns.lang.clone())
                .ok_or_else(|| CellError::context(format!("Unknown resource {}", cell.resource())))?,
        };
        self.host.context(&lang).inspect_err(|error| {
            warn!(cell = %cell.name(), %lang, %error, "no language context");
        })
    }

    fn register(&mut self, id: CellId, report: &mut CycleReport) {
        let Some(cell) = self.graph.get_cell(id) else {
            return;
        };
        let revision = cell.revision;
        let analysis = match cell.kind() {
            // Range inputs are resolved against the resource on every refresh.
            CellKind::Range { .. } => future::ready(Ok(Analysis::default())).boxed(),
            CellKind::Plain {
                source: CellSource::Constant(text),
                ..
            } => {
                // Literals need no context: they are registered and valued at once.
                let value = Value::parse_literal(text);
                trace!(cell = %cell.name(), ?value, "constant");
                if let Some(cell) = self.graph.cell_mut(id) {
                    cell.dirty = false;
                    cell.analysis = Some(Analysis::default());
                    cell.set_value(value, Vec::new());
                }
                report.actions.insert(id, ActionKind::Register);
                return;
            }
            CellKind::Plain {
                source: CellSource::Expression(expr),
                ..
            } => match self.context_for(cell) {
                Ok(context) => context.analyze(expr),
                Err(error) => future::ready(Err(error)).boxed(),
            },
        };
        debug!(cell = %cell.name(), "register");
        self.spawn(
            id,
            ActionKind::Register,
            revision,
            Vec::new(),
            analysis.map(Outcome::Registered),
            report,
        );
    }

    fn evaluate(&mut self, id: CellId, report: &mut CycleReport) {
        let Some(cell) = self.graph.get_cell(id) else {
            return;
        };
        let revision = cell.revision;
        let stamp = self.graph.input_stamp(id);
        let result = match cell.kind() {
            CellKind::Range { .. } => future::ready(Ok(range::aggregate(&self.graph, id))).boxed(),
            CellKind::Plain {
                source: CellSource::Constant(text),
                ..
            } => future::ready(Ok(Value::parse_literal(text))).boxed(),
            CellKind::Plain {
                source: CellSource::Expression(expr),
                ..
            } => match self.context_for(cell) {
                Ok(context) => {
                    let inputs: HashMap<String, Value> = self
                        .graph
                        .input_bindings(id)
                        .map(|(input, input_id)| {
                            let value = self
                                .graph
                                .get_cell(input_id)
                                .and_then(|c| c.value().cloned())
                                .unwrap_or(Value::Null);
                            (input.key(), value)
                        })
                        .collect();
                    context.execute(expr, inputs)
                }
                Err(error) => future::ready(Err(error)).boxed(),
            },
        };
        debug!(cell = %cell.name(), "evaluate");
        self.grants.remove(&id);
        self.chain_grants.remove(&id);
        self.spawn(
            id,
            ActionKind::Evaluate,
            revision,
            stamp,
            result.map(Outcome::Evaluated),
            report,
        );
    }

    fn spawn<F>(
        &mut self,
        id: CellId,
        kind: ActionKind,
        revision: u64,
        stamp: InputStamp,
        operation: F,
        report: &mut CycleReport,
    ) where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let arrivals = Arc::clone(&self.arrivals);
        let task = async move {
            let outcome = operation.await;
            let arrival = arrivals.fetch_add(1, Ordering::SeqCst);
            // The engine may be gone by now; nothing to report to then.
            let _ = tx.send(Completion { arrival, outcome });
        };
        report.pending.push(task.boxed());
        report.actions.insert(id, kind);
        self.outstanding.insert(
            id,
            Outstanding {
                kind,
                revision,
                stamp,
                rx,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::{AnalyzeFuture, ContextRegistry, ExecuteFuture};
    use crate::engine::graph::Namespace;
    use crate::engine::mini::{MINI, MiniContext};
    use crate::engine::{CellSpec, ContentPatch};
    use futures::executor::block_on;

    fn engine() -> (Engine, Arc<ContextRegistry>) {
        let registry = Arc::new(ContextRegistry::new());
        registry.register(MINI, Arc::new(MiniContext::new()));
        let mut engine = Engine::new(registry.clone());
        engine
            .graph_mut()
            .add_namespace("doc1", Namespace::document(MINI))
            .unwrap();
        (engine, registry)
    }

    fn add(engine: &mut Engine, local: &str, source: &str) -> CellId {
        engine
            .graph_mut()
            .add_cell(CellSpec::expression("doc1", local, source))
            .unwrap()
    }

    fn value(engine: &Engine, id: CellId) -> Option<Value> {
        engine.graph().get_cell(id).and_then(|c| c.value().cloned())
    }

    fn step(engine: &mut Engine) -> BTreeMap<CellId, ActionKind> {
        let report = engine.cycle();
        let actions = report.actions.clone();
        block_on(report.settle());
        actions
    }

    #[test]
    fn test_single_cell_register_evaluate_update() {
        let (mut engine, _) = engine();
        let id = add(&mut engine, "cell1", "1+2");

        assert_eq!(step(&mut engine).get(&id), Some(&ActionKind::Register));
        assert_eq!(engine.graph().get_cell(id).unwrap().status(), CellStatus::Unknown);
        assert_eq!(step(&mut engine).get(&id), Some(&ActionKind::Evaluate));
        assert_eq!(step(&mut engine).get(&id), Some(&ActionKind::Update));

        assert!(engine.pending_actions().is_empty());
        assert!(engine.is_quiescent());
        let cell = engine.graph().get_cell(id).unwrap();
        assert!(!cell.has_errors());
        assert_eq!(cell.status(), CellStatus::Ok);
        assert_eq!(value(&engine, id), Some(Value::Number(3.0)));
    }

    #[test]
    fn test_bindings_converge() {
        let (mut engine, _) = engine();
        let x = add(&mut engine, "c1", "x = 2");
        let y = add(&mut engine, "c2", "y = 3");
        let z = add(&mut engine, "c3", "z = x + y");
        engine.run_until_quiescent(100);
        assert_eq!(value(&engine, x), Some(Value::Number(2.0)));
        assert_eq!(value(&engine, y), Some(Value::Number(3.0)));
        assert_eq!(value(&engine, z), Some(Value::Number(5.0)));
    }

    #[test]
    fn test_unchanged_value_does_not_reevaluate_dependents() {
        let (mut engine, _) = engine();
        let x = add(&mut engine, "c1", "x = 2");
        let y = add(&mut engine, "c2", "y = x * 2");
        engine.run_until_quiescent(100);

        let patch = ContentPatch {
            source: Some(CellSource::Expression("x = 1 + 1".into())),
            lang: None,
        };
        engine.graph_mut().update_cell_content(x, patch).unwrap();
        let mut evaluated = Vec::new();
        while engine.needs_update() {
            let actions = step(&mut engine);
            evaluated.extend(actions.into_iter().filter(|(_, a)| *a == ActionKind::Evaluate));
        }
        assert_eq!(evaluated, vec![(x, ActionKind::Evaluate)]);
        assert_eq!(value(&engine, y), Some(Value::Number(4.0)));
    }

    #[test]
    fn test_stale_result_is_dropped() {
        let (mut engine, _) = engine();
        let id = add(&mut engine, "c1", "x = 1");
        step(&mut engine);
        // Evaluation of `x = 1` is now in flight.
        let report = engine.cycle();
        assert_eq!(report.action(id), Some(ActionKind::Evaluate));
        let patch = ContentPatch {
            source: Some(CellSource::Expression("x = 5".into())),
            lang: None,
        };
        engine.graph_mut().update_cell_content(id, patch).unwrap();
        block_on(report.settle());

        engine.run_until_quiescent(100);
        assert_eq!(value(&engine, id), Some(Value::Number(5.0)));
    }

    #[test]
    fn test_result_for_removed_cell_is_ignored() {
        let (mut engine, _) = engine();
        let id = add(&mut engine, "c1", "x = 1");
        let report = engine.cycle();
        engine.graph_mut().remove_cell(id).unwrap();
        block_on(report.settle());
        engine.run_until_quiescent(100);
        assert!(engine.graph().is_empty());
        assert!(engine.is_quiescent());
    }

    #[test]
    fn test_dropped_operation_is_retried() {
        let (mut engine, _) = engine();
        let id = add(&mut engine, "c1", "x = 1");
        drop(engine.cycle());
        engine.run_until_quiescent(100);
        assert_eq!(value(&engine, id), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_missing_context_is_a_context_error() {
        let (mut engine, _) = engine();
        engine
            .graph_mut()
            .add_namespace("doc2", Namespace::document("foo"))
            .unwrap();
        let id = engine
            .graph_mut()
            .add_cell(CellSpec::expression("doc2", "c1", "x = 2"))
            .unwrap();
        engine.run_until_quiescent(100);
        let cell = engine.graph().get_cell(id).unwrap();
        assert_eq!(cell.status(), CellStatus::Broken);
        assert_eq!(cell.errors()[0].kind, ErrorKind::Context);
    }

    #[test]
    fn test_recompute_recovers_from_lost_context() {
        let (mut engine, registry) = engine();
        let id = add(&mut engine, "c1", "x = 2");
        step(&mut engine);
        registry.remove(MINI);
        engine.run_until_quiescent(100);
        assert_eq!(
            engine.graph().get_cell(id).unwrap().errors()[0].kind,
            ErrorKind::Context
        );

        registry.register(MINI, Arc::new(MiniContext::new()));
        engine.run_until_quiescent(100);
        assert_eq!(engine.graph().get_cell(id).unwrap().status(), CellStatus::Broken);

        engine.recompute(id).unwrap();
        engine.run_until_quiescent(100);
        assert_eq!(value(&engine, id), Some(Value::Number(2.0)));
    }

    struct Echo;

    impl LanguageContext for Echo {
        fn analyze(&self, _source: &str) -> AnalyzeFuture {
            future::ready(Ok(Analysis::default())).boxed()
        }

        fn execute(&self, source: &str, _inputs: HashMap<String, Value>) -> ExecuteFuture {
            let value = Value::Text(source.to_string());
            async move { Ok(value) }.boxed()
        }
    }

    #[test]
    fn test_results_wait_for_the_caller_to_drive_them() {
        let registry = Arc::new(ContextRegistry::new());
        registry.register("echo", Arc::new(Echo));
        let mut engine = Engine::new(registry);
        engine
            .graph_mut()
            .add_namespace("doc1", Namespace::document("echo"))
            .unwrap();
        let id = engine
            .graph_mut()
            .add_cell(CellSpec::expression("doc1", "c1", "hello"))
            .unwrap();
        step(&mut engine);

        let report = engine.cycle();
        assert_eq!(report.pending(), 1);
        // Not driven yet: the next cycle has nothing to apply.
        let mut futures = report.into_futures();
        assert!(engine.cycle().is_empty());
        assert_eq!(engine.graph().get_cell(id).unwrap().status(), CellStatus::Waiting);
        assert_eq!(engine.pending_actions().get(&id), Some(&ActionKind::Update));

        block_on(futures.remove(0));
        assert_eq!(engine.cycle().action(id), Some(ActionKind::Update));
        assert_eq!(value(&engine, id), Some(Value::Text("hello".into())));
    }
}
