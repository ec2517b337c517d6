//! Circular dependency detection and evaluation order.
//!
//! Cells and their resolved input edges form a directed graph. Strongly
//! connected components with more than one cell, and cells reading
//! themselves, are cycles. Every cell gets a deterministic rank: inputs come
//! before their dependents, ties go to the cell added first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use super::cell::CellId;

pub(crate) struct Ordering {
    /// All cells, inputs before dependents.
    pub ranked: Vec<CellId>,
    /// Cells that are part of a cycle.
    pub cyclic: HashSet<CellId>,
}

/// Order `nodes` given `(input, dependent)` edges.
pub(crate) fn order_cells(nodes: &[CellId], edges: &[(CellId, CellId)]) -> Ordering {
    let mut graph: DiGraphMap<CellId, ()> = DiGraphMap::new();
    for &id in nodes {
        graph.add_node(id);
    }
    for &(from, to) in edges {
        graph.add_edge(from, to, ());
    }

    let mut component: HashMap<CellId, usize> = HashMap::new();
    let mut cyclic: HashSet<CellId> = HashSet::new();
    for (index, scc) in tarjan_scc(&graph).into_iter().enumerate() {
        let is_cycle = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
        for id in scc {
            component.insert(id, index);
            if is_cycle {
                cyclic.insert(id);
            }
        }
    }

    // Kahn over the condensation; edges inside a component don't count.
    let crosses = |a: &CellId, b: &CellId| component.get(a) != component.get(b);
    let mut indegree: HashMap<CellId, usize> = nodes.iter().map(|&id| (id, 0)).collect();
    for (from, to, _) in graph.all_edges() {
        if crosses(&from, &to) {
            *indegree.entry(to).or_default() += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<CellId>> = indegree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(&id, _)| Reverse(id))
        .collect();
    let mut ranked = Vec::with_capacity(nodes.len());
    while let Some(Reverse(id)) = ready.pop() {
        ranked.push(id);
        for next in graph.neighbors(id) {
            if !crosses(&id, &next) {
                continue;
            }
            if let Some(deg) = indegree.get_mut(&next) {
                *deg -= 1;
                if *deg == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
    }

    Ordering { ranked, cyclic }
}
