use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use crate::cfg::{ENTRY, InstructionGraph};
use crate::error::{BuildError, BuildResult};

/// Processing order of the live nodes with loop-closing edges removed.
#[derive(Debug)]
pub(crate) struct TraversalOrder {
    pub(crate) nodes: Vec<usize>,
    pub(crate) back_edges: BTreeSet<(usize, usize)>,
}

impl TraversalOrder {
    pub(crate) fn compute(graph: &InstructionGraph) -> BuildResult<Self> {
        let successors = graph.successors();
        let back_edges = find_back_edges(&successors);
        let nodes = topological_order(graph, &successors, &back_edges)?;
        Ok(TraversalOrder { nodes, back_edges })
    }

    #[cfg(test)]
    pub(crate) fn is_back_edge(&self, from: usize, to: usize) -> bool {
        self.back_edges.contains(&(from, to))
    }
}

/// Depth-first search from the entry; an edge is a back edge when its target
/// is still on the path that reached its source. Self loops qualify.
fn find_back_edges(successors: &[BTreeSet<usize>]) -> BTreeSet<(usize, usize)> {
    let mut back_edges = BTreeSet::new();
    let mut visited = vec![false; successors.len()];
    let mut on_path = vec![false; successors.len()];
    let mut stack: Vec<(usize, Vec<usize>)> = Vec::new();

    visited[ENTRY] = true;
    on_path[ENTRY] = true;
    stack.push((ENTRY, successors[ENTRY].iter().rev().copied().collect()));

    while let Some((node, pending)) = stack.last_mut() {
        let node = *node;
        let Some(successor) = pending.pop() else {
            on_path[node] = false;
            stack.pop();
            continue;
        };
        if on_path[successor] {
            back_edges.insert((node, successor));
        } else if !visited[successor] {
            visited[successor] = true;
            on_path[successor] = true;
            stack.push((
                successor,
                successors[successor].iter().rev().copied().collect(),
            ));
        }
    }
    back_edges
}

/// Kahn's algorithm over the forward edges; among ready nodes the smallest id
/// goes first.
fn topological_order(
    graph: &InstructionGraph,
    successors: &[BTreeSet<usize>],
    back_edges: &BTreeSet<(usize, usize)>,
) -> BuildResult<Vec<usize>> {
    let mut in_degree = vec![0usize; successors.len()];
    for (node, targets) in successors.iter().enumerate() {
        for target in targets {
            if !back_edges.contains(&(node, *target)) {
                in_degree[*target] += 1;
            }
        }
    }

    let mut ready = BinaryHeap::from([Reverse(ENTRY)]);
    let mut order = Vec::with_capacity(graph.live_count());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for target in &successors[node] {
            if back_edges.contains(&(node, *target)) {
                continue;
            }
            in_degree[*target] -= 1;
            if in_degree[*target] == 0 {
                ready.push(Reverse(*target));
            }
        }
    }

    if order.len() != graph.live_count() {
        let seen: BTreeSet<usize> = order.iter().copied().collect();
        let node = (0..graph.node_count())
            .find(|node| graph.is_live(*node) && !seen.contains(node))
            .unwrap_or(ENTRY);
        return Err(BuildError::IncompleteOrder { node });
    }
    Ok(order)
}
