use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BuildError, BuildResult};
use crate::method::{Insn, LabelId, MethodBody};

/// Node id of the synthetic entry. Instruction `i` of the stream is node `i + 1`.
pub(crate) const ENTRY: usize = 0;

/// How control reaches a node from one of its predecessors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    Exception,
}

/// Predecessor graph over single instructions.
#[derive(Debug)]
pub(crate) struct InstructionGraph {
    predecessors: Vec<BTreeSet<usize>>,
    kinds: BTreeMap<(usize, usize), EdgeKind>,
    live: Vec<bool>,
    label_nodes: BTreeMap<LabelId, usize>,
}

impl InstructionGraph {
    /// Build the graph of a method body: normal edges, then exception edges,
    /// then removal of everything unreachable from the entry.
    pub(crate) fn build(body: &MethodBody) -> BuildResult<Self> {
        let instructions = &body.instructions;
        let node_count = instructions.len() + 1;
        let mut label_nodes = BTreeMap::new();
        for (index, insn) in instructions.iter().enumerate() {
            if let Insn::Label(label) = insn {
                label_nodes.insert(*label, index + 1);
            }
        }

        let mut graph = InstructionGraph {
            predecessors: vec![BTreeSet::new(); node_count],
            kinds: BTreeMap::new(),
            live: vec![true; node_count],
            label_nodes,
        };

        if !instructions.is_empty() {
            graph.add_edge(ENTRY, 1, EdgeKind::FallThrough);
        }
        for (index, insn) in instructions.iter().enumerate() {
            let node = index + 1;
            for target in insn.branch_targets() {
                let target = graph.node_of(target)?;
                graph.add_edge(node, target, EdgeKind::Branch);
            }
            if insn.falls_through() && node + 1 < node_count {
                graph.add_edge(node, node + 1, EdgeKind::FallThrough);
            }
        }

        for handler in &body.exception_handlers {
            let start = graph.node_of(handler.start)?;
            let end = graph.node_of(handler.end)?;
            let target = graph.node_of(handler.handler)?;
            if start == target {
                continue;
            }
            for node in start..end {
                graph.add_edge(node, target, EdgeKind::Exception);
            }
            let outside: Vec<usize> = graph.predecessors[start]
                .iter()
                .copied()
                .filter(|predecessor| *predecessor < start || *predecessor > end)
                .collect();
            for predecessor in outside {
                graph.add_edge(predecessor, target, EdgeKind::Exception);
            }
        }

        graph.remove_unreachable();
        Ok(graph)
    }

    fn add_edge(&mut self, from: usize, to: usize, kind: EdgeKind) {
        self.predecessors[to].insert(from);
        self.kinds.entry((from, to)).or_insert(kind);
    }

    fn remove_unreachable(&mut self) {
        let successors = self.successors();
        let mut reached = vec![false; self.predecessors.len()];
        let mut worklist = vec![ENTRY];
        reached[ENTRY] = true;
        while let Some(node) = worklist.pop() {
            for successor in &successors[node] {
                if !reached[*successor] {
                    reached[*successor] = true;
                    worklist.push(*successor);
                }
            }
        }

        for node in 0..self.predecessors.len() {
            if !reached[node] {
                self.live[node] = false;
                self.predecessors[node].clear();
            }
        }
        for predecessors in &mut self.predecessors {
            predecessors.retain(|predecessor| reached[*predecessor]);
        }
        self.kinds.retain(|(from, to), _| reached[*from] && reached[*to]);
    }

    pub(crate) fn node_count(&self) -> usize {
        self.predecessors.len()
    }

    /// Node holding the marker of `label`.
    pub(crate) fn node_of(&self, label: LabelId) -> BuildResult<usize> {
        self.label_nodes
            .get(&label)
            .copied()
            .ok_or(BuildError::UnknownLabel(label))
    }

    pub(crate) fn predecessors(&self, node: usize) -> &BTreeSet<usize> {
        &self.predecessors[node]
    }

    pub(crate) fn single_predecessor(&self, node: usize) -> BuildResult<usize> {
        let predecessors = &self.predecessors[node];
        match (predecessors.len(), predecessors.first()) {
            (1, Some(predecessor)) => Ok(*predecessor),
            _ => Err(BuildError::NoSinglePredecessor { node }),
        }
    }

    pub(crate) fn has_multiple_predecessors(&self, node: usize) -> bool {
        self.predecessors[node].len() > 1
    }

    /// Whether the node is reachable from the entry.
    pub(crate) fn is_live(&self, node: usize) -> bool {
        self.live[node]
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.iter().filter(|live| **live).count()
    }

    pub(crate) fn edge_kind(&self, from: usize, to: usize) -> Option<EdgeKind> {
        self.kinds.get(&(from, to)).copied()
    }

    /// Successor sets, derived from the predecessor sets.
    pub(crate) fn successors(&self) -> Vec<BTreeSet<usize>> {
        let mut successors = vec![BTreeSet::new(); self.predecessors.len()];
        for (node, predecessors) in self.predecessors.iter().enumerate() {
            for predecessor in predecessors {
                successors[*predecessor].insert(node);
            }
        }
        successors
    }

    /// Members of `group` that can be entered from outside it: nodes with a
    /// predecessor outside the group, and nodes without predecessors.
    pub(crate) fn find_start_nodes(&self, group: &BTreeSet<usize>) -> BTreeSet<usize> {
        group
            .iter()
            .copied()
            .filter(|node| {
                let predecessors = &self.predecessors[*node];
                predecessors.is_empty()
                    || predecessors
                        .iter()
                        .any(|predecessor| !group.contains(predecessor))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{ExceptionHandler, JumpOp, Literal};

    fn body(instructions: Vec<Insn>, exception_handlers: Vec<ExceptionHandler>) -> MethodBody {
        MethodBody {
            owner: "demo/Sample".to_string(),
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            is_static: true,
            parameter_names: Vec::new(),
            instructions,
            exception_handlers,
            local_variables: Vec::new(),
        }
    }

    #[test]
    fn conditional_jump_has_branch_and_fallthrough_edges() {
        let graph = InstructionGraph::build(&body(
            vec![
                Insn::Const(Literal::Int(0)),
                Insn::Jump {
                    op: JumpOp::IfEq,
                    target: LabelId(0),
                },
                Insn::Nop,
                Insn::Label(LabelId(0)),
                Insn::Return,
            ],
            Vec::new(),
        ))
        .expect("build graph");

        assert_eq!(graph.predecessors(1), &BTreeSet::from([ENTRY]));
        assert_eq!(graph.predecessors(4), &BTreeSet::from([2, 3]));
        assert_eq!(graph.edge_kind(2, 4), Some(EdgeKind::Branch));
        assert_eq!(graph.edge_kind(2, 3), Some(EdgeKind::FallThrough));
        assert!(graph.has_multiple_predecessors(4));
        assert_eq!(graph.single_predecessor(5), Ok(4));
    }

    #[test]
    fn goto_and_return_do_not_fall_through() {
        let graph = InstructionGraph::build(&body(
            vec![
                Insn::Jump {
                    op: JumpOp::Goto,
                    target: LabelId(0),
                },
                Insn::Nop,
                Insn::Label(LabelId(0)),
                Insn::Return,
                Insn::Nop,
            ],
            Vec::new(),
        ))
        .expect("build graph");

        assert!(!graph.is_live(2));
        assert!(!graph.is_live(5));
        assert_eq!(graph.predecessors(3), &BTreeSet::from([1]));
        assert_eq!(graph.live_count(), 4);
        assert_eq!(
            graph.single_predecessor(2),
            Err(BuildError::NoSinglePredecessor { node: 2 })
        );
    }

    #[test]
    fn dead_cycles_are_pruned() {
        let graph = InstructionGraph::build(&body(
            vec![
                Insn::Return,
                Insn::Label(LabelId(0)),
                Insn::Nop,
                Insn::Jump {
                    op: JumpOp::Goto,
                    target: LabelId(0),
                },
            ],
            Vec::new(),
        ))
        .expect("build graph");

        for node in 2..=4 {
            assert!(!graph.is_live(node), "node {node}");
            assert!(graph.predecessors(node).is_empty());
        }
    }

    #[test]
    fn every_instruction_in_protected_range_precedes_handler() {
        let graph = InstructionGraph::build(&body(
            vec![
                Insn::Label(LabelId(0)),
                Insn::Nop,
                Insn::Nop,
                Insn::Label(LabelId(1)),
                Insn::Return,
                Insn::Label(LabelId(2)),
                Insn::Throw,
            ],
            vec![ExceptionHandler {
                start: LabelId(0),
                end: LabelId(1),
                handler: LabelId(2),
                catch_type: None,
            }],
        ))
        .expect("build graph");

        // range is the label and both nops; the entry precedes the start
        assert_eq!(graph.predecessors(6), &BTreeSet::from([ENTRY, 1, 2, 3]));
        for node in 1..=3 {
            assert_eq!(graph.edge_kind(node, 6), Some(EdgeKind::Exception));
        }
        assert!(graph.is_live(7));
    }

    #[test]
    fn unknown_jump_target_is_fatal() {
        let error = InstructionGraph::build(&body(
            vec![Insn::Jump {
                op: JumpOp::Goto,
                target: LabelId(42),
            }],
            Vec::new(),
        ))
        .expect_err("dangling label");
        assert_eq!(error, BuildError::UnknownLabel(LabelId(42)));
    }

    #[test]
    fn start_nodes_have_outside_predecessors() {
        let graph = InstructionGraph::build(&body(
            vec![Insn::Nop, Insn::Nop, Insn::Nop, Insn::Return],
            Vec::new(),
        ))
        .expect("build graph");
        let group = BTreeSet::from([2, 3]);
        assert_eq!(graph.find_start_nodes(&group), BTreeSet::from([2]));
        assert_eq!(
            graph.find_start_nodes(&BTreeSet::from([ENTRY, 1])),
            BTreeSet::from([ENTRY])
        );
    }
}
