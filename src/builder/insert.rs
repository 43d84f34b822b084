use std::collections::BTreeSet;

use log::trace;

use super::BuildState;
use crate::cfg::{ENTRY, EdgeKind};
use crate::error::BuildResult;
use crate::frame::Frame;
use crate::ir::{Inst, LocalVar, Value};
use crate::method::Insn;

/// `target := current` at the end of `predecessor`.
struct AssignmentRequest {
    predecessor: usize,
    target: LocalVar,
    current: Value,
}

impl BuildState<'_> {
    /// Feed every merge variable from each predecessor whose frame holds a
    /// different value. Locals of all joins go first, then stack slots.
    pub(super) fn insert_merge_assignments(&mut self) {
        let merges = std::mem::take(&mut self.merges);
        for merge in &merges {
            for (slot, target) in &merge.locals {
                let requests = self.requests(merge.node, target, |frame| frame.local(*slot).cloned());
                self.insert_requests(requests);
            }
        }
        for merge in &merges {
            for (index, target) in &merge.stack {
                let requests = self.requests(merge.node, target, |frame| frame.stack().get(*index).cloned());
                self.insert_requests(requests);
            }
        }
    }

    fn requests(
        &self,
        node: usize,
        target: &LocalVar,
        read: impl Fn(&Frame) -> Option<Value>,
    ) -> Vec<AssignmentRequest> {
        // A hint may have re-typed the merge variable itself on a back edge.
        let resolved = |local: &LocalVar| self.refinements.resolve(local).unwrap_or_else(|| local.clone());
        let wanted = resolved(target);
        self.graph
            .predecessors(node)
            .iter()
            .filter_map(|predecessor| {
                let current = read(self.frames[*predecessor].as_ref()?)?;
                let feeds_itself = current.as_local().is_some_and(|local| resolved(local) == wanted);
                (!feeds_itself).then(|| AssignmentRequest {
                    predecessor: *predecessor,
                    target: target.clone(),
                    current,
                })
            })
            .collect()
    }

    /// Requests sharing a source value are only placed where that value can
    /// enter their group, or where it is itself assigned.
    fn insert_requests(&mut self, requests: Vec<AssignmentRequest>) {
        let mut groups: Vec<Vec<AssignmentRequest>> = Vec::new();
        for request in requests {
            match groups
                .iter_mut()
                .find(|group| group[0].current == request.current)
            {
                Some(group) => group.push(request),
                None => groups.push(vec![request]),
            }
        }

        for group in groups {
            if let [single] = group.as_slice() {
                self.insert_assignment(single);
                continue;
            }
            let members: BTreeSet<usize> = group.iter().map(|request| request.predecessor).collect();
            let starts = self.graph.find_start_nodes(&members);
            for request in &group {
                let assigns_source = request.current.as_local().is_some_and(|source| {
                    self.lists[request.predecessor]
                        .iter()
                        .any(|inst| inst.assigns_to(source))
                });
                if starts.contains(&request.predecessor) || assigns_source {
                    self.insert_assignment(request);
                }
            }
        }
    }

    fn insert_assignment(&mut self, request: &AssignmentRequest) {
        let predecessor = request.predecessor;
        let assignment = Inst::assign(request.target.clone(), request.current.clone());
        let body = self.body;
        let insn = (predecessor != ENTRY).then(|| &body.instructions[predecessor - 1]);
        match insn {
            // Nothing runs after a return or throw.
            Some(insn) if insn.is_terminating() => {
                trace!("skipping {assignment} after terminating node {predecessor}");
            }
            Some(insn) if insn.is_branching() => {
                self.insert_before_branch(predecessor, assignment, &request.target);
            }
            _ => self.emit(predecessor, assignment),
        }
    }

    /// Put `assignment` ahead of the node's branch. A branch that reads the
    /// target reads a copy taken before the assignment instead.
    fn insert_before_branch(&mut self, node: usize, assignment: Inst, target: &LocalVar) {
        let Some(index) = self.lists[node].iter().position(Inst::is_branching) else {
            self.emit(node, assignment);
            return;
        };
        let reads_target = match &self.lists[node][index] {
            Inst::If { condition, .. } => condition.reads(target),
            Inst::Switch { key, .. } => key.as_local() == Some(target),
            _ => false,
        };
        self.lists[node].insert(index, assignment);
        if reads_target {
            let copy = self.fresh_temp(target.ty.clone());
            let branch = self.lists[node][index + 1]
                .map_locals(&|local| (local == target).then(|| copy.clone()));
            self.lists[node][index + 1] = branch;
            self.lists[node].insert(0, Inst::assign(copy, Value::Local(target.clone())));
        }
    }

    /// Make fall-through into a join explicit: every predecessor without its
    /// own branch jumps to the join's label. Exception edges stay implicit.
    pub(super) fn insert_gotos(&mut self) -> BuildResult<()> {
        let body = self.body;
        for node in 1..self.graph.node_count() {
            if self.frames[node].is_none() || !self.graph.has_multiple_predecessors(node) {
                continue;
            }
            let predecessors: Vec<usize> = self
                .graph
                .predecessors(node)
                .iter()
                .copied()
                .filter(|predecessor| {
                    self.graph.edge_kind(*predecessor, node) != Some(EdgeKind::Exception)
                        && (*predecessor == ENTRY
                            || !body.instructions[*predecessor - 1].is_branching())
                })
                .collect();
            if predecessors.is_empty() {
                continue;
            }
            let label = match &body.instructions[node - 1] {
                Insn::Label(label) => self.label(*label)?,
                _ => {
                    let fresh = self.fresh_label();
                    self.lists[node].insert(0, Inst::Label(fresh.clone()));
                    fresh
                }
            };
            for predecessor in predecessors {
                self.emit(predecessor, Inst::Goto(label.clone()));
            }
        }
        Ok(())
    }
}
