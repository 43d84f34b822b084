//! Translation of one method body into a register-based instruction list.

mod insert;
mod interpret;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::{debug, trace};

use crate::BuildOptions;
use crate::cfg::{ENTRY, InstructionGraph};
use crate::descriptor::{MethodType, parse_field_descriptor, parse_internal_name, parse_method_descriptor};
use crate::error::{BuildError, BuildResult};
use crate::finalize::{Canonicalizer, Identity, ensure_leading_line_number};
use crate::frame::Frame;
use crate::ir::{Argument, CatchEntry, Inst, InstList, IrLabel, LocalVar, Value};
use crate::merge::{PendingMerge, merge_frames};
use crate::method::{ExceptionHandler, FrameHint, Insn, LabelId, LocalVariable, MethodBody};
use crate::order::TraversalOrder;
use crate::refine::{HintTypes, Refinements};
use crate::types::TypeName;

/// Builds the IR of a single method body. Consumed by [`RawInstListBuilder::build`].
pub struct RawInstListBuilder<'a> {
    body: &'a MethodBody,
    options: BuildOptions,
}

impl<'a> RawInstListBuilder<'a> {
    pub fn new(body: &'a MethodBody, options: BuildOptions) -> Self {
        Self { body, options }
    }

    pub fn build(self) -> Result<InstList> {
        self.build_with(&Identity)
    }

    /// Build, then hand the list to `canonicalizer`.
    pub fn build_with(self, canonicalizer: &dyn Canonicalizer) -> Result<InstList> {
        let name = self.body.qualified_name();
        debug!(
            "building IR for {name} from {} instructions",
            self.body.instructions.len()
        );
        let list = BuildState::new(self.body, self.options)
            .and_then(BuildState::run)
            .with_context(|| format!("failed to build IR for {name}"))?;
        let list = canonicalizer.canonicalize(list);
        debug!("built {} IR instructions for {name}", list.len());
        Ok(list)
    }
}

/// Mutable state of one build. Nodes index every per-instruction vector.
struct BuildState<'a> {
    body: &'a MethodBody,
    options: BuildOptions,
    graph: InstructionGraph,
    method_type: MethodType,
    this_type: TypeName,
    frames: Vec<Option<Frame>>,
    lists: Vec<Vec<Inst>>,
    labels: BTreeMap<LabelId, IrLabel>,
    /// Handler node to the ranges it catches for.
    handlers: BTreeMap<usize, Vec<&'a ExceptionHandler>>,
    merges: Vec<PendingMerge>,
    refinements: Refinements,
    argument_slots: u16,
    temps: u32,
    next_label: u32,
}

impl<'a> BuildState<'a> {
    fn new(body: &'a MethodBody, options: BuildOptions) -> BuildResult<Self> {
        let graph = InstructionGraph::build(body)?;
        let method_type = parse_method_descriptor(&body.descriptor)?;
        let node_count = graph.node_count();
        let mut state = BuildState {
            body,
            options,
            graph,
            method_type,
            this_type: TypeName::class(&body.owner),
            frames: vec![None; node_count],
            lists: vec![Vec::new(); node_count],
            labels: BTreeMap::new(),
            handlers: BTreeMap::new(),
            merges: Vec::new(),
            refinements: Refinements::default(),
            argument_slots: 0,
            temps: 0,
            next_label: 0,
        };

        for (index, insn) in body.instructions.iter().enumerate() {
            if let Insn::Label(label) = insn {
                let ir_label = state.fresh_label();
                if state.graph.is_live(index + 1) {
                    state.labels.insert(*label, ir_label);
                }
            }
        }
        for handler in &body.exception_handlers {
            let node = state.graph.node_of(handler.handler)?;
            let ranges = state.handlers.entry(node).or_default();
            if handler.start != handler.handler {
                ranges.push(handler);
            }
        }
        Ok(state)
    }

    fn run(mut self) -> BuildResult<InstList> {
        let order = TraversalOrder::compute(&self.graph)?;
        debug!(
            "{}: {} reachable nodes, {} back edges",
            self.body.qualified_name(),
            order.nodes.len(),
            order.back_edges.len()
        );
        for node in &order.nodes {
            self.visit(*node)?;
        }

        self.insert_merge_assignments();
        self.insert_gotos()?;

        let mut instructions: Vec<Inst> = std::mem::take(&mut self.lists)
            .into_iter()
            .flatten()
            .collect();
        ensure_leading_line_number(&mut instructions, || self.fresh_label());
        if !self.refinements.is_empty() {
            trace!("applying {} type refinements", self.refinements.len());
        }
        Ok(self.refinements.apply(InstList::new(instructions)))
    }

    fn visit(&mut self, node: usize) -> BuildResult<()> {
        if self.frames[node].is_some() {
            return Err(BuildError::RevisitedInstruction { node });
        }
        let frame = if node == ENTRY {
            self.entry_frame()
        } else {
            let body = self.body;
            match &body.instructions[node - 1] {
                Insn::Label(label) => self.visit_label(node, *label)?,
                Insn::Frame(hint) => self.visit_frame_hint(node, hint)?,
                insn => {
                    let mut frame = self.predecessor_frame(node)?;
                    self.interpret(node, insn, &mut frame)?;
                    frame
                }
            }
        };
        self.frames[node] = Some(frame);
        Ok(())
    }

    /// `this` in slot 0 for instance methods, then the parameters; `long` and
    /// `double` parameters take two slots.
    fn entry_frame(&mut self) -> Frame {
        let mut frame = Frame::default();
        let mut slot: u16 = 0;
        if !self.body.is_static {
            frame.put_local(0, Value::This(self.this_type.clone()));
            slot = 1;
        }
        for (position, ty) in self.method_type.parameters.iter().enumerate() {
            let argument = Argument {
                index: u16::try_from(position).unwrap_or(u16::MAX),
                name: self.argument_name(position, slot),
                ty: ty.clone(),
            };
            frame.put_local(slot, Value::Argument(argument));
            slot = slot.saturating_add(if ty.is_dword() { 2 } else { 1 });
        }
        self.argument_slots = slot;
        frame
    }

    fn argument_name(&self, position: usize, slot: u16) -> String {
        self.body
            .local_variables
            .iter()
            .find(|variable| variable.index == slot)
            .map(|variable| variable.name.clone())
            .or_else(|| self.body.parameter_names.get(position).cloned().flatten())
            .unwrap_or_else(|| format!("arg${position}"))
    }

    fn predecessor_frame(&self, node: usize) -> BuildResult<Frame> {
        let predecessor = self.graph.single_predecessor(node)?;
        self.frames[predecessor]
            .clone()
            .ok_or(BuildError::MissingFrame { node, predecessor })
    }

    fn visit_label(&mut self, node: usize, label: LabelId) -> BuildResult<Frame> {
        let ir_label = self.label(label)?;
        self.emit(node, Inst::Label(ir_label.clone()));

        let ranges = self.handlers.get(&node).cloned().unwrap_or_default();
        let throwable = if ranges.is_empty() {
            None
        } else {
            let throwable = self.fresh_temp(common_catch_type(&ranges)?);
            let entries = ranges
                .iter()
                .map(|range| self.catch_entry(range))
                .collect::<BuildResult<Vec<_>>>()?;
            self.emit(
                node,
                Inst::Catch {
                    throwable: throwable.clone(),
                    handler: ir_label,
                    entries,
                },
            );
            Some(throwable)
        };

        let frames: Vec<Option<Frame>> = self
            .graph
            .predecessors(node)
            .iter()
            .map(|predecessor| self.frames[*predecessor].clone())
            .collect();
        let mut frame = match frames.as_slice() {
            [Some(single)] => single.clone(),
            _ => self.merge(node, &frames, throwable.is_none())?,
        };
        if let Some(throwable) = throwable {
            frame.clear_stack();
            frame.push(Value::Local(throwable));
        }
        Ok(frame)
    }

    fn merge(&mut self, node: usize, frames: &[Option<Frame>], keep_stack: bool) -> BuildResult<Frame> {
        let local_count = frames
            .iter()
            .flatten()
            .map(|frame| frame.locals().len())
            .min()
            .unwrap_or(0);
        let declared: Vec<Option<TypeName>> = (0..local_count)
            .map(|index| {
                let slot = u16::try_from(index).ok()?;
                let variable = self.covering_variable(slot, node)?;
                parse_field_descriptor(&variable.descriptor).ok()
            })
            .collect();

        let temps = &mut self.temps;
        let merged = merge_frames(
            node,
            frames,
            keep_stack,
            |slot| declared.get(usize::from(slot)).cloned().flatten(),
            |ty| next_temp(temps, ty),
        )?;
        if let Some(record) = merged.record {
            trace!(
                "{:?} merge at node {node}: {} locals, {} stack slots",
                record.state,
                record.locals.len(),
                record.stack.len()
            );
            self.merges.push(record);
        }
        Ok(merged.frame)
    }

    fn catch_entry(&mut self, range: &ExceptionHandler) -> BuildResult<CatchEntry> {
        let catch_type = match &range.catch_type {
            Some(name) => parse_internal_name(name)?,
            None => TypeName::throwable(),
        };
        Ok(CatchEntry {
            catch_type,
            start: self.label_or_fresh(range.start)?,
            end: self.label_or_fresh(range.end)?,
        })
    }

    /// IR label of a stream label; unreachable labels get a fresh marker in
    /// place so catch entries can still name them.
    fn label_or_fresh(&mut self, label: LabelId) -> BuildResult<IrLabel> {
        if let Some(existing) = self.labels.get(&label) {
            return Ok(existing.clone());
        }
        let node = self.graph.node_of(label)?;
        let fresh = self.fresh_label();
        self.emit(node, Inst::Label(fresh.clone()));
        self.labels.insert(label, fresh.clone());
        Ok(fresh)
    }

    fn visit_frame_hint(&mut self, node: usize, hint: &FrameHint) -> BuildResult<Frame> {
        let frame = self.predecessor_frame(node)?;
        let Some(types) = HintTypes::parse(hint, |label| self.allocated_after(label))? else {
            return Ok(frame);
        };
        Ok(self.refinements.refine_frame(&frame, &types))
    }

    /// Type created by the first `new` after `label`.
    fn allocated_after(&self, label: LabelId) -> BuildResult<Option<TypeName>> {
        let node = self.graph.node_of(label)?;
        self.body.instructions[node..]
            .iter()
            .find_map(|insn| match insn {
                Insn::New(name) => Some(parse_internal_name(name)),
                _ => None,
            })
            .transpose()
    }

    /// Register for a store into `slot` at `node`, named and typed from the
    /// debug-table entry that starts at the next label.
    fn declared_register(&mut self, ty: TypeName, slot: u16, node: usize) -> LocalVar {
        let body = self.body;
        let next_label = body.instructions[node - 1..].iter().find_map(|insn| match insn {
            Insn::Label(label) => Some(*label),
            _ => None,
        });
        let mut entries = body
            .local_variables
            .iter()
            .filter(|variable| variable.index == slot && Some(variable.start) == next_label);
        let entry = match (entries.next(), entries.next()) {
            (Some(entry), None) => Some(entry),
            _ => None,
        };

        let mut register = self.fresh_temp(ty.clone());
        if let Some(entry) = entry {
            if self.options.keep_local_variable_names {
                register.name = entry.name.clone();
            }
            if let Ok(declared) = parse_field_descriptor(&entry.descriptor) {
                if declared.is_reference() && !ty.is_array() {
                    register.ty = declared;
                }
            }
        }
        register
    }

    /// Debug-table entry for `slot` whose range covers `node`.
    fn covering_variable(&self, slot: u16, node: usize) -> Option<&'a LocalVariable> {
        let body = self.body;
        body.local_variables.iter().find(|variable| {
            if variable.index != slot {
                return false;
            }
            match (self.graph.node_of(variable.start), self.graph.node_of(variable.end)) {
                (Ok(start), Ok(end)) => (start..=end).contains(&node),
                _ => false,
            }
        })
    }

    /// Whether `slot` still holds the parameter it was declared for.
    fn is_parameter_slot(&self, slot: u16, node: usize) -> bool {
        if slot >= self.argument_slots {
            return false;
        }
        let first_label = self.body.instructions.iter().find_map(|insn| match insn {
            Insn::Label(label) => Some(*label),
            _ => None,
        });
        self.covering_variable(slot, node)
            .is_some_and(|variable| Some(variable.start) == first_label)
    }

    fn label(&self, label: LabelId) -> BuildResult<IrLabel> {
        self.labels
            .get(&label)
            .cloned()
            .ok_or(BuildError::UnknownLabel(label))
    }

    fn emit(&mut self, node: usize, inst: Inst) {
        self.lists[node].push(inst);
    }

    fn fresh_temp(&mut self, ty: TypeName) -> LocalVar {
        next_temp(&mut self.temps, ty)
    }

    fn fresh_label(&mut self) -> IrLabel {
        let label = IrLabel::numbered(self.next_label);
        self.next_label += 1;
        label
    }
}

fn next_temp(counter: &mut u32, ty: TypeName) -> LocalVar {
    let index = *counter;
    *counter += 1;
    LocalVar {
        index,
        name: format!("%{index}"),
        ty,
    }
}

/// The one type every range catches, else `java.lang.Throwable`.
fn common_catch_type(ranges: &[&ExceptionHandler]) -> BuildResult<TypeName> {
    let first = ranges.first().map(|range| &range.catch_type);
    match first {
        Some(Some(name)) if ranges.iter().all(|range| range.catch_type.as_ref() == Some(name)) => {
            parse_internal_name(name)
        }
        _ => Ok(TypeName::throwable()),
    }
}
