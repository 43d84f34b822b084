//! Reconciliation of predecessor frames at join points.

use crate::error::{BuildError, BuildResult};
use crate::frame::Frame;
use crate::ir::{LocalVar, Value};
use crate::types::{TypeName, lub};

/// Whether every predecessor frame was known when the join was processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MergeState {
    Resolved,
    /// Some predecessor sits behind a back edge; its values are only known
    /// once the whole method has been interpreted.
    Pending,
}

/// Variables synthesized for one join node, by the slot they stand for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PendingMerge {
    pub(crate) node: usize,
    pub(crate) state: MergeState,
    pub(crate) locals: Vec<(u16, LocalVar)>,
    pub(crate) stack: Vec<(usize, LocalVar)>,
}

/// Frame plus the merge record, if any slot needed a new variable.
pub(crate) struct Merged {
    pub(crate) frame: Frame,
    pub(crate) record: Option<PendingMerge>,
}

/// Merge the frames flowing into `node`; `None` entries are predecessors that
/// have not been interpreted yet.
///
/// A local survives only if every known frame holds it, and takes its
/// debug-table type when `declared` knows one. The stack is cut to the
/// shallowest known depth; `keep_stack == false` drops it entirely.
pub(crate) fn merge_frames(
    node: usize,
    frames: &[Option<Frame>],
    keep_stack: bool,
    declared: impl Fn(u16) -> Option<TypeName>,
    mut fresh: impl FnMut(TypeName) -> LocalVar,
) -> BuildResult<Merged> {
    let known: Vec<&Frame> = frames.iter().flatten().collect();
    let local_count = known
        .iter()
        .map(|frame| frame.locals().len())
        .min()
        .ok_or(BuildError::EmptyMerge { node })?;
    let stack_depth = if keep_stack {
        known.iter().map(|frame| frame.stack().len()).min().unwrap_or(0)
    } else {
        0
    };
    let resolved = known.len() == frames.len();
    let state = if resolved {
        MergeState::Resolved
    } else {
        MergeState::Pending
    };

    let mut record = PendingMerge {
        node,
        state,
        locals: Vec::new(),
        stack: Vec::new(),
    };

    let mut stack = Vec::with_capacity(stack_depth);
    for index in 0..stack_depth {
        let ty = stack_type(&known, index).ok_or(BuildError::IncompatibleStackTypes {
            node,
            slot: index,
        })?;
        if resolved {
            if let Some(value) = same_value(known.iter().map(|frame| &frame.stack()[index])) {
                stack.push(value);
                continue;
            }
        }
        let variable = fresh(ty);
        record.stack.push((index, variable.clone()));
        stack.push(Value::Local(variable));
    }

    let mut locals = Vec::with_capacity(local_count);
    for index in 0..local_count {
        let Ok(slot) = u16::try_from(index) else {
            break;
        };
        let Some(ty) = local_type(&known, slot) else {
            locals.push(None);
            continue;
        };
        if ty == TypeName::Top {
            locals.push(None);
            continue;
        }
        if resolved {
            let values = known.iter().filter_map(|frame| frame.local(slot));
            if let Some(value) = same_value(values) {
                locals.push(Some(value));
                continue;
            }
        }
        let ty = declared(slot).unwrap_or(ty);
        let variable = fresh(ty);
        record.locals.push((slot, variable.clone()));
        locals.push(Some(Value::Local(variable)));
    }

    let record = (!record.locals.is_empty() || !record.stack.is_empty()).then_some(record);
    Ok(Merged {
        frame: Frame::new(locals, stack),
        record,
    })
}

/// Least upper bound of a local across frames; `None` when some frame lacks it.
fn local_type(frames: &[&Frame], slot: u16) -> Option<TypeName> {
    let mut merged: Option<TypeName> = None;
    for frame in frames {
        let ty = frame.local(slot)?.ty();
        merged = Some(match merged {
            Some(current) => lub(&current, &ty),
            None => ty,
        });
    }
    merged
}

/// Least upper bound of a stack slot; `None` when the types are irreconcilable.
fn stack_type(frames: &[&Frame], index: usize) -> Option<TypeName> {
    let merged = frames
        .iter()
        .map(|frame| frame.stack()[index].ty())
        .reduce(|current, ty| lub(&current, &ty))?;
    (merged != TypeName::Top).then_some(merged)
}

fn same_value<'a>(mut values: impl Iterator<Item = &'a Value>) -> Option<Value> {
    let first = values.next()?;
    values.all(|value| value == first).then(|| first.clone())
}
