//! Post-processing of a built instruction list.

use crate::ir::{Inst, InstList, IrLabel};

/// Normalization run over every built list before it is returned.
pub trait Canonicalizer: Sync {
    fn canonicalize(&self, list: InstList) -> InstList;
}

/// Returns lists unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Canonicalizer for Identity {
    fn canonicalize(&self, list: InstList) -> InstList {
        list
    }
}

impl<F> Canonicalizer for F
where
    F: Fn(InstList) -> InstList + Sync,
{
    fn canonicalize(&self, list: InstList) -> InstList {
        self(list)
    }
}

/// Make sure code before the first line-number marker is attributed to that
/// line, by repeating the marker under a fresh label at the very start.
pub(crate) fn ensure_leading_line_number(
    instructions: &mut Vec<Inst>,
    fresh_label: impl FnOnce() -> IrLabel,
) {
    let Some(first) = instructions
        .iter()
        .position(|inst| matches!(inst, Inst::LineNumber { .. }))
    else {
        return;
    };
    if first == 0 || (first == 1 && matches!(instructions[0], Inst::Label(_))) {
        return;
    }
    let Inst::LineNumber { line, .. } = &instructions[first] else {
        return;
    };
    let line = *line;
    let label = fresh_label();
    instructions.splice(
        0..0,
        [
            Inst::Label(label.clone()),
            Inst::LineNumber { line, start: label },
        ],
    );
}
