//! Type refinement from verifier frame hints.

use std::collections::BTreeMap;

use log::trace;

use crate::descriptor::parse_internal_name;
use crate::error::BuildResult;
use crate::frame::Frame;
use crate::ir::{Inst, InstList, LocalVar, Value};
use crate::method::{FrameHint, LabelId, VerifierType};
use crate::types::{Primitive, TypeName};

/// Slot-indexed view of a complete frame hint.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct HintTypes {
    pub(crate) locals: Vec<Option<TypeName>>,
    pub(crate) stack: Vec<TypeName>,
}

impl HintTypes {
    /// Expand a hint. Compressed frame kinds yield `None`. `allocated` resolves
    /// the type created by the `new` following a label.
    pub(crate) fn parse(
        hint: &FrameHint,
        allocated: impl Fn(LabelId) -> BuildResult<Option<TypeName>>,
    ) -> BuildResult<Option<HintTypes>> {
        if !hint.kind.is_complete() {
            return Ok(None);
        }
        let mut locals = Vec::new();
        for verifier in &hint.locals {
            locals.push(Some(verifier_type(verifier, &allocated)?));
            if verifier.is_dword() {
                locals.push(None);
            }
        }
        if matches!(locals.last(), Some(None)) {
            locals.pop();
        }
        let stack = hint
            .stack
            .iter()
            .map(|verifier| verifier_type(verifier, &allocated))
            .collect::<BuildResult<Vec<_>>>()?;
        Ok(Some(HintTypes { locals, stack }))
    }
}

fn verifier_type(
    verifier: &VerifierType,
    allocated: &impl Fn(LabelId) -> BuildResult<Option<TypeName>>,
) -> BuildResult<TypeName> {
    Ok(match verifier {
        VerifierType::Top => TypeName::Top,
        VerifierType::Integer => TypeName::INT,
        VerifierType::Float => TypeName::FLOAT,
        VerifierType::Long => TypeName::LONG,
        VerifierType::Double => TypeName::DOUBLE,
        VerifierType::Null => TypeName::Null,
        VerifierType::UninitializedThis => TypeName::UninitThis,
        VerifierType::Object(name) => parse_internal_name(name)?,
        VerifierType::Uninitialized(label) => allocated(*label)?.unwrap_or(TypeName::Top),
    })
}

/// Old variable to re-typed copy, accumulated over the whole method.
#[derive(Clone, Debug, Default)]
pub(crate) struct Refinements {
    replacements: BTreeMap<LocalVar, LocalVar>,
}

impl Refinements {
    pub(crate) fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.replacements.len()
    }

    /// Narrow the predecessor frame of a hint. Locals the hint leaves out or
    /// marks `TOP` are dropped, and so are stack entries past the hinted depth.
    pub(crate) fn refine_frame(&mut self, frame: &Frame, hint: &HintTypes) -> Frame {
        let locals = hint
            .locals
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                let ty = ty.as_ref().filter(|ty| **ty != TypeName::Top)?;
                let slot = u16::try_from(index).ok()?;
                let value = frame.local(slot)?;
                Some(self.refine_value(value, ty))
            })
            .collect();
        let stack = frame
            .stack()
            .iter()
            .zip(&hint.stack)
            .map(|(value, ty)| self.refine_value(value, ty))
            .collect();
        Frame::new(locals, stack)
    }

    fn refine_value(&mut self, value: &Value, hinted: &TypeName) -> Value {
        let Value::Local(local) = value else {
            return value.clone();
        };
        if !narrows(&local.ty, hinted) {
            return value.clone();
        }
        let refined = local.with_type(hinted.clone());
        trace!("refining {} from {} to {}", local.name, local.ty, hinted);
        self.replacements.insert(local.clone(), refined.clone());
        Value::Local(refined)
    }

    /// Final replacement of a variable, following chains of refinements.
    pub(crate) fn resolve(&self, local: &LocalVar) -> Option<LocalVar> {
        let mut current = self.replacements.get(local)?;
        let mut steps = 0;
        while let Some(next) = self.replacements.get(current) {
            steps += 1;
            if next == local || steps > self.replacements.len() {
                break;
            }
            current = next;
        }
        Some(current.clone())
    }

    /// Substitute every refined variable throughout the list.
    pub(crate) fn apply(&self, list: InstList) -> InstList {
        if self.is_empty() {
            return list;
        }
        let resolved: BTreeMap<LocalVar, LocalVar> = self
            .replacements
            .keys()
            .filter_map(|local| Some((local.clone(), self.resolve(local)?)))
            .collect();
        let instructions: Vec<Inst> = list
            .iter()
            .map(|inst| inst.map_locals(&|local| resolved.get(local).cloned()))
            .collect();
        InstList::new(instructions)
    }
}

/// Whether a hinted type may replace a variable's type. Sentinels never do,
/// and the verifier's coarser views (`int` for sub-int primitives, `Object`
/// for any reference) are not taken as narrowing.
fn narrows(current: &TypeName, hinted: &TypeName) -> bool {
    if hinted == current || hinted.is_sentinel() {
        return false;
    }
    if *hinted == TypeName::INT
        && matches!(
            current.primitive(),
            Some(Primitive::Boolean | Primitive::Byte | Primitive::Char | Primitive::Short)
        )
    {
        return false;
    }
    !(*hinted == TypeName::object() && current.is_reference())
}
