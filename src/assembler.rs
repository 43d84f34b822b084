//! Fluent construction of method bodies with named labels.
//!
//! ```
//! use jvmir::assembler::MethodAssembler;
//! use jvmir::method::JumpOp;
//!
//! let mut asm = MethodAssembler::new_static("demo/Abs", "abs", "(I)I");
//! asm.load(0)
//!     .jump(JumpOp::IfGe, "positive")
//!     .load(0)
//!     .insn(jvmir::method::Insn::Neg)
//!     .return_value()
//!     .label("positive")
//!     .load(0)
//!     .return_value();
//! let body = asm.finish().unwrap();
//! assert_eq!(body.instructions.len(), 8);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};

use crate::method::{
    CallKind, ExceptionHandler, FieldOp, FrameHint, Insn, JumpOp, LabelId, LdcConstant, Literal,
    LocalVariable, MethodBody,
};

/// Builds a [`MethodBody`] instruction by instruction. Labels are referred to
/// by name and may be used before they are placed; problems surface in
/// [`MethodAssembler::finish`].
#[derive(Debug)]
pub struct MethodAssembler {
    body: MethodBody,
    labels: BTreeMap<String, LabelId>,
    placed: BTreeSet<LabelId>,
    duplicates: Vec<String>,
}

impl MethodAssembler {
    pub fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        Self::with_flags(owner, name, descriptor, false)
    }

    pub fn new_static(owner: &str, name: &str, descriptor: &str) -> Self {
        Self::with_flags(owner, name, descriptor, true)
    }

    fn with_flags(owner: &str, name: &str, descriptor: &str, is_static: bool) -> Self {
        Self {
            body: MethodBody {
                owner: owner.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                is_static,
                parameter_names: Vec::new(),
                instructions: Vec::new(),
                exception_handlers: Vec::new(),
                local_variables: Vec::new(),
            },
            labels: BTreeMap::new(),
            placed: BTreeSet::new(),
            duplicates: Vec::new(),
        }
    }

    fn label_id(&mut self, name: &str) -> LabelId {
        let next = LabelId(u32::try_from(self.labels.len()).unwrap_or(u32::MAX));
        *self.labels.entry(name.to_string()).or_insert(next)
    }

    pub fn parameter_names(&mut self, names: &[Option<&str>]) -> &mut Self {
        self.body.parameter_names = names.iter().map(|name| name.map(str::to_string)).collect();
        self
    }

    pub fn insn(&mut self, insn: Insn) -> &mut Self {
        self.body.instructions.push(insn);
        self
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        let id = self.label_id(name);
        if !self.placed.insert(id) {
            self.duplicates.push(name.to_string());
        }
        self.insn(Insn::Label(id))
    }

    pub fn line(&mut self, line: u32, start: &str) -> &mut Self {
        let start = self.label_id(start);
        self.insn(Insn::LineNumber { line, start })
    }

    pub fn frame(&mut self, hint: FrameHint) -> &mut Self {
        self.insn(Insn::Frame(hint))
    }

    /// Shortest integer push: `iconst_*`, else `bipush`/`sipush`.
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        if (-1..=5).contains(&value) {
            self.insn(Insn::Const(Literal::Int(value)))
        } else {
            self.insn(Insn::Push(value))
        }
    }

    pub fn ldc(&mut self, constant: LdcConstant) -> &mut Self {
        self.insn(Insn::Ldc(constant))
    }

    pub fn load(&mut self, slot: u16) -> &mut Self {
        self.insn(Insn::Load(slot))
    }

    pub fn store(&mut self, slot: u16) -> &mut Self {
        self.insn(Insn::Store(slot))
    }

    pub fn iinc(&mut self, slot: u16, increment: i32) -> &mut Self {
        self.insn(Insn::Iinc {
            index: slot,
            increment,
        })
    }

    pub fn field(&mut self, op: FieldOp, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.insn(Insn::Field {
            op,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    pub fn invoke(&mut self, kind: CallKind, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.insn(Insn::Invoke {
            kind,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            interface: kind == CallKind::Interface,
        })
    }

    pub fn jump(&mut self, op: JumpOp, target: &str) -> &mut Self {
        let target = self.label_id(target);
        self.insn(Insn::Jump { op, target })
    }

    pub fn goto(&mut self, target: &str) -> &mut Self {
        self.jump(JumpOp::Goto, target)
    }

    /// `tableswitch` over `min..min + targets.len()`.
    pub fn table_switch(&mut self, min: i32, default: &str, targets: &[&str]) -> &mut Self {
        let default = self.label_id(default);
        let targets: Vec<LabelId> = targets.iter().map(|target| self.label_id(target)).collect();
        let span = i32::try_from(targets.len()).unwrap_or(i32::MAX);
        let max = min.saturating_add(span - 1);
        self.insn(Insn::TableSwitch {
            min,
            max,
            default,
            targets,
        })
    }

    pub fn lookup_switch(&mut self, default: &str, cases: &[(i32, &str)]) -> &mut Self {
        let default = self.label_id(default);
        let (keys, targets) = cases
            .iter()
            .map(|(key, target)| (*key, self.label_id(target)))
            .unzip();
        self.insn(Insn::LookupSwitch {
            default,
            keys,
            targets,
        })
    }

    pub fn ret(&mut self) -> &mut Self {
        self.insn(Insn::Return)
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.insn(Insn::ReturnValue)
    }

    pub fn throw(&mut self) -> &mut Self {
        self.insn(Insn::Throw)
    }

    /// Protect `start..end` with a handler at `handler`; `None` catches all.
    pub fn try_catch(&mut self, start: &str, end: &str, handler: &str, catch_type: Option<&str>) -> &mut Self {
        let handler = ExceptionHandler {
            start: self.label_id(start),
            end: self.label_id(end),
            handler: self.label_id(handler),
            catch_type: catch_type.map(str::to_string),
        };
        self.body.exception_handlers.push(handler);
        self
    }

    pub fn local_variable(&mut self, name: &str, descriptor: &str, index: u16, start: &str, end: &str) -> &mut Self {
        let variable = LocalVariable {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            index,
            start: self.label_id(start),
            end: self.label_id(end),
        };
        self.body.local_variables.push(variable);
        self
    }

    /// The assembled body, or the first label misuse.
    pub fn finish(self) -> Result<MethodBody> {
        if let Some(name) = self.duplicates.first() {
            bail!("label `{name}` is placed more than once");
        }
        if let Some((name, _)) = self.labels.iter().find(|(_, id)| !self.placed.contains(id)) {
            bail!("label `{name}` is referenced but never placed");
        }
        Ok(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_numbered_by_first_mention() {
        let mut asm = MethodAssembler::new_static("demo/Jump", "skip", "()V");
        asm.goto("end").label("middle").ret().label("end").ret();
        let body = asm.finish().expect("assemble");
        assert_eq!(
            body.instructions[0],
            Insn::Jump {
                op: JumpOp::Goto,
                target: LabelId(0)
            }
        );
        assert_eq!(body.instructions[1], Insn::Label(LabelId(1)));
        assert_eq!(body.instructions[3], Insn::Label(LabelId(0)));
    }

    #[test]
    fn table_switch_covers_consecutive_keys() {
        let mut asm = MethodAssembler::new_static("demo/Switch", "pick", "(I)V");
        asm.load(0)
            .table_switch(3, "other", &["a", "b"])
            .label("a")
            .label("b")
            .label("other")
            .ret();
        let body = asm.finish().expect("assemble");
        let Insn::TableSwitch { min, max, targets, .. } = &body.instructions[1] else {
            panic!("expected tableswitch");
        };
        assert_eq!((*min, *max, targets.len()), (3, 4, 2));
    }

    #[test]
    fn misuse_is_reported_on_finish() {
        let mut dangling = MethodAssembler::new_static("demo/Bad", "run", "()V");
        dangling.goto("nowhere");
        let error = dangling.finish().expect_err("dangling label");
        assert!(error.to_string().contains("nowhere"));

        let mut twice = MethodAssembler::new_static("demo/Bad", "run", "()V");
        twice.label("here").label("here").ret();
        let error = twice.finish().expect_err("duplicate label");
        assert!(error.to_string().contains("more than once"));
    }

    #[test]
    fn interface_calls_are_flagged() {
        let mut asm = MethodAssembler::new_static("demo/Calls", "size", "(Ljava/util/List;)I");
        asm.load(0)
            .invoke(CallKind::Interface, "java/util/List", "size", "()I")
            .return_value();
        let body = asm.finish().expect("assemble");
        assert!(matches!(
            body.instructions[1],
            Insn::Invoke {
                interface: true,
                ..
            }
        ));
    }
}
