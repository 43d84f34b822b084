//! Register-based intermediate representation produced by the builder.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use serde::Serialize;

use crate::method::{BinaryOp, CallKind, CompareOp, HandleKind};
use crate::types::{CLASS_CLASS, METHOD_HANDLE_CLASS, METHOD_TYPE_CLASS, TypeName};

/// A register: either a compiler temporary (`%N`) or a local that kept its
/// debug-table name. Identity is the whole triple, so a re-typed copy is a
/// different variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LocalVar {
    pub index: u32,
    pub name: String,
    pub ty: TypeName,
}

impl LocalVar {
    pub fn with_type(&self, ty: TypeName) -> LocalVar {
        LocalVar {
            index: self.index,
            name: self.name.clone(),
            ty,
        }
    }
}

/// A method parameter as it arrives in its local slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Argument {
    pub index: u16,
    pub name: String,
    pub ty: TypeName,
}

/// Literal operands. Floating point literals compare by bit pattern so that
/// value equality is reflexive.
#[derive(Clone, Debug, Serialize)]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(TypeName),
    MethodType {
        parameters: Vec<TypeName>,
        return_type: TypeName,
    },
    MethodHandle(MethodHandleRef),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Null, Constant::Null) => true,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Long(a), Constant::Long(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            (Constant::Class(a), Constant::Class(b)) => a == b,
            (
                Constant::MethodType {
                    parameters: pa,
                    return_type: ra,
                },
                Constant::MethodType {
                    parameters: pb,
                    return_type: rb,
                },
            ) => pa == pb && ra == rb,
            (Constant::MethodHandle(a), Constant::MethodHandle(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Constant {
    pub fn ty(&self) -> TypeName {
        match self {
            Constant::Null => TypeName::Null,
            Constant::Int(_) => TypeName::INT,
            Constant::Long(_) => TypeName::LONG,
            Constant::Float(_) => TypeName::FLOAT,
            Constant::Double(_) => TypeName::DOUBLE,
            Constant::String(_) => TypeName::string(),
            Constant::Class(_) => TypeName::class(CLASS_CLASS),
            Constant::MethodType { .. } => TypeName::class(METHOD_TYPE_CLASS),
            Constant::MethodHandle(_) => TypeName::class(METHOD_HANDLE_CLASS),
        }
    }

    /// The zero a unary conditional jump compares against.
    pub fn zero_of(ty: &TypeName) -> Constant {
        match ty {
            TypeName::Primitive(crate::types::Primitive::Long) => Constant::Long(0),
            TypeName::Primitive(crate::types::Primitive::Float) => Constant::Float(0.0),
            TypeName::Primitive(crate::types::Primitive::Double) => Constant::Double(0.0),
            _ => Constant::Int(0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MethodHandleRef {
    pub kind: HandleKind,
    pub owner: TypeName,
    pub name: String,
    pub parameter_types: Vec<TypeName>,
    pub return_type: TypeName,
    pub interface: bool,
}

/// Symbolic values: what frames hold and what instructions read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Value {
    Local(LocalVar),
    Argument(Argument),
    This(TypeName),
    Const(Constant),
}

impl Value {
    pub fn ty(&self) -> TypeName {
        match self {
            Value::Local(local) => local.ty.clone(),
            Value::Argument(argument) => argument.ty.clone(),
            Value::This(ty) => ty.clone(),
            Value::Const(constant) => constant.ty(),
        }
    }

    pub fn as_local(&self) -> Option<&LocalVar> {
        match self {
            Value::Local(local) => Some(local),
            _ => None,
        }
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Value::Const(Constant::Null))
    }

    fn map_locals(&self, f: &impl Fn(&LocalVar) -> Option<LocalVar>) -> Value {
        match self {
            Value::Local(local) => f(local).map_or_else(|| self.clone(), Value::Local),
            _ => self.clone(),
        }
    }
}

impl From<LocalVar> for Value {
    fn from(local: LocalVar) -> Self {
        Value::Local(local)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArrayAccess {
    pub array: Value,
    pub index: Value,
    pub ty: TypeName,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldRef {
    /// `None` for static fields.
    pub instance: Option<Value>,
    pub owner: TypeName,
    pub name: String,
    pub ty: TypeName,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MethodCall {
    pub kind: CallKind,
    pub owner: TypeName,
    pub name: String,
    pub parameter_types: Vec<TypeName>,
    pub return_type: TypeName,
    /// Receiver; `None` for static calls.
    pub instance: Option<Value>,
    pub args: Vec<Value>,
    pub interface: bool,
}

/// Static bootstrap argument of a dynamic call site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum BootstrapValue {
    Const(Constant),
    Type(TypeName),
    MethodType {
        parameters: Vec<TypeName>,
        return_type: TypeName,
    },
    Handle(MethodHandleRef),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DynamicCall {
    pub bootstrap: MethodHandleRef,
    pub bootstrap_args: Vec<BootstrapValue>,
    pub name: String,
    pub parameter_types: Vec<TypeName>,
    pub return_type: TypeName,
    pub args: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Call {
    Method(MethodCall),
    Dynamic(DynamicCall),
}

impl Call {
    pub fn return_type(&self) -> &TypeName {
        match self {
            Call::Method(call) => &call.return_type,
            Call::Dynamic(call) => &call.return_type,
        }
    }

    fn map_locals(&self, f: &impl Fn(&LocalVar) -> Option<LocalVar>) -> Call {
        match self {
            Call::Method(call) => Call::Method(MethodCall {
                instance: call.instance.as_ref().map(|value| value.map_locals(f)),
                args: call.args.iter().map(|value| value.map_locals(f)).collect(),
                ..call.clone()
            }),
            Call::Dynamic(call) => Call::Dynamic(DynamicCall {
                args: call.args.iter().map(|value| value.map_locals(f)).collect(),
                ..call.clone()
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConditionOp {
    Eq,
    Neq,
    Lt,
    Ge,
    Gt,
    Le,
}

impl ConditionOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ConditionOp::Eq => "==",
            ConditionOp::Neq => "!=",
            ConditionOp::Lt => "<",
            ConditionOp::Ge => ">=",
            ConditionOp::Gt => ">",
            ConditionOp::Le => "<=",
        }
    }
}

/// Boolean test of a conditional branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub op: ConditionOp,
    pub lhs: Value,
    pub rhs: Value,
}

impl Condition {
    pub fn reads(&self, local: &LocalVar) -> bool {
        [&self.lhs, &self.rhs]
            .into_iter()
            .any(|value| value.as_local() == Some(local))
    }

    pub fn map_locals(&self, f: &impl Fn(&LocalVar) -> Option<LocalVar>) -> Condition {
        Condition {
            op: self.op,
            lhs: self.lhs.map_locals(f),
            rhs: self.rhs.map_locals(f),
        }
    }
}

/// Right-hand sides of assignments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Expr {
    Value(Value),
    Binary {
        op: BinaryOp,
        ty: TypeName,
        lhs: Value,
        rhs: Value,
    },
    Neg {
        ty: TypeName,
        operand: Value,
    },
    Length(Value),
    Cast {
        ty: TypeName,
        operand: Value,
    },
    InstanceOf {
        operand: Value,
        target: TypeName,
    },
    /// Three-way comparison yielding `-1`, `0` or `1`.
    Compare {
        op: CompareOp,
        lhs: Value,
        rhs: Value,
    },
    New(TypeName),
    NewArray {
        ty: TypeName,
        dimensions: Vec<Value>,
    },
    ArrayElement(ArrayAccess),
    Field(FieldRef),
    Call(Call),
}

impl Expr {
    pub fn ty(&self) -> TypeName {
        match self {
            Expr::Value(value) => value.ty(),
            Expr::Binary { ty, .. }
            | Expr::Neg { ty, .. }
            | Expr::Cast { ty, .. }
            | Expr::NewArray { ty, .. } => ty.clone(),
            Expr::Length(_) | Expr::Compare { .. } => TypeName::INT,
            Expr::InstanceOf { .. } => TypeName::BOOLEAN,
            Expr::New(ty) => ty.clone(),
            Expr::ArrayElement(access) => access.ty.clone(),
            Expr::Field(field) => field.ty.clone(),
            Expr::Call(call) => call.return_type().clone(),
        }
    }

    fn map_locals(&self, f: &impl Fn(&LocalVar) -> Option<LocalVar>) -> Expr {
        let map = |value: &Value| value.map_locals(f);
        match self {
            Expr::Value(value) => Expr::Value(map(value)),
            Expr::Binary { op, ty, lhs, rhs } => Expr::Binary {
                op: *op,
                ty: ty.clone(),
                lhs: map(lhs),
                rhs: map(rhs),
            },
            Expr::Neg { ty, operand } => Expr::Neg {
                ty: ty.clone(),
                operand: map(operand),
            },
            Expr::Length(operand) => Expr::Length(map(operand)),
            Expr::Cast { ty, operand } => Expr::Cast {
                ty: ty.clone(),
                operand: map(operand),
            },
            Expr::InstanceOf { operand, target } => Expr::InstanceOf {
                operand: map(operand),
                target: target.clone(),
            },
            Expr::Compare { op, lhs, rhs } => Expr::Compare {
                op: *op,
                lhs: map(lhs),
                rhs: map(rhs),
            },
            Expr::New(ty) => Expr::New(ty.clone()),
            Expr::NewArray { ty, dimensions } => Expr::NewArray {
                ty: ty.clone(),
                dimensions: dimensions.iter().map(map).collect(),
            },
            Expr::ArrayElement(access) => Expr::ArrayElement(access.map_locals(f)),
            Expr::Field(field) => Expr::Field(field.map_locals(f)),
            Expr::Call(call) => Expr::Call(call.map_locals(f)),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Value(value)
    }
}

impl ArrayAccess {
    fn map_locals(&self, f: &impl Fn(&LocalVar) -> Option<LocalVar>) -> ArrayAccess {
        ArrayAccess {
            array: self.array.map_locals(f),
            index: self.index.map_locals(f),
            ty: self.ty.clone(),
        }
    }
}

impl FieldRef {
    fn map_locals(&self, f: &impl Fn(&LocalVar) -> Option<LocalVar>) -> FieldRef {
        FieldRef {
            instance: self.instance.as_ref().map(|value| value.map_locals(f)),
            ..self.clone()
        }
    }
}

/// Assignable locations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Place {
    Local(LocalVar),
    ArrayElement(ArrayAccess),
    Field(FieldRef),
}

impl Place {
    fn map_locals(&self, f: &impl Fn(&LocalVar) -> Option<LocalVar>) -> Place {
        match self {
            Place::Local(local) => Place::Local(f(local).unwrap_or_else(|| local.clone())),
            Place::ArrayElement(access) => Place::ArrayElement(access.map_locals(f)),
            Place::Field(field) => Place::Field(field.map_locals(f)),
        }
    }
}

/// IR label, rendered as `#N`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize)]
pub struct IrLabel(pub String);

impl IrLabel {
    pub fn numbered(index: u32) -> IrLabel {
        IrLabel(format!("#{index}"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatchEntry {
    pub catch_type: TypeName,
    pub start: IrLabel,
    pub end: IrLabel,
}

/// One instruction of the built list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Inst {
    Assign {
        lhs: Place,
        rhs: Expr,
    },
    Goto(IrLabel),
    If {
        condition: Condition,
        true_branch: IrLabel,
        false_branch: IrLabel,
    },
    Switch {
        key: Value,
        branches: BTreeMap<i32, IrLabel>,
        default: IrLabel,
    },
    Call(Call),
    Return(Option<Value>),
    Throw(Value),
    EnterMonitor(Value),
    ExitMonitor(Value),
    /// Binds the caught exception at the start of a handler.
    Catch {
        throwable: LocalVar,
        handler: IrLabel,
        entries: Vec<CatchEntry>,
    },
    Label(IrLabel),
    LineNumber {
        line: u32,
        start: IrLabel,
    },
}

impl Inst {
    pub fn assign(local: LocalVar, rhs: impl Into<Expr>) -> Inst {
        Inst::Assign {
            lhs: Place::Local(local),
            rhs: rhs.into(),
        }
    }

    /// Explicit transfers: `goto`, `if` and `switch`.
    pub fn is_branching(&self) -> bool {
        matches!(self, Inst::Goto(_) | Inst::If { .. } | Inst::Switch { .. })
    }

    pub fn assigns_to(&self, local: &LocalVar) -> bool {
        matches!(self, Inst::Assign { lhs: Place::Local(target), .. } if target == local)
    }

    /// Copy of the instruction with every register occurrence passed through `f`;
    /// `None` keeps the register as is.
    pub fn map_locals(&self, f: &impl Fn(&LocalVar) -> Option<LocalVar>) -> Inst {
        let map = |value: &Value| value.map_locals(f);
        match self {
            Inst::Assign { lhs, rhs } => Inst::Assign {
                lhs: lhs.map_locals(f),
                rhs: rhs.map_locals(f),
            },
            Inst::If {
                condition,
                true_branch,
                false_branch,
            } => Inst::If {
                condition: condition.map_locals(f),
                true_branch: true_branch.clone(),
                false_branch: false_branch.clone(),
            },
            Inst::Switch {
                key,
                branches,
                default,
            } => Inst::Switch {
                key: map(key),
                branches: branches.clone(),
                default: default.clone(),
            },
            Inst::Call(call) => Inst::Call(call.map_locals(f)),
            Inst::Return(value) => Inst::Return(value.as_ref().map(map)),
            Inst::Throw(value) => Inst::Throw(map(value)),
            Inst::EnterMonitor(value) => Inst::EnterMonitor(map(value)),
            Inst::ExitMonitor(value) => Inst::ExitMonitor(map(value)),
            Inst::Catch {
                throwable,
                handler,
                entries,
            } => Inst::Catch {
                throwable: f(throwable).unwrap_or_else(|| throwable.clone()),
                handler: handler.clone(),
                entries: entries.clone(),
            },
            Inst::Goto(_) | Inst::Label(_) | Inst::LineNumber { .. } => self.clone(),
        }
    }
}

/// The finished, immutable instruction list of one method.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InstList {
    instructions: Vec<Inst>,
}

impl InstList {
    pub fn new(instructions: Vec<Inst>) -> Self {
        Self { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Inst> {
        self.instructions.iter()
    }

    pub fn instructions(&self) -> &[Inst] {
        &self.instructions
    }

    pub fn into_instructions(self) -> Vec<Inst> {
        self.instructions
    }

    /// Position of the label marker for `label`.
    pub fn label_index(&self, label: &IrLabel) -> Option<usize> {
        self.instructions
            .iter()
            .position(|inst| matches!(inst, Inst::Label(found) if found == label))
    }
}

impl Index<usize> for InstList {
    type Output = Inst;

    fn index(&self, index: usize) -> &Self::Output {
        &self.instructions[index]
    }
}

impl<'a> IntoIterator for &'a InstList {
    type Item = &'a Inst;
    type IntoIter = std::slice::Iter<'a, Inst>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

impl fmt::Display for LocalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for IrLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MethodHandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Long(value) => write!(f, "{value}L"),
            Constant::Float(value) => write!(f, "{value:?}F"),
            Constant::Double(value) => write!(f, "{value:?}"),
            Constant::String(value) => write!(f, "{value:?}"),
            Constant::Class(ty) => write!(f, "{ty}.class"),
            Constant::MethodType {
                parameters,
                return_type,
            } => {
                write!(f, "(")?;
                write_list(f, parameters)?;
                write!(f, "){return_type}")
            }
            Constant::MethodHandle(handle) => write!(f, "{handle}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(local) => write!(f, "{local}"),
            Value::Argument(argument) => f.write_str(&argument.name),
            Value::This(_) => f.write_str("this"),
            Value::Const(constant) => write!(f, "{constant}"),
        }
    }
}

impl fmt::Display for ArrayAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.array, self.index)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{instance}.{}", self.name),
            None => write!(f, "{}.{}", self.owner, self.name),
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::Method(call) => {
                match (&call.instance, call.kind) {
                    (Some(instance), CallKind::Special) => {
                        write!(f, "{instance}.{}::{}(", call.owner, call.name)?
                    }
                    (Some(instance), _) => write!(f, "{instance}.{}(", call.name)?,
                    (None, _) => write!(f, "{}.{}(", call.owner, call.name)?,
                }
                write_list(f, &call.args)?;
                f.write_str(")")
            }
            Call::Dynamic(call) => {
                write!(f, "invokedynamic {}(", call.name)?;
                write_list(f, &call.args)?;
                write!(f, ") via {}", call.bootstrap)
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.symbol(), self.rhs)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Value(value) => write!(f, "{value}"),
            Expr::Binary { op, lhs, rhs, .. } => write!(f, "{lhs} {} {rhs}", op.symbol()),
            Expr::Neg { operand, .. } => write!(f, "-{operand}"),
            Expr::Length(operand) => write!(f, "{operand}.length"),
            Expr::Cast { ty, operand } => write!(f, "({ty}) {operand}"),
            Expr::InstanceOf { operand, target } => write!(f, "{operand} instanceof {target}"),
            Expr::Compare { op, lhs, rhs } => {
                let name = match op {
                    CompareOp::Cmp => "cmp",
                    CompareOp::Cmpl => "cmpl",
                    CompareOp::Cmpg => "cmpg",
                };
                write!(f, "{lhs} {name} {rhs}")
            }
            Expr::New(ty) => write!(f, "new {ty}"),
            Expr::NewArray { ty, dimensions } => {
                write!(f, "new {ty}(")?;
                write_list(f, dimensions)?;
                f.write_str(")")
            }
            Expr::ArrayElement(access) => write!(f, "{access}"),
            Expr::Field(field) => write!(f, "{field}"),
            Expr::Call(call) => write!(f, "{call}"),
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Local(local) => write!(f, "{local}"),
            Place::ArrayElement(access) => write!(f, "{access}"),
            Place::Field(field) => write!(f, "{field}"),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Assign { lhs, rhs } => write!(f, "{lhs} = {rhs}"),
            Inst::Goto(target) => write!(f, "goto {target}"),
            Inst::If {
                condition,
                true_branch,
                false_branch,
            } => write!(f, "if ({condition}) goto {true_branch} else {false_branch}"),
            Inst::Switch {
                key,
                branches,
                default,
            } => {
                write!(f, "switch ({key}) {{")?;
                for (case, target) in branches {
                    write!(f, " {case} -> {target},")?;
                }
                write!(f, " default -> {default} }}")
            }
            Inst::Call(call) => write!(f, "{call}"),
            Inst::Return(Some(value)) => write!(f, "return {value}"),
            Inst::Return(None) => f.write_str("return"),
            Inst::Throw(value) => write!(f, "throw {value}"),
            Inst::EnterMonitor(value) => write!(f, "enter monitor {value}"),
            Inst::ExitMonitor(value) => write!(f, "exit monitor {value}"),
            Inst::Catch {
                throwable, entries, ..
            } => {
                write!(f, "catch ({}", throwable.ty)?;
                let mut types: Vec<&TypeName> = entries.iter().map(|entry| &entry.catch_type).collect();
                types.dedup();
                for ty in types.into_iter().filter(|ty| **ty != throwable.ty) {
                    write!(f, " | {ty}")?;
                }
                write!(f, " {throwable})")
            }
            Inst::Label(label) => write!(f, "{label}:"),
            Inst::LineNumber { line, start } => write!(f, "line {line} at {start}"),
        }
    }
}

impl fmt::Display for InstList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.instructions {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(index: u32, ty: TypeName) -> LocalVar {
        LocalVar {
            index,
            name: format!("%{index}"),
            ty,
        }
    }

    #[test]
    fn float_constants_compare_by_bits() {
        assert_eq!(Constant::Float(f32::NAN), Constant::Float(f32::NAN));
        assert_ne!(Constant::Double(0.0), Constant::Double(-0.0));
        assert_ne!(Constant::Int(0), Constant::Long(0));
    }

    #[test]
    fn retyped_copy_is_a_different_variable() {
        let local = temp(3, TypeName::object());
        let refined = local.with_type(TypeName::string());
        assert_ne!(local, refined);
        assert_eq!(refined.name, "%3");
    }

    #[test]
    fn map_locals_reaches_every_operand() {
        let old = temp(1, TypeName::object());
        let new = old.with_type(TypeName::string());
        let inst = Inst::Assign {
            lhs: Place::Field(FieldRef {
                instance: Some(Value::Local(old.clone())),
                owner: TypeName::class("demo/Box"),
                name: "value".to_string(),
                ty: TypeName::object(),
            }),
            rhs: Expr::Call(Call::Method(MethodCall {
                kind: CallKind::Virtual,
                owner: TypeName::object(),
                name: "toString".to_string(),
                parameter_types: Vec::new(),
                return_type: TypeName::string(),
                instance: Some(Value::Local(old.clone())),
                args: vec![Value::Local(old.clone())],
                interface: false,
            })),
        };
        let mapped = inst.map_locals(&|local| (*local == old).then(|| new.clone()));
        assert_ne!(mapped, inst);
        let Inst::Assign {
            lhs: Place::Field(field),
            rhs: Expr::Call(Call::Method(call)),
        } = &mapped
        else {
            panic!("unexpected shape: {mapped:?}");
        };
        assert_eq!(field.instance, Some(Value::Local(new.clone())));
        assert_eq!(call.instance, Some(Value::Local(new.clone())));
        assert_eq!(call.args, vec![Value::Local(new)]);
        assert_eq!(mapped.to_string(), "%1.value = %1.toString(%1)");
    }

    #[test]
    fn renders_instructions() {
        let a = temp(0, TypeName::INT);
        let b = temp(1, TypeName::INT);
        let mut branches = BTreeMap::new();
        branches.insert(1, IrLabel::numbered(2));
        branches.insert(5, IrLabel::numbered(3));
        let switch = Inst::Switch {
            key: Value::Local(a.clone()),
            branches,
            default: IrLabel::numbered(4),
        };
        assert_eq!(switch.to_string(), "switch (%0) { 1 -> #2, 5 -> #3, default -> #4 }");

        let add = Inst::assign(
            b.clone(),
            Expr::Binary {
                op: BinaryOp::Add,
                ty: TypeName::INT,
                lhs: Value::Local(a.clone()),
                rhs: Value::Const(Constant::Int(1)),
            },
        );
        assert_eq!(add.to_string(), "%1 = %0 + 1");

        let branch = Inst::If {
            condition: Condition {
                op: ConditionOp::Ge,
                lhs: Value::Local(b),
                rhs: Value::Const(Constant::Long(0)),
            },
            true_branch: IrLabel::numbered(1),
            false_branch: IrLabel::numbered(2),
        };
        assert_eq!(branch.to_string(), "if (%1 >= 0L) goto #1 else #2");
        assert!(branch.is_branching());
        assert_eq!(Inst::Label(IrLabel::numbered(7)).to_string(), "#7:");
        assert_eq!(Value::Const(Constant::String("hi".into())).to_string(), "\"hi\"");
        assert_eq!(Value::Const(Constant::Float(1.0)).to_string(), "1.0F");
    }
}
