use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildResult};
use crate::opcodes;
use crate::types::Primitive;

/// Structural jump target. Every label appears exactly once in the stream as
/// an [`Insn::Label`] marker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LabelId(pub u32);

/// A method body ready for IR construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodBody {
    /// Declaring class, internal (`a/b/C`) or dotted form.
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    /// Declared parameter names, by parameter position, when known.
    #[serde(default)]
    pub parameter_names: Vec<Option<String>>,
    pub instructions: Vec<Insn>,
    #[serde(default)]
    pub exception_handlers: Vec<ExceptionHandler>,
    #[serde(default)]
    pub local_variables: Vec<LocalVariable>,
}

impl MethodBody {
    /// Load a method body exchanged as JSON.
    pub fn from_json(json: &str) -> Result<MethodBody> {
        serde_json::from_str(json).context("failed to parse method body JSON")
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}{}", self.owner.replace('/', "."), self.name, self.descriptor)
    }
}

/// Exception table entry. `start` is inclusive, `end` exclusive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    /// Internal name of the caught class; `None` catches everything.
    pub catch_type: Option<String>,
}

/// Debug-table entry naming a local slot over a label range (both inclusive).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: String,
    pub index: u16,
    pub start: LabelId,
    pub end: LabelId,
}

/// One element of the input instruction stream.
///
/// `Label`, `LineNumber` and `Frame` are pseudo instructions; every other
/// variant is a JVM instruction grouped by operand shape. Jump targets are
/// labels, never raw offsets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Insn {
    Label(LabelId),
    LineNumber { line: u32, start: LabelId },
    Frame(FrameHint),

    Nop,
    Const(Literal),
    /// `bipush` / `sipush`.
    Push(i32),
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    Pop,
    Pop2,
    Dup(DupOp),
    Swap,
    Binary(BinaryOp),
    Neg,
    /// Primitive conversion (`i2l`, `d2f`, `i2b`, ...) to the given type.
    Convert(Primitive),
    Compare(CompareOp),
    Return,
    ReturnValue,
    ArrayLength,
    Throw,
    MonitorEnter,
    MonitorExit,

    Load(u16),
    Store(u16),
    Iinc { index: u16, increment: i32 },

    NewPrimitiveArray(Primitive),
    New(String),
    NewObjectArray(String),
    CheckCast(String),
    InstanceOf(String),
    MultiNewArray { descriptor: String, dimensions: u8 },

    Field {
        op: FieldOp,
        owner: String,
        name: String,
        descriptor: String,
    },
    Invoke {
        kind: CallKind,
        owner: String,
        name: String,
        descriptor: String,
        interface: bool,
    },
    InvokeDynamic {
        name: String,
        descriptor: String,
        bootstrap: Handle,
        bootstrap_args: Vec<BootstrapArg>,
    },
    Ldc(LdcConstant),

    Jump { op: JumpOp, target: LabelId },
    TableSwitch {
        min: i32,
        max: i32,
        default: LabelId,
        targets: Vec<LabelId>,
    },
    LookupSwitch {
        default: LabelId,
        keys: Vec<i32>,
        targets: Vec<LabelId>,
    },
}

impl Insn {
    /// Decode an operand-less opcode byte. Anything that needs operands, and
    /// the unsupported `jsr`/`ret` family, fails closed.
    pub fn decode(opcode: u8) -> BuildResult<Insn> {
        use opcodes::*;

        let insn = match opcode {
            NOP => Insn::Nop,
            ACONST_NULL => Insn::Const(Literal::Null),
            ICONST_M1..=ICONST_5 => Insn::Const(Literal::Int(i32::from(opcode) - 3)),
            LCONST_0 | LCONST_1 => Insn::Const(Literal::Long(i64::from(opcode - LCONST_0))),
            FCONST_0..=FCONST_2 => Insn::Const(Literal::Float(f32::from(opcode - FCONST_0))),
            DCONST_0 | DCONST_1 => Insn::Const(Literal::Double(f64::from(opcode - DCONST_0))),
            IALOAD..=SALOAD => Insn::ArrayLoad(ArrayKind::from_offset(opcode - IALOAD)),
            IASTORE..=SASTORE => Insn::ArrayStore(ArrayKind::from_offset(opcode - IASTORE)),
            POP => Insn::Pop,
            POP2 => Insn::Pop2,
            DUP => Insn::Dup(DupOp::Dup),
            DUP_X1 => Insn::Dup(DupOp::DupX1),
            DUP_X2 => Insn::Dup(DupOp::DupX2),
            DUP2 => Insn::Dup(DupOp::Dup2),
            DUP2_X1 => Insn::Dup(DupOp::Dup2X1),
            DUP2_X2 => Insn::Dup(DupOp::Dup2X2),
            SWAP => Insn::Swap,
            IADD..=DREM => Insn::Binary(BinaryOp::ARITHMETIC[usize::from((opcode - IADD) / 4)]),
            INEG..=DNEG => Insn::Neg,
            ISHL..=LXOR => Insn::Binary(BinaryOp::BITWISE[usize::from((opcode - ISHL) / 2)]),
            I2L | F2L | D2L => Insn::Convert(Primitive::Long),
            I2F | L2F | D2F => Insn::Convert(Primitive::Float),
            I2D | L2D | F2D => Insn::Convert(Primitive::Double),
            L2I | F2I | D2I => Insn::Convert(Primitive::Int),
            I2B => Insn::Convert(Primitive::Byte),
            I2C => Insn::Convert(Primitive::Char),
            I2S => Insn::Convert(Primitive::Short),
            LCMP => Insn::Compare(CompareOp::Cmp),
            FCMPL | DCMPL => Insn::Compare(CompareOp::Cmpl),
            FCMPG | DCMPG => Insn::Compare(CompareOp::Cmpg),
            IRETURN..=ARETURN => Insn::ReturnValue,
            RETURN => Insn::Return,
            ARRAYLENGTH => Insn::ArrayLength,
            ATHROW => Insn::Throw,
            MONITORENTER => Insn::MonitorEnter,
            MONITOREXIT => Insn::MonitorExit,
            _ => return Err(BuildError::UnknownOpcode(opcode)),
        };
        Ok(insn)
    }

    /// Returns and `athrow`: nothing executes after them.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Insn::Return | Insn::ReturnValue | Insn::Throw)
    }

    /// Instructions whose IR already names every outgoing edge explicitly.
    pub fn is_branching(&self) -> bool {
        matches!(
            self,
            Insn::Jump { .. } | Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } | Insn::Throw
        )
    }

    /// Whether control may continue with the next instruction in the stream.
    pub fn falls_through(&self) -> bool {
        match self {
            Insn::Jump { op, .. } => *op != JumpOp::Goto,
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => false,
            other => !other.is_terminating(),
        }
    }

    /// Explicit jump/switch targets, default first for switches.
    pub fn branch_targets(&self) -> Vec<LabelId> {
        match self {
            Insn::Jump { target, .. } => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            }
            | Insn::LookupSwitch {
                default, targets, ..
            } => {
                let mut all = Vec::with_capacity(targets.len() + 1);
                all.push(*default);
                all.extend(targets.iter().copied());
                all
            }
            _ => Vec::new(),
        }
    }
}

/// Literal pushed by the `*const_*` family.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

/// Element kind encoded in array load/store opcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ArrayKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    /// `baload`/`bastore` serve both `byte[]` and `boolean[]`.
    Byte,
    Char,
    Short,
}

impl ArrayKind {
    fn from_offset(offset: u8) -> ArrayKind {
        const ORDER: [ArrayKind; 8] = [
            ArrayKind::Int,
            ArrayKind::Long,
            ArrayKind::Float,
            ArrayKind::Double,
            ArrayKind::Reference,
            ArrayKind::Byte,
            ArrayKind::Char,
            ArrayKind::Short,
        ];
        ORDER[usize::from(offset)]
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DupOp {
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    const ARITHMETIC: [BinaryOp; 5] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Rem,
    ];
    const BITWISE: [BinaryOp; 6] = [
        BinaryOp::Shl,
        BinaryOp::Shr,
        BinaryOp::Ushr,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Xor,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Ushr => ">>>",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
        }
    }
}

/// Three-way comparisons: `lcmp`, and the NaN-biased float/double forms.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Cmp,
    Cmpl,
    Cmpg,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FieldOp {
    GetField,
    PutField,
    GetStatic,
    PutStatic,
}

/// Call opcode classification, shared by the input stream and the IR.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JumpOp {
    Goto,
    IfEq,
    IfNe,
    IfLt,
    IfGe,
    IfGt,
    IfLe,
    IfICmpEq,
    IfICmpNe,
    IfICmpLt,
    IfICmpGe,
    IfICmpGt,
    IfICmpLe,
    IfACmpEq,
    IfACmpNe,
    IfNull,
    IfNonNull,
}

/// Method handle reference kinds (JVMS 5.4.3.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    pub fn is_field(self) -> bool {
        matches!(
            self,
            HandleKind::GetField | HandleKind::GetStatic | HandleKind::PutField | HandleKind::PutStatic
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub kind: HandleKind,
    pub owner: String,
    pub name: String,
    /// Method descriptor, or field descriptor for field handles.
    pub descriptor: String,
    pub interface: bool,
}

/// Static argument of a bootstrap method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BootstrapArg {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Internal class name or array descriptor.
    Class(String),
    /// Method descriptor.
    MethodType(String),
    Handle(Handle),
}

/// Operand of `ldc`, `ldc_w` and `ldc2_w`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LdcConstant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(String),
    MethodType(String),
    Handle(Handle),
    Dynamic {
        name: String,
        descriptor: String,
        bootstrap: Handle,
        bootstrap_args: Vec<BootstrapArg>,
    },
}

/// Verifier stack-map frame attached to a program point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHint {
    pub kind: FrameKind,
    /// Locals in verifier order; `long`/`double` entries cover two slots.
    pub locals: Vec<VerifierType>,
    pub stack: Vec<VerifierType>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FrameKind {
    New,
    Full,
    Append,
    Chop,
    Same,
    Same1,
}

impl FrameKind {
    /// Only expanded frames describe every slot.
    pub fn is_complete(self) -> bool {
        matches!(self, FrameKind::New | FrameKind::Full)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifierType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal class name, or array descriptor.
    Object(String),
    /// Result of the `new` that follows the given label.
    Uninitialized(LabelId),
}

impl VerifierType {
    pub fn is_dword(&self) -> bool {
        matches!(self, VerifierType::Long | VerifierType::Double)
    }
}
