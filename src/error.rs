use thiserror::Error;

use crate::method::LabelId;

/// Internal-consistency failures that abort IR construction for a method.
///
/// None of these are recoverable: a partially built instruction list would be
/// unsound input for the analyses that consume it, so the builder stops at the
/// first violation and returns no output. Node ids are positions in the
/// instruction stream plus one; id `0` is the synthetic entry node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The traversal reached an instruction that was already interpreted.
    #[error("instruction {node} visited twice")]
    RevisitedInstruction { node: usize },

    /// A predecessor that must precede `node` in traversal order has no frame.
    #[error("no frame for predecessor {predecessor} of instruction {node}")]
    MissingFrame { node: usize, predecessor: usize },

    /// A non-label instruction has zero or several predecessors.
    #[error("instruction {node} has no single predecessor")]
    NoSinglePredecessor { node: usize },

    /// An instruction popped more values than the modelled stack holds.
    #[error("operand stack underflow at instruction {node}")]
    StackUnderflow { node: usize },

    /// A load read a local slot that holds no value.
    #[error("local slot {slot} is unassigned at instruction {node}")]
    UnassignedLocal { node: usize, slot: u16 },

    /// A jump, switch, line number or exception range names a label that is
    /// not present in the stream.
    #[error("label {0:?} is not defined in the instruction stream")]
    UnknownLabel(LabelId),

    /// A raw opcode byte that does not map to a supported instruction.
    #[error("unsupported opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// A field/method descriptor or internal class name could not be parsed.
    #[error("malformed descriptor `{descriptor}`: {reason}")]
    MalformedDescriptor {
        descriptor: String,
        reason: &'static str,
    },

    /// An `invokedynamic` or dynamic constant bootstrap is not well formed.
    #[error("malformed bootstrap method for `{name}`: {reason}")]
    MalformedBootstrap { name: String, reason: String },

    /// Stack values of incompatible types meet at a join point.
    #[error("incompatible stack types at slot {slot} of join {node}")]
    IncompatibleStackTypes { node: usize, slot: usize },

    /// A join point was reached before any of its predecessors had a frame.
    #[error("no predecessor frame is available for join {node}")]
    EmptyMerge { node: usize },

    /// The traversal order did not cover every reachable instruction.
    #[error("traversal order is missing reachable instruction {node}")]
    IncompleteOrder { node: usize },
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
