use crate::error::{BuildError, BuildResult};
use crate::ir::Value;

/// Symbolic machine state after an instruction: sparse locals and an operand
/// stack, top last.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Frame {
    locals: Vec<Option<Value>>,
    stack: Vec<Value>,
}

impl Frame {
    pub(crate) fn new(locals: Vec<Option<Value>>, stack: Vec<Value>) -> Self {
        let mut frame = Frame { locals, stack };
        frame.trim_locals();
        frame
    }

    pub(crate) fn locals(&self) -> &[Option<Value>] {
        &self.locals
    }

    pub(crate) fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub(crate) fn local(&self, slot: u16) -> Option<&Value> {
        self.locals.get(usize::from(slot)).and_then(Option::as_ref)
    }

    /// Value of a slot the current instruction reads.
    pub(crate) fn load(&self, slot: u16, node: usize) -> BuildResult<Value> {
        self.local(slot)
            .cloned()
            .ok_or(BuildError::UnassignedLocal { node, slot })
    }

    pub(crate) fn put_local(&mut self, slot: u16, value: Value) {
        let index = usize::from(slot);
        if self.locals.len() <= index {
            self.locals.resize(index + 1, None);
        }
        self.locals[index] = Some(value);
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self, node: usize) -> BuildResult<Value> {
        self.stack.pop().ok_or(BuildError::StackUnderflow { node })
    }

    pub(crate) fn peek(&self, node: usize) -> BuildResult<Value> {
        self.stack
            .last()
            .cloned()
            .ok_or(BuildError::StackUnderflow { node })
    }

    pub(crate) fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Whether `value` is held anywhere besides local `slot`.
    pub(crate) fn is_shared(&self, value: &Value, slot: u16) -> bool {
        self.stack.iter().any(|held| held == value)
            || self
                .locals
                .iter()
                .enumerate()
                .any(|(index, held)| index != usize::from(slot) && held.as_ref() == Some(value))
    }

    fn trim_locals(&mut self) {
        while matches!(self.locals.last(), Some(None)) {
            self.locals.pop();
        }
    }
}
