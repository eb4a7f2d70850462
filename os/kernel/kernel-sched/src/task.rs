use crate::stack::Stack;
use core::fmt;

/// Code a task starts in. It receives the argument given at creation and
/// must never return.
pub type TaskEntry = extern "C" fn(*mut ());

/// Identifier of a task; the bootstrap task is 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct TaskId(u32);

impl TaskId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a suspended task continues.
///
/// The field order is part of the context switch ABI: `eip` at offset 0,
/// `esp` at one word, `ebp` at two words.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct Context {
    pub eip: usize,
    pub esp: usize,
    pub ebp: usize,
}

/// One schedulable flow of execution.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    context: Context,
    stack: Stack,
}

impl Task {
    pub(crate) const fn new(id: TaskId, context: Context, stack: Stack) -> Self {
        Self { id, context, stack }
    }

    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) const fn context_ptr(&mut self) -> *mut Context {
        &raw mut self.context
    }

    #[must_use]
    pub const fn stack(&self) -> &Stack {
        &self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn context_layout() {
        let word = size_of::<usize>();
        assert_eq!(offset_of!(Context, eip), 0);
        assert_eq!(offset_of!(Context, esp), word);
        assert_eq!(offset_of!(Context, ebp), 2 * word);
    }

    #[test]
    fn display() {
        assert_eq!(TaskId::new(3).to_string(), "#3");
    }
}
