//! # Task Stacks
//!
//! Every task owns one downward-growing stack. New tasks get a fresh stack
//! with a prepared first frame, so no live stack is ever copied for them.
//!
//! The one exception is the boot stack: [`task_init`](crate::task_init)
//! moves it into a full-sized stack with [`copy_stack`], which rewrites every
//! word that looks like a pointer into the old stack. That scan cannot tell
//! pointers from integers that happen to fall into the same range.

use crate::task::{Context, TaskEntry};
use core::ptr;

/// A stack region `[base, base + size)`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Stack {
    base: usize,
    size: usize,
}

impl Stack {
    #[must_use]
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// One past the highest byte; the initial stack pointer.
    #[must_use]
    pub const fn top(&self) -> usize {
        self.base + self.size
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.top()
    }

    /// Writes the frame a new task starts from and returns its context.
    ///
    /// ```text
    ///  top ─► ┌─────────┐
    ///         │  arg    │
    ///         │  entry  │
    ///  esp ─► │  0      │ fake return address
    ///         └─────────┘
    /// ```
    ///
    /// The context resumes in `trampoline` with `entry` and `arg` as its two
    /// stack arguments and a null frame pointer.
    ///
    /// # Safety
    /// The top three words of the stack must be writable and unused.
    pub unsafe fn prepare_first_frame(
        &self,
        trampoline: usize,
        entry: TaskEntry,
        arg: *mut (),
    ) -> Context {
        let frame = [0, entry as usize, arg.expose_provenance()];
        let esp = self.top() - size_of_val(&frame);
        unsafe { ptr::write(esp as *mut [usize; 3], frame) };
        Context {
            eip: trampoline,
            esp,
            ebp: 0,
        }
    }
}

/// Source of task stacks.
pub trait StackAlloc {
    /// A fresh, word-aligned stack, or `None` when memory is exhausted.
    fn alloc_stack(&mut self) -> Option<Stack>;
}

impl<T: StackAlloc + ?Sized> StackAlloc for &mut T {
    fn alloc_stack(&mut self) -> Option<Stack> {
        (**self).alloc_stack()
    }
}

/// Rewrites every word `v` with `old_base < v < old_top` to
/// `v + (new_top - old_top)`. Returns how many words changed.
pub fn relocate_words(words: &mut [usize], old_base: usize, old_top: usize, new_top: usize) -> usize {
    let delta = new_top.wrapping_sub(old_top);
    let mut rewritten = 0;
    for word in words.iter_mut().filter(|w| **w > old_base && **w < old_top) {
        *word = word.wrapping_add(delta);
        rewritten += 1;
    }
    rewritten
}

/// Copies `old` to the top of `new` and relocates stack pointers in the
/// copy. Returns the distance the stack moved, `new.top() - old.top()`.
///
/// # Safety
/// Both stacks must be valid, word-aligned and not overlap, and `new` must
/// be at least as large as `old`. Nothing may use `new` during the copy.
pub unsafe fn copy_stack(old: &Stack, new: &Stack) -> isize {
    debug_assert!(new.size() >= old.size());
    let dst = new.top() - old.size();
    unsafe { ptr::copy_nonoverlapping(old.base() as *const u8, dst as *mut u8, old.size()) };

    let words = old.size() / size_of::<usize>();
    let copy = unsafe { core::slice::from_raw_parts_mut(dst as *mut usize, words) };
    let rewritten = relocate_words(copy, old.base(), old.top(), new.top());
    log::debug!(
        "moved stack {:#x}..{:#x} to {:#x}..{:#x}, {rewritten} words rewritten",
        old.base(),
        old.top(),
        dst,
        new.top()
    );

    #[allow(clippy::cast_possible_wrap)]
    let delta = new.top().wrapping_sub(old.top()) as isize;
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocation_moves_pointers_only() {
        let (old_base, old_top, new_top) = (0x1000, 0x2000, 0x9000);
        let mut words = [0x1800, 0x1000, 0x2000, 0x1004, 42, 0x1FFF];
        assert_eq!(relocate_words(&mut words, old_base, old_top, new_top), 3);
        assert_eq!(words, [0x8800, 0x1000, 0x2000, 0x8004, 42, 0x8FFF]);
    }

    #[test]
    fn relocation_downwards() {
        let mut words = [0x9100];
        relocate_words(&mut words, 0x9000, 0xA000, 0x2000);
        assert_eq!(words, [0x1100]);
    }

    #[test]
    fn copy_keeps_offsets_from_the_base() {
        const K: usize = 64;
        let mut old = vec![0usize; K];
        let mut new = vec![0usize; K];
        let old_stack = Stack::new(old.as_mut_ptr().addr(), K * size_of::<usize>());
        let new_stack = Stack::new(new.as_mut_ptr().addr(), K * size_of::<usize>());

        let v = old_stack.base() + 40;
        old[10] = v;
        old[11] = 7;

        let delta = unsafe { copy_stack(&old_stack, &new_stack) };
        assert_eq!(new[10], new_stack.base() + (v - old_stack.base()));
        assert_eq!(new[11], 7);
        assert_eq!(delta, new_stack.top().wrapping_sub(old_stack.top()) as isize);
    }

    #[test]
    fn copy_into_a_larger_stack_is_top_aligned() {
        let mut old = vec![0usize; 16];
        let mut new = vec![0usize; 64];
        let old_stack = Stack::new(old.as_mut_ptr().addr(), 16 * size_of::<usize>());
        let new_stack = Stack::new(new.as_mut_ptr().addr(), 64 * size_of::<usize>());

        // a frame pointer one word below the top
        old[15] = old_stack.top() - size_of::<usize>();
        unsafe { copy_stack(&old_stack, &new_stack) };
        assert_eq!(new[63], new_stack.top() - size_of::<usize>());
    }

    extern "C" fn nop(_: *mut ()) {}

    #[test]
    fn first_frame() {
        let mut memory = vec![0xAAusize; 8];
        let stack = Stack::new(memory.as_mut_ptr().addr(), 8 * size_of::<usize>());
        let arg = ptr::without_provenance_mut::<()>(0x55);

        let context = unsafe { stack.prepare_first_frame(0x1234, nop, arg) };
        assert_eq!(context.eip, 0x1234);
        assert_eq!(context.ebp, 0);
        assert_eq!(context.esp, stack.top() - 3 * size_of::<usize>());
        assert_eq!(memory[5..], [0, nop as usize, 0x55]);
        assert_eq!(memory[4], 0xAA);
    }
}
