//! # Task Scheduler
//!
//! Preemptive round-robin multitasking on a single processor. A periodic
//! timer interrupt switches between tasks; a task can also give up its turn
//! with [`yield_now`].
//!
//! - [`Scheduler`]: the task list and task creation.
//! - [`task_init`]: moves the boot stack, adopts the boot flow as task 0 and
//!   arms the tick.
//! - [`Cpu`]: the two hardware operations the scheduler needs. [`X86Cpu`]
//!   implements them for i686.
//!
//! Tasks are never destroyed. A task whose entry function returns brings the
//! kernel down.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod arch;
mod scheduler;
mod stack;
mod task;
mod task_list;

#[cfg(target_arch = "x86")]
pub use crate::arch::x86::X86Cpu;
pub use crate::scheduler::{Scheduler, run_task, task_init, task_switch, yield_now};
pub use crate::stack::{Stack, StackAlloc, copy_stack, relocate_words};
pub use crate::task::{Context, Task, TaskEntry, TaskId};
pub use crate::task_list::TaskList;
use kernel_interrupts::TimerError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SchedError {
    #[error("no memory for a task stack")]
    StackAllocation,
    #[error("no task is running")]
    NoCurrentTask,
    #[error("cannot start the scheduler tick: {0}")]
    Timer(#[from] TimerError),
}

/// The processor operations behind a context switch.
pub trait Cpu {
    /// Address new tasks start at; see [`Stack::prepare_first_frame`].
    fn entry_trampoline(&self) -> usize;

    /// Saves the running context into `prev` and continues at `next`.
    ///
    /// Returns once some later switch resumes `prev`.
    ///
    /// # Safety
    /// Both pointers must be valid for the duration of the switch and
    /// `next` must describe a suspended task or a prepared first frame.
    /// Interrupts must be disabled.
    unsafe fn switch(&self, prev: *mut Context, next: *const Context);

    /// Copies the running stack `old` to the top of `new` with
    /// [`copy_stack`] and continues on the copy: when this returns, the
    /// stack and frame pointer have moved by `new.top() - old.top()`.
    ///
    /// # Safety
    /// `old` must be the stack the caller runs on and `new` must be unused.
    /// No register may hold a pointer into `old` across the call.
    unsafe fn move_stack(&self, old: &Stack, new: &Stack);
}
