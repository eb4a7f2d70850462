//! # Round-Robin Scheduler
//!
//! ```text
//!            cursor
//!              │
//!   ┌──► [0] ─► [2] ─► [1] ──┐
//!   └────────────────────────┘
//! ```
//!
//! The timer advances the cursor one step per tick. A new task is inserted
//! right behind the cursor, so it is the next one to run.
//!
//! Switching is split in two: [`Scheduler::prepare_switch`] updates the list
//! under the lock and hands out the two contexts, then the [`Cpu`] performs
//! the switch after the lock has been released. Interrupts stay disabled
//! throughout.

use crate::stack::{Stack, StackAlloc};
use crate::task::{Context, Task, TaskEntry, TaskId};
use crate::task_list::TaskList;
use crate::{Cpu, SchedError};
use alloc::boxed::Box;
use kernel_info::sched::{BOOTSTRAP_TASK_ID, TIMER_FREQUENCY_HZ};
use kernel_interrupts::{InterruptHandler, PeriodicTimer};
use kernel_sync::irq::sti_enable_interrupts;
use kernel_sync::{IrqGuard, IrqLock};

pub struct Scheduler<S> {
    tasks: TaskList,
    stacks: S,
    next_id: u32,
}

impl<S: StackAlloc> Scheduler<S> {
    /// A scheduler without tasks.
    pub const fn new(stacks: S) -> Self {
        Self {
            tasks: TaskList::new(),
            stacks,
            next_id: BOOTSTRAP_TASK_ID,
        }
    }

    const fn allocate_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Registers the flow of execution that is already running on `stack`
    /// as a task. Its context is filled in by the first switch away from it.
    pub fn adopt_current(&mut self, stack: Stack) -> TaskId {
        let id = self.allocate_id();
        self.tasks
            .insert_after_current(Box::new(Task::new(id, Context::default(), stack)));
        log::debug!("task {id} adopted on stack {:#x}..{:#x}", stack.base(), stack.top());
        id
    }

    /// Creates a task that runs `entry(arg)` on a fresh stack.
    ///
    /// On its first turn the task starts in the CPU's entry trampoline,
    /// which enables interrupts and calls `entry`. The task runs next.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentTask`] before a task was adopted,
    /// [`SchedError::StackAllocation`] when no stack is available.
    pub fn try_thread_create<C: Cpu + ?Sized>(
        &mut self,
        cpu: &C,
        entry: TaskEntry,
        arg: *mut (),
    ) -> Result<TaskId, SchedError> {
        let _irq = IrqGuard::new();
        if self.tasks.is_empty() {
            return Err(SchedError::NoCurrentTask);
        }

        let stack = self.stacks.alloc_stack().ok_or(SchedError::StackAllocation)?;
        // SAFETY: the stack is fresh and belongs to the new task only.
        let context = unsafe { stack.prepare_first_frame(cpu.entry_trampoline(), entry, arg) };

        let id = self.allocate_id();
        self.tasks
            .insert_after_current(Box::new(Task::new(id, context, stack)));
        log::debug!("task {id} created, {} tasks", self.tasks.len());
        Ok(id)
    }

    /// Like [`try_thread_create`](Self::try_thread_create), but failure is fatal.
    pub fn thread_create<C: Cpu + ?Sized>(
        &mut self,
        cpu: &C,
        entry: TaskEntry,
        arg: *mut (),
    ) -> TaskId {
        match self.try_thread_create(cpu, entry, arg) {
            Ok(id) => id,
            Err(e) => {
                log::error!("thread_create failed: {e}");
                panic!("thread_create: {e}");
            }
        }
    }

    /// Advances to the next task.
    ///
    /// Returns where to save the outgoing context and where to load the
    /// incoming one from, or `None` if there is nothing to switch to. The
    /// pointers stay valid until the task list changes.
    pub fn prepare_switch(&mut self) -> Option<(*mut Context, *const Context)> {
        if self.tasks.len() < 2 {
            return None;
        }

        let prev = self.tasks.current_mut()?.context_ptr();
        let next = self.tasks.advance()?;
        log::trace!("switching to task {}", next.id());
        Some((prev, next.context_ptr().cast_const()))
    }

    #[must_use]
    pub fn current_id(&self) -> Option<TaskId> {
        self.tasks.current().map(Task::id)
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub const fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub const fn stacks_mut(&mut self) -> &mut S {
        &mut self.stacks
    }
}

/// Moves the running code onto a full-sized stack, creates the bootstrap
/// task and starts the scheduler tick.
///
/// The live boot stack is copied to the top of a new stack with
/// [`copy_stack`](crate::copy_stack) and the CPU continues on the copy; see
/// [`Cpu::move_stack`].
///
/// # Errors
/// [`SchedError::StackAllocation`] if no stack is available,
/// [`SchedError::Timer`] if the tick cannot be programmed.
///
/// # Safety
/// `boot_stack` must be the stack the caller runs on, and no live pointer
/// into it may be held in a register across this call.
pub unsafe fn task_init<S, C, T>(
    mut stacks: S,
    cpu: &C,
    boot_stack: Stack,
    timer: &mut T,
    tick_handler: &'static dyn InterruptHandler,
) -> Result<Scheduler<S>, SchedError>
where
    S: StackAlloc,
    C: Cpu + ?Sized,
    T: PeriodicTimer + ?Sized,
{
    let _irq = IrqGuard::new();

    let stack = stacks.alloc_stack().ok_or(SchedError::StackAllocation)?;
    // SAFETY: forwarded from the caller.
    unsafe { cpu.move_stack(&boot_stack, &stack) };

    let mut scheduler = Scheduler::new(stacks);
    scheduler.adopt_current(stack);

    timer.arm(TIMER_FREQUENCY_HZ, tick_handler)?;
    log::info!("scheduler running at {TIMER_FREQUENCY_HZ} Hz");
    Ok(scheduler)
}

/// Switches to the next task, if there is one.
///
/// This is the body of the timer handler. The lock is released before the
/// switch so the incoming task can take it; interrupts stay off until the
/// current task is resumed.
pub fn task_switch<S: StackAlloc, C: Cpu + ?Sized>(lock: &IrqLock<Scheduler<S>>, cpu: &C) {
    let _irq = IrqGuard::new();
    let Some((prev, next)) = lock.with_lock(Scheduler::prepare_switch) else {
        return;
    };
    // SAFETY: both contexts belong to boxed tasks that are never removed.
    unsafe { cpu.switch(prev, next) };
}

/// Gives up the rest of the current turn.
pub fn yield_now<S: StackAlloc, C: Cpu + ?Sized>(lock: &IrqLock<Scheduler<S>>, cpu: &C) {
    log::trace!("yield");
    task_switch(lock, cpu);
}

/// First Rust code a new task runs.
///
/// # Panics
/// Always, once `entry` returns.
pub fn run_task(entry: TaskEntry, arg: *mut ()) -> ! {
    sti_enable_interrupts();
    entry(arg);
    log::error!("task entry {:#x} returned", entry as usize);
    panic!("task entry returned; tasks must run forever");
}
