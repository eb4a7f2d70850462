//! # Kernel Tasks
//!
//! Glue between [`kernel_sched`] and the rest of the kernel: task stacks are
//! whole 4 MiB blocks taken from the heap's block allocator, the PIT tick
//! drives [`task_switch`], and the scheduler lives in a global so the tick
//! handler can reach it.

use crate::boot::boot_stack;
use crate::memory::HEAP;
use crate::pit::Pit;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_info::sched::{TASK_STACK_SIZE, TIMER_FREQUENCY_HZ};
use kernel_interrupts::{InterruptFrame, InterruptHandler};
use kernel_sched::{Scheduler, Stack, StackAlloc, TaskEntry, TaskId, X86Cpu, task_init, task_switch};
use kernel_sync::{IrqLock, SyncOnceCell};

/// Task stacks backed by allocator blocks.
pub struct BlockStacks;

impl StackAlloc for BlockStacks {
    fn alloc_stack(&mut self) -> Option<Stack> {
        let va = HEAP.with_heap(|heap| heap.source_mut().try_alloc_block())?;
        match va {
            Ok(va) => Some(Stack::new(va.as_usize(), TASK_STACK_SIZE)),
            Err(e) => {
                log::warn!("no block for a task stack: {e}");
                None
            }
        }
    }
}

static SCHEDULER: SyncOnceCell<IrqLock<Scheduler<BlockStacks>>> = SyncOnceCell::new();

/// Timer ticks since the scheduler started.
static TICKS: AtomicU32 = AtomicU32::new(0);

struct SchedulerTick;

impl InterruptHandler for SchedulerTick {
    fn handle(&self, _frame: &mut InterruptFrame) {
        TICKS.fetch_add(1, Ordering::Relaxed);
        if let Some(scheduler) = SCHEDULER.get() {
            task_switch(scheduler, &X86Cpu);
        }
    }
}

static TICK: SchedulerTick = SchedulerTick;

#[must_use]
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Moves the boot flow onto a task stack and starts the tick.
///
/// # Panics
/// If no stack block is left or the PIT cannot be armed.
///
/// # Safety
/// Must be called once, from the boot flow on the boot stack, after the
/// heap is up and with interrupts disabled. The caller must not hold
/// pointers into its own stack frame across the call.
#[inline(never)]
pub unsafe fn start() {
    let scheduler = match unsafe { task_init(BlockStacks, &X86Cpu, boot_stack(), &mut Pit, &TICK) } {
        Ok(scheduler) => scheduler,
        Err(e) => panic!("cannot start the scheduler: {e}"),
    };
    if SCHEDULER.set(IrqLock::new(scheduler)).is_err() {
        panic!("scheduler started twice");
    }
}

/// Starts `entry(arg)` as a new task.
///
/// # Panics
/// Before [`start`], and when no stack block is left.
#[must_use]
pub fn spawn(entry: TaskEntry, arg: *mut ()) -> TaskId {
    let Some(scheduler) = SCHEDULER.get() else {
        panic!("spawn before the scheduler was started");
    };
    scheduler.with_lock(|s| s.thread_create(&X86Cpu, entry, arg))
}

/// Gives up the rest of this task's turn.
pub fn yield_now() {
    if let Some(scheduler) = SCHEDULER.get() {
        kernel_sched::yield_now(scheduler, &X86Cpu);
    }
}

fn current_id() -> Option<TaskId> {
    SCHEDULER.get()?.with_lock(|s| s.current_id())
}

/// Logs a line every `arg` seconds, sleeping in between.
pub extern "C" fn heartbeat(arg: *mut ()) {
    let period = u32::try_from(arg.addr()).unwrap_or(1).max(1) * TIMER_FREQUENCY_HZ;
    let mut next = ticks();
    loop {
        if ticks() >= next {
            if let Some(id) = current_id() {
                log::info!("task {id}: tick {}", ticks());
            }
            next = next.wrapping_add(period);
        }
        crate::halt();
    }
}

/// Keeps a rolling buffer on the heap to show that tasks can allocate.
pub extern "C" fn churn(_arg: *mut ()) {
    let mut rounds: u32 = 0;
    loop {
        let buffer: Vec<u32> = (0..256).map(|i| i ^ rounds).collect();
        let sum = buffer.iter().fold(0u32, |acc, v| acc.wrapping_add(*v));
        drop(buffer);

        rounds = rounds.wrapping_add(1);
        if rounds.is_multiple_of(64) {
            if let Some(stats) = HEAP.with_heap(|heap| heap.stats()) {
                log::debug!(
                    "churn: {rounds} rounds, checksum {sum:#x}, {} heap blocks in use",
                    stats.used_blocks
                );
            }
        }
        yield_now();
    }
}

/// Starts the boot-time tasks.
pub fn spawn_initial_tasks() {
    let first = spawn(heartbeat, ptr::without_provenance_mut(1));
    let second = spawn(heartbeat, ptr::without_provenance_mut(3));
    let third = spawn(churn, ptr::null_mut());
    log::info!("started tasks {first}, {second} and {third}");
}
