//! # Scheduler Configuration

use crate::memory::BLOCK_SIZE;

/// Frequency of the scheduler tick.
pub const TIMER_FREQUENCY_HZ: u32 = 20;

/// Size of every task stack, including the relocated kernel stack.
pub const TASK_STACK_SIZE: usize = BLOCK_SIZE as usize;

/// Id of the task created from the boot flow.
pub const BOOTSTRAP_TASK_ID: u32 = 0;
