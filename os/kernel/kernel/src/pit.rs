//! # 8253/8254 Programmable Interval Timer
//!
//! Channel 0 drives IRQ 0 and is the scheduler's tick source.

use crate::interrupts::register_interrupt_handler;
use crate::pic;
use crate::ports::outb;
use kernel_interrupts::vectors::{self, IRQ_BASE};
use kernel_interrupts::{
    InterruptHandler, PIT_CHANNEL0, PIT_COMMAND, PIT_MODE_SQUARE_WAVE, PeriodicTimer, TimerError,
    pit_divisor,
};

/// PIT channel 0 as a [`PeriodicTimer`].
#[derive(Debug, Default)]
pub struct Pit;

impl PeriodicTimer for Pit {
    fn arm(&mut self, hz: u32, handler: &'static dyn InterruptHandler) -> Result<(), TimerError> {
        let [lo, hi] = pit_divisor(hz)?.to_le_bytes();
        register_interrupt_handler(vectors::TIMER, handler);

        // SAFETY: the command byte selects channel 0, lo/hi access, so the
        // next two data writes form the reload value.
        unsafe {
            outb(PIT_COMMAND, PIT_MODE_SQUARE_WAVE);
            outb(PIT_CHANNEL0, lo);
            outb(PIT_CHANNEL0, hi);
            pic::unmask(vectors::TIMER - IRQ_BASE);
        }
        log::debug!("PIT channel 0 at {hz} Hz");
        Ok(())
    }
}
