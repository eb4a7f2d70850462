//! # Interrupt Plumbing
//!
//! The hardware-independent half of interrupt handling: the register frame
//! the ISR stubs build on the stack, a fixed table mapping vectors to
//! handler objects, and the programmable interval timer arithmetic.
//!
//! The kernel binary owns the IDT, the assembly stubs and the PIC. Every stub
//! ends up in a single Rust entry point that looks the vector up in a
//! [`HandlerTable`] and calls [`dispatch_to`]. Subsystems never see the IDT;
//! they register through [`InterruptRegistry`] and, for the scheduler tick,
//! through [`PeriodicTimer`].
//!
//! ```
//! use kernel_interrupts::{HandlerTable, InterruptFrame, InterruptRegistry, Dispatch, vectors};
//!
//! static TICK: fn(&mut InterruptFrame) = |frame| frame.eax += 1;
//!
//! let mut table = HandlerTable::new();
//! table.register_interrupt_handler(vectors::TIMER, &TICK);
//!
//! let mut frame = InterruptFrame::for_vector(vectors::TIMER);
//! assert_eq!(table.dispatch(&mut frame), Dispatch::Handled);
//! assert_eq!(frame.eax, 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod frame;
mod handler;
mod timer;
pub mod vectors;

pub use frame::InterruptFrame;
pub use handler::{Dispatch, HandlerTable, InterruptHandler, InterruptRegistry, dispatch_to};
pub use timer::{
    PIT_CHANNEL0, PIT_COMMAND, PIT_MODE_SQUARE_WAVE, PIT_OSCILLATOR_HZ, PeriodicTimer, TimerError,
    pit_divisor,
};
