//! # Kernel synchronization primitives
//!
//! The kernel runs on a single processor, so exclusion is achieved by masking
//! interrupts rather than by spinning:
//!
//! - [`IrqGuard`] masks interrupts for a scope and restores the previous state.
//! - [`IrqLock`] couples a value with an [`IrqGuard`] and detects re-entry.
//! - [`SyncOnceCell`] holds singletons that are created during bring-up.

#![cfg_attr(target_os = "none", no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod irq_lock;
mod sync_once_cell;

pub use irq::IrqGuard;
pub use irq_lock::{IrqLock, IrqLockGuard};
pub use sync_once_cell::SyncOnceCell;
