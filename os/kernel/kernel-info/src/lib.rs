//! # Kernel Configuration and Boot Interface
//!
//! The authoritative source for layout constants shared by the boot code,
//! the allocators, the paging code and the linker script, plus the small
//! amount of boot loader information the kernel consumes.
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Identity map of detected RAM   │ (after page_init)
//! 0xC000_0000 ├─────────────────────────────────┤ KERNEL_VIRTUAL_BASE
//!             │  Kernel image, boot stack       │ block 0
//! 0xC040_0000 ├─────────────────────────────────┤ DIRECTORY_POOL_VIRT
//!             │  Page directory pool            │ block 1
//! 0xD000_0000 ├─────────────────────────────────┤ BLOCK_WINDOW_BASE
//!             │  Blocks from the block allocator│ heap superblocks,
//!             │  (4 MiB pages)                  │ task stacks, tables
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! * [`memory`]: layout constants and helpers.
//! * [`sched`]: scheduler tick and stack sizes.
//! * [`boot`]: Multiboot record, memory map walk and command line options.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod sched;
