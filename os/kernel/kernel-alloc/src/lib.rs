//! # Kernel Memory Allocation
//!
//! Two layers sit on top of the page directory the boot code leaves behind:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Kernel Heap (kmem)                 │
//! │    • kmalloc / kcalloc / kfree                      │
//! │    • aligned and physically addressed variants      │
//! │    • grows by one block on exhaustion               │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ BlockSource
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Block Allocator                     │
//! │    • 4 MiB physical blocks, one large page each     │
//! │    • 4 KiB chunks of the page directory pool        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Block Allocator ([`BlockAllocator`])
//!
//! Tracks the 1024 physical 4 MiB blocks in a bitmap. An allocation picks the
//! first free block, maps it into the first free directory slot at or after
//! `0xD000_0000` and zeroes it. Blocks are never returned.
//!
//! ## Heap ([`Heap`], [`KernelHeap`])
//!
//! A list of superblocks, each split into 16-byte blocks tracked by a
//! one-byte tag per block. [`KernelHeap`] adds the kernel-facing API and
//! asks its [`BlockSource`] for another superblock when a request does not
//! fit. [`LockedHeap`] puts it behind an [`IrqLock`](kernel_sync::IrqLock)
//! and serves as the global allocator.
//!
//! # Memory Layout
//!
//! | Range | Use |
//! |:------|:----|
//! | `0xC000_0000..0xC040_0000` | block 0: kernel image, boot stack |
//! | `0xC040_0000..0xC080_0000` | block 1: page directory pool |
//! | `0xD000_0000..` | allocated blocks (heap, stacks) |

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod block;
mod heap;
mod kmem;

pub use crate::block::{BlockAllocError, BlockAllocator};
pub use crate::heap::{Heap, HeapStats};
pub use crate::kmem::{HeapError, KernelHeap, LockedHeap};
use core::ptr::NonNull;
use kernel_memory_addresses::PhysicalAddress;

/// Where the kernel heap gets its memory from.
pub trait BlockSource {
    /// A mapped, zeroed, 4 KiB aligned block of
    /// [`BLOCK_SIZE`](kernel_info::memory::BLOCK_SIZE) bytes that is never
    /// reclaimed.
    ///
    /// # Errors
    /// Whatever prevented the block from being allocated.
    fn grant_block(&mut self) -> Result<NonNull<u8>, BlockAllocError>;

    /// Physical address behind a pointer into a granted block.
    fn physical_address(&self, ptr: *const u8) -> Option<PhysicalAddress>;
}

impl<T: BlockSource + ?Sized> BlockSource for &mut T {
    fn grant_block(&mut self) -> Result<NonNull<u8>, BlockAllocError> {
        (**self).grant_block()
    }

    fn physical_address(&self, ptr: *const u8) -> Option<PhysicalAddress> {
        (**self).physical_address(ptr)
    }
}
