//! # Virtual Memory Support
//!
//! 32-bit non-PAE paging for the kernel: entry and table types, the frame
//! occupancy [`Bitmap`], the [`PageManager`] and page-fault decoding.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```
//!
//! ```text
//!  CR3 → PD ─┬─ PDE (PS=0) → PT → PTE → 4 KiB page
//!            └─ PDE (PS=1) ───────────→ 4 MiB page
//! ```
//!
//! | Level | Table | Entry | Description |
//! |:------|:------|:------|:------------|
//! | 1 | **PD** (Page Directory) | [**PDE**](DirectoryEntry) | 1024 entries, referenced by CR3. With `PS=1` (and CR4.PSE) an entry maps a 4 MiB page directly. |
//! | 2 | **PT** (Page Table) | [**PTE**](PageEntry) | 1024 entries, each mapping a 4 KiB page. |
//!
//! The kernel itself runs on 4 MiB pages set up by the boot code; the
//! [`PageManager`] adds an identity map of all RAM in 4 KiB pages.
//!
//! ## Seams
//!
//! - [`Mmu`]: CR0/CR2/CR3/CR4 and `invlpg`.
//! - [`TableAlloc`]: zeroed, aligned memory for tables and directories.
//! - [`PhysMapper`] / [`VirtMapper`]: turning addresses into pointers.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod bitmap;
mod entry;
mod fault;
mod mmu;
pub mod paging;
mod table;

pub use crate::bitmap::{Bitmap, words_for};
pub use crate::entry::{DirectoryEntry, PageEntry};
pub use crate::fault::{PageFaultError, PageFaultHandler};
pub use crate::mmu::{Mmu, X86Mmu};
pub use crate::paging::{PageManager, PagingState};
pub use crate::table::{PageDirectory, PageDirectoryEntries, PageTable};
use core::ptr::NonNull;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Errors raised by the [`PageManager`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    #[error("no free 4 KiB frame left")]
    OutOfFrames,
    #[error("could not allocate memory for a paging structure")]
    TableAllocation,
    #[error("the page table manager is not initialized")]
    NotInitialized,
}

/// Source of memory for paging structures.
///
/// All returned memory must be zeroed, stay valid forever and be reachable
/// at the returned pointer. The physical addresses are what ends up in
/// directory entries and CR3.
pub trait TableAlloc {
    /// One 4 KiB aligned [`PageTable`].
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysicalAddress)>;

    /// One [`PageDirectory`]; its first 4 KiB are the hardware directory.
    fn alloc_directory(&mut self) -> Option<(NonNull<PageDirectory>, PhysicalAddress)>;

    /// `words` zeroed words for the frame bitmap.
    fn alloc_bitmap(&mut self, words: usize) -> Option<&'static mut [u32]>;
}

impl<T: TableAlloc + ?Sized> TableAlloc for &mut T {
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysicalAddress)> {
        (**self).alloc_table()
    }

    fn alloc_directory(&mut self) -> Option<(NonNull<PageDirectory>, PhysicalAddress)> {
        (**self).alloc_directory()
    }

    fn alloc_bitmap(&mut self, words: usize) -> Option<&'static mut [u32]> {
        (**self).alloc_bitmap(words)
    }
}

/// Converts physical addresses to usable references in the current address
/// space.
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Converts between virtual addresses and pointers.
///
/// On the kernel this is the identity; host tests redirect virtual
/// addresses into a buffer that stands in for the mapped window.
pub trait VirtMapper {
    /// A pointer through which `va` can be accessed.
    fn to_ptr<T>(&self, va: VirtualAddress) -> *mut T;

    /// The virtual address a pointer returned by [`to_ptr`](Self::to_ptr) stands for.
    fn to_virt<T>(&self, ptr: *const T) -> VirtualAddress;
}

/// Memory the boot code mapped at [`KERNEL_VIRTUAL_BASE`](info::KERNEL_VIRTUAL_BASE).
///
/// Physical addresses in the two reserved blocks are reachable at a fixed
/// offset; all other virtual addresses are used as they are.
#[derive(Debug, Default, Copy, Clone)]
pub struct KernelWindow;

impl PhysMapper for KernelWindow {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = VirtualAddress::new(info::low_phys_to_virt(pa.as_u32()));
        unsafe { &mut *va.as_ptr::<T>() }
    }
}

impl VirtMapper for KernelWindow {
    #[inline(always)]
    fn to_ptr<T>(&self, va: VirtualAddress) -> *mut T {
        va.as_ptr()
    }

    #[inline(always)]
    fn to_virt<T>(&self, ptr: *const T) -> VirtualAddress {
        VirtualAddress::from_ptr(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_window_is_identity_for_virtual_addresses() {
        let va = VirtualAddress::new(0xD000_0000);
        let p: *mut u8 = KernelWindow.to_ptr(va);
        assert_eq!(KernelWindow.to_virt(p), va);
    }
}
