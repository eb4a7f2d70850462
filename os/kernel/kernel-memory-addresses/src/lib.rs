//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for 32-bit memory addresses and page frames used
//! in paging and memory management code.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] / [`MemoryPage<S>`] | Untyped address and page base. |
//! | [`MemoryAddressOffset<S>`] | A byte offset within a page of size `S`. |
//! | [`VirtualAddress`] | Translated by the page tables; splits into directory and table slots. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | RAM addresses and frames. |
//!
//! 32-bit non-PAE paging knows two page sizes:
//!
//! - [`Size4K`]: 4 KiB pages mapped through a page table
//! - [`Size4M`]: 4 MiB large pages mapped directly by a directory entry
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! // A 4 MiB block number is the frame index of a large page.
//! let pa = PhysicalAddress::new(0x0080_0000);
//! assert_eq!(pa.page::<Size4M>().index(), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod page_size;
mod physical_address;
mod virtual_address;

pub use memory_address::{MemoryAddress, MemoryAddressOffset, MemoryPage};
pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::{PhysicalAddress, PhysicalPage};
pub use virtual_address::{ENTRIES_PER_TABLE, VirtualAddress};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_and_offset_rebuild_the_address() {
        let a = PhysicalAddress::new(0x1234_5678);
        let frame = a.page::<Size4K>();
        assert_eq!(frame.base().as_u32(), 0x1234_5000);
        assert_eq!(a.offset::<Size4K>().as_u32(), 0x678);
        assert_eq!(frame.join(a.offset()), a);

        let large = a.page::<Size4M>();
        assert_eq!(large.base().as_u32(), 0x1200_0000);
        assert_eq!(large.join(a.offset()), a);
    }

    #[test]
    fn directory_and_table_indices() {
        let va = VirtualAddress::new(0xC000_0000);
        assert_eq!(va.directory_index(), 768);
        assert_eq!(va.table_index(), 0);

        let va = VirtualAddress::new(0xFFFF_F000);
        assert_eq!(va.directory_index(), 1023);
        assert_eq!(va.table_index(), 1023);

        assert_eq!(VirtualAddress::from_directory_index(832).as_u32(), 0xD000_0000);
    }

    #[test]
    fn frame_index_bounds() {
        assert_eq!(PhysicalPage::<Size4M>::from_index(1023).map(|p| p.base().as_u32()), Some(0xFFC0_0000));
        assert!(PhysicalPage::<Size4M>::from_index(1024).is_none());
        assert_eq!(PhysicalPage::<Size4K>::from_index(0).map(PhysicalPage::index), Some(0));
    }

    #[test]
    fn alignment() {
        assert!(PhysicalAddress::new(0x0040_0000).is_aligned::<Size4M>());
        assert!(!VirtualAddress::new(0x0040_1000).is_aligned::<Size4M>());
        assert!(VirtualAddress::new(0x0040_1000).is_aligned::<Size4K>());
        assert_eq!(VirtualAddress::new(0x12345).offset::<Size4K>().as_u32(), 0x345);
    }

    #[test]
    fn display_is_hex() {
        extern crate std;
        use std::format;
        assert_eq!(format!("{}", PhysicalAddress::new(0x1000)), "0x00001000");
        assert_eq!(format!("{:?}", VirtualAddress::new(0xC000_0000)), "VA(0xC0000000)");
    }
}
