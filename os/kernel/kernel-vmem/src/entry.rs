//! # Page Table and Page Directory Entries
//!
//! Both levels of 32-bit non-PAE paging use a 32-bit entry whose upper 20
//! bits hold a frame number and whose lower 12 bits hold flags. The layouts
//! differ only in bit 7: in a page table entry it selects the PAT, in a
//! directory entry it is `PS` and turns the entry into a 4 MiB leaf.
//!
//! ```text
//! 31               12 11  9 8 7 6 5 4 3 2 1 0
//! +------------------+-----+-+-+-+-+-+-+-+-+-+
//! |   frame number   | AVL |G|S|D|A|C|W|U|R|P|
//! +------------------+-----+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A 4 MiB directory entry keeps bits 12..22 zero (no PSE-36), so the frame
//! number field still reads back the physical base unchanged.
//!
//! "Unmapped" is always the `present` bit. Frame number 0 is a real frame.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, Size4M};

/// A page table entry mapping one 4 KiB page.
#[doc(alias = "PTE")]
#[bitfield(u32)]
pub struct PageEntry {
    /// Bit 0: the mapping is valid.
    pub present: bool,
    /// Bit 1: writes are allowed.
    pub writable: bool,
    /// Bit 2: ring 3 may access the page.
    pub user: bool,
    /// Bit 3: write-through caching.
    pub write_through: bool,
    /// Bit 4: caching disabled.
    pub cache_disabled: bool,
    /// Bit 5: set by the CPU on access.
    pub accessed: bool,
    /// Bit 6: set by the CPU on write.
    pub dirty: bool,
    /// Bit 7: page attribute table index.
    pub pat: bool,
    /// Bit 8: survives CR3 reloads when CR4.PGE is set.
    pub global: bool,
    /// Bits 9..12: free for the OS.
    #[bits(3)]
    pub available: u8,
    /// Bits 12..32: physical frame number.
    #[bits(20)]
    frame_bits: u32,
}

impl PageEntry {
    /// Frame number stored in the entry, regardless of `present`.
    #[inline]
    #[must_use]
    pub const fn frame_index(self) -> u32 {
        self.frame_bits()
    }

    /// Returns the mapped frame if the entry is present.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> Option<PhysicalPage<Size4K>> {
        if self.present() {
            PhysicalPage::from_index(self.frame_bits())
        } else {
            None
        }
    }

    /// Points the entry at `frame` without touching the flags.
    #[inline]
    pub fn set_frame(&mut self, frame: PhysicalPage<Size4K>) {
        self.set_frame_bits(frame.index());
    }

    /// A present 4 KiB mapping of `frame`.
    #[inline]
    #[must_use]
    pub const fn mapping(frame: PhysicalPage<Size4K>, supervisor: bool, writable: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_user(!supervisor)
            .with_frame_bits(frame.index())
    }

    /// Resets the entry to the unmapped state.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

/// A page directory entry: either a reference to a page table or, with
/// `PS=1`, a 4 MiB leaf mapping.
#[doc(alias = "PDE")]
#[bitfield(u32)]
pub struct DirectoryEntry {
    /// Bit 0: the entry is valid.
    pub present: bool,
    /// Bit 1: writes are allowed below this entry.
    pub writable: bool,
    /// Bit 2: ring 3 may access addresses below this entry.
    pub user: bool,
    /// Bit 3: write-through caching.
    pub write_through: bool,
    /// Bit 4: caching disabled.
    pub cache_disabled: bool,
    /// Bit 5: set by the CPU on access.
    pub accessed: bool,
    /// Bit 6: set by the CPU on write (4 MiB leaves only).
    pub dirty: bool,
    /// Bit 7: `PS`, the entry maps a 4 MiB page (requires CR4.PSE).
    pub large_page: bool,
    /// Bit 8: global (4 MiB leaves only).
    pub global: bool,
    /// Bits 9..12: free for the OS.
    #[bits(3)]
    pub available: u8,
    /// Bits 12..32: page table base or large frame base, shifted right by 12.
    #[bits(20)]
    address_bits: u32,
}

impl DirectoryEntry {
    /// An entry referencing the page table at `table`.
    ///
    /// Tables are installed present, writable and user accessible; the page
    /// table entries decide the effective permissions.
    #[inline]
    #[must_use]
    pub const fn table(table: PhysicalAddress) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_address_bits(table.as_u32() >> 12)
    }

    /// A present, writable, supervisor-only 4 MiB mapping of `frame`.
    #[inline]
    #[must_use]
    pub const fn large(frame: PhysicalPage<Size4M>) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_large_page(true)
            .with_address_bits(frame.base().as_u32() >> 12)
    }

    /// Physical address of the referenced page table, if this is a present
    /// table entry.
    #[inline]
    #[must_use]
    pub const fn table_address(self) -> Option<PhysicalAddress> {
        if self.present() && !self.large_page() {
            Some(PhysicalAddress::new(self.address_bits() << 12))
        } else {
            None
        }
    }

    /// The mapped 4 MiB frame, if this is a present large page.
    #[inline]
    #[must_use]
    pub const fn large_frame(self) -> Option<PhysicalPage<Size4M>> {
        if self.present() && self.large_page() {
            Some(PhysicalPage::from_addr(PhysicalAddress::new(
                self.address_bits() << 12,
            )))
        } else {
            None
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_entry_layout() {
        let frame = PhysicalPage::<Size4K>::from_index(0x12345).unwrap();
        let e = PageEntry::mapping(frame, true, true);
        assert_eq!(e.into_bits(), 0x1234_5003);
        assert_eq!(e.frame(), Some(frame));

        let e = PageEntry::mapping(frame, false, false);
        assert_eq!(e.into_bits(), 0x1234_5005);
    }

    #[test]
    fn frame_zero_is_a_mapping() {
        let zero = PhysicalPage::<Size4K>::from_index(0).unwrap();
        let e = PageEntry::mapping(zero, true, false);
        assert!(e.present());
        assert_eq!(e.frame(), Some(zero));
        assert_eq!(PageEntry::new().frame(), None);
    }

    #[test]
    fn large_directory_entry_sets_ps() {
        let frame = PhysicalAddress::new(0x0080_0000).page::<Size4M>();
        let e = DirectoryEntry::large(frame);
        assert_eq!(e.into_bits(), 0x0080_0083);
        assert_eq!(e.large_frame(), Some(frame));
        assert_eq!(e.table_address(), None);
    }

    #[test]
    fn table_directory_entry() {
        let e = DirectoryEntry::table(PhysicalAddress::new(0x0040_3000));
        assert_eq!(e.into_bits(), 0x0040_3007);
        assert_eq!(e.table_address(), Some(PhysicalAddress::new(0x0040_3000)));
        assert_eq!(e.large_frame(), None);
    }
}
