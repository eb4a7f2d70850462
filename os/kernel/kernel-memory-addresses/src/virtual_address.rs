use crate::{MemoryAddress, MemoryAddressOffset, PageSize};
use core::fmt;

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// An address as the paging unit sees it.
///
/// 32-bit non-PAE paging splits it into
/// - bits 22..32: the page directory slot ([`directory_index`](Self::directory_index)),
/// - bits 12..22: the page table slot ([`table_index`](Self::table_index)),
/// - bits 0..12: the byte offset within a 4 KiB page.
///
/// Under a 4 MiB large page the directory slot alone selects the frame and
/// the low 22 bits are the offset.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xC040_1234);
/// assert_eq!(va.directory_index(), 769);
/// assert_eq!(va.table_index(), 1);
/// assert_eq!(va.offset::<Size4K>().as_u32(), 0x234);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(MemoryAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    /// Address of a pointer.
    ///
    /// Lossless on the 32-bit target. Host builds keep the low 32 bits, which
    /// only round-trips for pointers made by [`as_ptr`](Self::as_ptr).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self::new(ptr.addr() as u32)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0.as_usize()
    }

    #[inline]
    #[must_use]
    pub const fn as_ptr<T>(self) -> *mut T {
        self.as_usize() as *mut T
    }

    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.as_u32() >> 22) as usize
    }

    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.as_u32() >> 12) & 0x3FF) as usize
    }

    /// The first address covered by directory slot `index`.
    #[inline]
    #[must_use]
    pub const fn from_directory_index(index: usize) -> Self {
        debug_assert!(index < ENTRIES_PER_TABLE);
        Self::new((index as u32) << 22)
    }

    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> MemoryAddressOffset<S> {
        self.0.offset::<S>()
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0.is_aligned::<S>()
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
