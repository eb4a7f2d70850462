//! # Page Tables and Page Directories
//!
//! - [`PageTable`]: 1024 [`PageEntry`] values, 4 KiB aligned, each mapping a 4 KiB page.
//! - [`PageDirectoryEntries`]: the hardware-visible directory, 1024 [`DirectoryEntry`] values.
//! - [`PageDirectory`]: the hardware directory plus the kernel's own pointers to
//!   the tables it references and the directory's physical address.
//!
//! The CPU only ever sees [`PageDirectoryEntries`]. Because it is the first
//! field of [`PageDirectory`], the physical address of a directory is the
//! value loaded into CR3.

use crate::entry::{DirectoryEntry, PageEntry};
use crate::{PagingError, TableAlloc};
use core::ptr::NonNull;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PhysicalAddress, Size4K, Size4M, VirtualAddress};

/// A page table: 1024 entries, 4 KiB aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRIES_PER_TABLE],
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl PageTable {
    /// A table with every entry unmapped.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntry::new(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        &mut self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageEntry> {
        self.entries.iter()
    }
}

/// The hardware page directory: 1024 entries, 4 KiB aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectoryEntries {
    entries: [DirectoryEntry; ENTRIES_PER_TABLE],
}

impl Default for PageDirectoryEntries {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl PageDirectoryEntries {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [DirectoryEntry::new(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> DirectoryEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: DirectoryEntry) {
        self.entries[index] = entry;
    }

    #[inline]
    pub const fn entry_mut(&mut self, index: usize) -> &mut DirectoryEntry {
        &mut self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter()
    }

    /// Resolves `va` if it falls into a 4 MiB large page.
    #[must_use]
    pub fn translate_large(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let frame = self.get(va.directory_index()).large_frame()?;
        Some(frame.join(va.offset::<Size4M>()))
    }
}

/// A page directory together with the kernel's view of its tables.
///
/// `tables[i]` is the virtual pointer to the table whose physical address
/// is stored in `entries[i]`. Slots mapped with 4 MiB pages have no table.
#[repr(C)]
pub struct PageDirectory {
    entries: PageDirectoryEntries,
    tables: [Option<NonNull<PageTable>>; ENTRIES_PER_TABLE],
    physical_addr: PhysicalAddress,
}

impl PageDirectory {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: PageDirectoryEntries::zeroed(),
            tables: [None; ENTRIES_PER_TABLE],
            physical_addr: PhysicalAddress::zero(),
        }
    }

    /// Physical address of the hardware directory, the CR3 value.
    #[inline]
    #[must_use]
    pub const fn physical_addr(&self) -> PhysicalAddress {
        self.physical_addr
    }

    #[inline]
    pub(crate) const fn set_physical_addr(&mut self, pa: PhysicalAddress) {
        self.physical_addr = pa;
    }

    #[inline]
    #[must_use]
    pub const fn entries(&self) -> &PageDirectoryEntries {
        &self.entries
    }

    #[inline]
    pub const fn entries_mut(&mut self) -> &mut PageDirectoryEntries {
        &mut self.entries
    }

    /// The table installed in directory slot `index`.
    #[inline]
    #[must_use]
    pub fn table(&self, index: usize) -> Option<&PageTable> {
        // SAFETY: installed tables are never freed and only reachable through this directory.
        self.tables[index].map(|t| unsafe { t.as_ref() })
    }

    /// Returns the page table entry for `addr`.
    ///
    /// When the covering table is missing it is allocated through `alloc`
    /// if `create` is set and `Ok(None)` is returned otherwise. A slot that
    /// holds a 4 MiB page has no page table entries and also yields `None`.
    ///
    /// # Errors
    /// [`PagingError::TableAllocation`] if a new table was needed but `alloc`
    /// could not provide one.
    pub fn get_page<A: TableAlloc + ?Sized>(
        &mut self,
        addr: VirtualAddress,
        create: bool,
        alloc: &mut A,
    ) -> Result<Option<&mut PageEntry>, PagingError> {
        let table_idx = addr.directory_index();
        let page_idx = addr.table_index();

        if self.tables[table_idx].is_none() {
            if !create || self.entries.get(table_idx).large_frame().is_some() {
                return Ok(None);
            }

            let (table, pa) = alloc.alloc_table().ok_or(PagingError::TableAllocation)?;
            log::trace!("page table for slot {table_idx} at {pa}");
            self.tables[table_idx] = Some(table);
            self.entries.set(table_idx, DirectoryEntry::table(pa));
        }

        Ok(self.tables[table_idx].map(|mut table| {
            // SAFETY: the table was handed out by a `TableAlloc` and is owned by this directory.
            unsafe { table.as_mut() }.entry_mut(page_idx)
        }))
    }

    /// Walks the directory and resolves `va` to a physical address.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if let Some(pa) = self.entries.translate_large(va) {
            return Some(pa);
        }

        let table = self.table(va.directory_index())?;
        let frame = table.get(va.table_index()).frame()?;
        Some(frame.join(va.offset::<Size4K>()))
    }

    /// Copies every present 4 MiB entry of `source` in slots `from..` into
    /// this directory, skipping slots that already hold a table.
    ///
    /// Returns the number of copied entries.
    pub fn inherit_large_pages(&mut self, source: &PageDirectoryEntries, from: usize) -> usize {
        let mut copied = 0;
        for slot in from..ENTRIES_PER_TABLE {
            let entry = source.get(slot);
            if entry.large_frame().is_none() {
                continue;
            }

            if self.tables[slot].is_some() {
                log::warn!("not inheriting large page in slot {slot}: slot already has a table");
                continue;
            }

            self.entries.set(slot, entry);
            copied += 1;
        }
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_page_sized_and_aligned() {
        assert_eq!(size_of::<PageTable>(), 4096);
        assert_eq!(align_of::<PageTable>(), 4096);
        assert_eq!(size_of::<PageDirectoryEntries>(), 4096);
        assert_eq!(core::mem::offset_of!(PageDirectory, entries), 0);
    }

    #[test]
    fn translate_large_page() {
        let mut pd = PageDirectoryEntries::zeroed();
        pd.set(832, DirectoryEntry::large(PhysicalAddress::new(0x0080_0000).page()));
        assert_eq!(
            pd.translate_large(VirtualAddress::new(0xD000_1234)),
            Some(PhysicalAddress::new(0x0080_1234))
        );
        assert_eq!(pd.translate_large(VirtualAddress::new(0xD040_0000)), None);
    }
}
