//! # Page Table Manager
//!
//! Owns the 4 KiB frame-occupancy bitmap and the kernel page directory.
//!
//! ```text
//!  Uninitialized ──page_init()──► Active (kernel directory)
//!                                    │  ▲
//!                 switch_directory() │  │ switch_directory()
//!                                    ▼  │
//!                               Active (other directory)
//! ```
//!
//! A page fault is fatal in every state; see [`PageFaultHandler`](crate::PageFaultHandler).

use crate::bitmap::{Bitmap, words_for};
use crate::entry::PageEntry;
use crate::table::{PageDirectory, PageDirectoryEntries};
use crate::{Mmu, PagingError, TableAlloc};
use core::ptr::NonNull;
use kernel_info::memory::{FRAME_SIZE, KERNEL_VIRTUAL_BASE, directory_slot};
use kernel_interrupts::{InterruptHandler, InterruptRegistry, vectors};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Where the manager is in its life cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PagingState {
    /// `page_init` has not run; paging is off.
    Uninitialized,
    /// Paging is on with the directory at `directory`.
    Active {
        directory: PhysicalAddress,
        /// Whether the active directory is the kernel directory.
        kernel: bool,
    },
}

/// Builds and maintains the paging structures.
///
/// `A` provides zeroed, aligned memory for tables, directories and the frame
/// bitmap. `M` is the paging hardware.
pub struct PageManager<A, M> {
    alloc: A,
    mmu: M,
    frames: Option<Bitmap<&'static mut [u32]>>,
    kernel: Option<NonNull<PageDirectory>>,
    current: Option<NonNull<PageDirectory>>,
}

// SAFETY: the directories are only reached through the manager, which callers
// keep behind a lock.
unsafe impl<A: Send, M: Send> Send for PageManager<A, M> {}

impl<A: TableAlloc, M: Mmu> PageManager<A, M> {
    /// A manager in the [`PagingState::Uninitialized`] state.
    pub const fn new(alloc: A, mmu: M) -> Self {
        Self {
            alloc,
            mmu,
            frames: None,
            kernel: None,
            current: None,
        }
    }

    /// Builds the kernel page directory and turns paging on.
    ///
    /// - sizes the frame bitmap for `memory_size` bytes of RAM,
    /// - identity maps every frame below `memory_size` (supervisor, writable),
    ///   stopping at [`KERNEL_VIRTUAL_BASE`] so kernel space stays free,
    /// - copies the 4 MiB kernel-space mappings of `bootstrap` so the running
    ///   kernel stays mapped,
    /// - installs `fault_handler` for the page-fault vector,
    /// - loads the directory and enables paging.
    ///
    /// # Errors
    /// [`PagingError::TableAllocation`] if memory for the bitmap, the
    /// directory or a table could not be obtained, [`PagingError::OutOfFrames`]
    /// if the identity map ran out of frames.
    ///
    /// # Safety
    /// `bootstrap` must describe the mappings the kernel currently runs on,
    /// and every page `alloc` hands out must be reachable through them.
    pub unsafe fn page_init<R: InterruptRegistry + ?Sized>(
        &mut self,
        memory_size: u32,
        registry: &mut R,
        fault_handler: &'static dyn InterruptHandler,
        bootstrap: Option<&PageDirectoryEntries>,
    ) -> Result<(), PagingError> {
        if self.frames.is_some() {
            log::warn!("page_init called twice, ignoring");
            return Ok(());
        }

        let mapped = memory_size.min(KERNEL_VIRTUAL_BASE);
        if mapped < memory_size {
            log::warn!(
                "identity map stops at {:#x}, {} MiB of RAM above it stay unmapped",
                mapped,
                (memory_size - mapped) / (1024 * 1024)
            );
        }
        let frame_count = (mapped / FRAME_SIZE) as usize;
        let words = self
            .alloc
            .alloc_bitmap(words_for(frame_count))
            .ok_or(PagingError::TableAllocation)?;
        self.frames = Some(Bitmap::new(words, frame_count));

        let mut kernel = self.create_directory()?;
        // SAFETY: freshly allocated, nothing else references it yet.
        let directory = unsafe { kernel.as_mut() };

        for frame in 0..frame_count {
            #[allow(clippy::cast_possible_truncation)]
            let addr = VirtualAddress::new(frame as u32 * FRAME_SIZE);
            let entry = directory
                .get_page(addr, true, &mut self.alloc)?
                .ok_or(PagingError::TableAllocation)?;
            self.page_alloc(entry, true, true)?;
            debug_assert_eq!(entry.frame_index() as usize, frame);
        }
        log::debug!("identity mapped {frame_count} frames");

        if let Some(bootstrap) = bootstrap {
            let copied =
                directory.inherit_large_pages(bootstrap, directory_slot(KERNEL_VIRTUAL_BASE));
            log::debug!("inherited {copied} kernel-space large pages");
        }

        registry.register_interrupt_handler(vectors::PAGE_FAULT, fault_handler);

        let pa = directory.physical_addr();
        self.kernel = Some(kernel);
        unsafe { self.switch_directory(kernel) };
        log::info!("paging enabled, kernel directory at {pa}");
        Ok(())
    }

    /// Backs `entry` with the first free frame.
    ///
    /// A present entry is left untouched.
    ///
    /// # Errors
    /// [`PagingError::NotInitialized`] before [`page_init`](Self::page_init),
    /// [`PagingError::OutOfFrames`] when every frame is in use.
    pub fn page_alloc(
        &mut self,
        entry: &mut PageEntry,
        supervisor: bool,
        writable: bool,
    ) -> Result<(), PagingError> {
        let frames = self.frames.as_mut().ok_or(PagingError::NotInitialized)?;
        if entry.present() {
            return Ok(());
        }

        let index = frames.first_free().ok_or(PagingError::OutOfFrames)?;
        #[allow(clippy::cast_possible_truncation)]
        let frame =
            PhysicalPage::<Size4K>::from_index(index as u32).ok_or(PagingError::OutOfFrames)?;
        frames.set(index);
        *entry = PageEntry::mapping(frame, supervisor, writable);
        Ok(())
    }

    /// Releases the frame behind `entry` and unmaps it.
    ///
    /// An entry that is not present is left alone. The caller is
    /// responsible for invalidating the translation if the entry is live.
    ///
    /// # Errors
    /// [`PagingError::NotInitialized`] before [`page_init`](Self::page_init).
    pub fn page_free(&mut self, entry: &mut PageEntry) -> Result<(), PagingError> {
        let frames = self.frames.as_mut().ok_or(PagingError::NotInitialized)?;
        let Some(frame) = entry.frame() else {
            log::warn!("page_free on an unmapped entry");
            return Ok(());
        };

        frames.clear(frame.index() as usize);
        entry.clear();
        Ok(())
    }

    /// Returns the entry mapping `address` in `directory`, allocating the
    /// page table when `create` is set.
    ///
    /// # Errors
    /// [`PagingError::TableAllocation`] if a table was needed and could not be allocated.
    pub fn get_page<'d>(
        &mut self,
        address: VirtualAddress,
        create: bool,
        directory: &'d mut PageDirectory,
    ) -> Result<Option<&'d mut PageEntry>, PagingError> {
        directory.get_page(address, create, &mut self.alloc)
    }

    /// Allocates an empty directory that shares the kernel's 4 MiB
    /// kernel-space mappings, if a kernel directory exists.
    ///
    /// # Errors
    /// [`PagingError::TableAllocation`] if no memory was available.
    pub fn create_directory(&mut self) -> Result<NonNull<PageDirectory>, PagingError> {
        let (mut ptr, pa) = self
            .alloc
            .alloc_directory()
            .ok_or(PagingError::TableAllocation)?;
        // SAFETY: the allocator returned zeroed memory sized and aligned for a directory.
        let directory = unsafe { ptr.as_mut() };
        directory.set_physical_addr(pa);

        if let Some(kernel) = self.kernel {
            // SAFETY: the kernel directory is never freed.
            let kernel = unsafe { kernel.as_ref() };
            directory.inherit_large_pages(kernel.entries(), directory_slot(KERNEL_VIRTUAL_BASE));
        }

        log::debug!("page directory at {pa}");
        Ok(ptr)
    }

    /// Loads `directory` into the MMU and makes sure paging is enabled.
    ///
    /// # Safety
    /// `directory` must come from this manager and map the running kernel.
    pub unsafe fn switch_directory(&mut self, directory: NonNull<PageDirectory>) {
        // SAFETY: directories handed out by this manager stay valid forever.
        let pa = unsafe { directory.as_ref() }.physical_addr();
        self.current = Some(directory);
        unsafe {
            self.mmu.load_page_directory(pa);
            self.mmu.enable_paging();
        }
    }

    #[must_use]
    pub fn state(&self) -> PagingState {
        match self.current {
            None => PagingState::Uninitialized,
            Some(current) => PagingState::Active {
                // SAFETY: see `switch_directory`.
                directory: unsafe { current.as_ref() }.physical_addr(),
                kernel: self.kernel == Some(current),
            },
        }
    }

    /// The directory built by [`page_init`](Self::page_init).
    #[must_use]
    pub const fn kernel_directory(&self) -> Option<NonNull<PageDirectory>> {
        self.kernel
    }

    /// Number of frames currently in use.
    #[must_use]
    pub fn used_frames(&self) -> usize {
        self.frames.as_ref().map_or(0, Bitmap::count_used)
    }

    /// Number of frames under management.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.as_ref().map_or(0, Bitmap::len)
    }

    pub const fn mmu(&self) -> &M {
        &self.mmu
    }
}
