//! # Kernel Heap
//!
//! [`KernelHeap`] is the allocation API the rest of the kernel uses. It
//! serves requests from a [`Heap`] and, when nothing fits, asks its
//! [`BlockSource`] for exactly one more superblock and retries once.
//!
//! Requests larger than a freshly granted block can hold after its header
//! and tag map can never be served and are rejected up front, before any
//! block is taken from the source.
//!
//! ## Global allocator
//!
//! [`LockedHeap`] wraps a [`KernelHeap`] in an [`IrqLock`] and implements
//! [`GlobalAlloc`], so `alloc` collections work once the heap is initialized:
//!
//! ```ignore
//! #[global_allocator]
//! static HEAP: LockedHeap<BlockAllocator<X86Mmu, KernelWindow>> = LockedHeap::new();
//! ```

use crate::heap::{Heap, HeapStats};
use crate::{BlockAllocError, BlockSource};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use kernel_info::memory::{BLOCK_SIZE, FRAME_SIZE, HEAP_BLOCK_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::IrqLock;
use kernel_vmem::{PageDirectory, PageTable, TableAlloc};

/// Alignment every heap allocation has without asking for it.
const NATURAL_ALIGN: usize = HEAP_BLOCK_SIZE as usize;

/// Payload of an empty superblock over one block.
const BLOCK_CAPACITY: usize = Heap::superblock_capacity(BLOCK_SIZE as usize, NATURAL_ALIGN);

/// Largest request at `align` that an empty superblock is sure to serve.
const fn size_limit(align: usize) -> usize {
    BLOCK_CAPACITY.saturating_sub(align.saturating_sub(NATURAL_ALIGN))
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("allocation of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("out of heap memory allocating {size} bytes")]
    OutOfMemory { size: usize },
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("could not grow the heap: {0}")]
    Block(#[from] BlockAllocError),
}

/// The kernel heap over a source of 4 MiB blocks.
pub struct KernelHeap<S> {
    heap: Heap,
    source: S,
}

impl<S: BlockSource> KernelHeap<S> {
    pub const fn new(source: S) -> Self {
        Self {
            heap: Heap::new(),
            source,
        }
    }

    /// Registers the first superblock.
    ///
    /// # Errors
    /// [`HeapError::Block`] if the source has no block to give.
    pub fn init(&mut self) -> Result<(), HeapError> {
        if self.heap.stats().superblocks > 0 {
            log::warn!("kernel heap already initialized");
            return Ok(());
        }
        self.more_memory()?;
        log::info!("kernel heap initialized");
        Ok(())
    }

    fn more_memory(&mut self) -> Result<(), HeapError> {
        let block = self.source.grant_block()?;
        // SAFETY: granted blocks are mapped, 4 KiB aligned and ours forever.
        unsafe {
            self.heap
                .add_superblock(block, BLOCK_SIZE as usize, HEAP_BLOCK_SIZE as usize);
        }
        log::debug!("kernel heap grew to {} superblocks", self.heap.stats().superblocks);
        Ok(())
    }

    fn alloc_or_grow(
        &mut self,
        size: usize,
        align: usize,
        alloc: impl Fn(&mut Heap) -> Option<NonNull<u8>>,
    ) -> Result<NonNull<u8>, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        let limit = size_limit(align);
        if size > limit {
            return Err(HeapError::TooLarge { size, limit });
        }

        if let Some(ptr) = alloc(&mut self.heap) {
            return Ok(ptr);
        }

        self.more_memory()?;
        alloc(&mut self.heap).ok_or(HeapError::OutOfMemory { size })
    }

    /// Allocates `size` bytes, growing the heap by one block if needed.
    ///
    /// The memory is not zeroed.
    ///
    /// # Errors
    /// See [`HeapError`].
    pub fn try_kmalloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.alloc_or_grow(size, NATURAL_ALIGN, |heap| heap.alloc(size))
    }

    /// Like [`try_kmalloc`](Self::try_kmalloc), but every failure is fatal.
    pub fn kmalloc(&mut self, size: usize) -> NonNull<u8> {
        match self.try_kmalloc(size) {
            Ok(ptr) => ptr,
            Err(e) => {
                log::error!("kmalloc({size}) failed: {e}");
                panic!("kmalloc: {e}");
            }
        }
    }

    /// [`kmalloc`](Self::kmalloc) followed by zeroing.
    pub fn kcalloc(&mut self, size: usize) -> NonNull<u8> {
        let ptr = self.kmalloc(size);
        // SAFETY: `size` bytes were just allocated.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        ptr
    }

    /// Allocates `size` bytes at a multiple of `align`.
    ///
    /// # Errors
    /// See [`HeapError`].
    pub fn try_kmalloc_aligned(
        &mut self,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        if align <= NATURAL_ALIGN {
            return self.try_kmalloc(size);
        }
        self.alloc_or_grow(size, align, |heap| heap.alloc_aligned(size, align))
    }

    /// Like [`try_kmalloc_aligned`](Self::try_kmalloc_aligned), but every failure is fatal.
    pub fn kmalloc_aligned(&mut self, size: usize, align: usize) -> NonNull<u8> {
        match self.try_kmalloc_aligned(size, align) {
            Ok(ptr) => ptr,
            Err(e) => {
                log::error!("kmalloc_aligned({size}, {align}) failed: {e}");
                panic!("kmalloc_aligned: {e}");
            }
        }
    }

    /// Zeroed, page-aligned memory.
    pub fn kcalloc_aligned(&mut self, size: usize) -> NonNull<u8> {
        let ptr = self.kmalloc_aligned(size, FRAME_SIZE as usize);
        // SAFETY: `size` bytes were just allocated.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        ptr
    }

    /// Zeroed, page-aligned memory along with its physical address.
    ///
    /// # Panics
    /// If the allocation fails or the memory is not backed by a block the
    /// source can translate.
    pub fn kcalloc_aligned_phys(&mut self, size: usize) -> (NonNull<u8>, PhysicalAddress) {
        let ptr = self.kcalloc_aligned(size);
        match self.source.physical_address(ptr.as_ptr()) {
            Some(pa) => (ptr, pa),
            None => {
                log::error!("no physical address for heap memory at {:p}", ptr.as_ptr());
                panic!("kcalloc_aligned_phys: untranslatable heap address");
            }
        }
    }

    /// Releases memory from any of the allocation functions.
    ///
    /// A null pointer is ignored. A pointer the heap does not own is
    /// reported and ignored.
    pub fn kfree(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        if !self.heap.free(ptr) {
            log::warn!("kfree: {:p} is not a live heap allocation", ptr.as_ptr());
        }
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.heap.owns(ptr)
    }

    pub const fn source(&self) -> &S {
        &self.source
    }

    pub const fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: BlockSource> TableAlloc for KernelHeap<S> {
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysicalAddress)> {
        let (ptr, pa) = self.kcalloc_aligned_phys(size_of::<PageTable>());
        Some((ptr.cast(), pa))
    }

    fn alloc_directory(&mut self) -> Option<(NonNull<PageDirectory>, PhysicalAddress)> {
        let (ptr, pa) = self.kcalloc_aligned_phys(size_of::<PageDirectory>());
        Some((ptr.cast(), pa))
    }

    fn alloc_bitmap(&mut self, words: usize) -> Option<&'static mut [u32]> {
        let ptr = self.kcalloc(words * size_of::<u32>());
        // SAFETY: zeroed, suitably aligned and never freed.
        Some(unsafe { core::slice::from_raw_parts_mut(ptr.cast::<u32>().as_ptr(), words) })
    }
}

/// A [`KernelHeap`] that is created empty and filled in during bring-up.
pub struct LockedHeap<S>(IrqLock<Option<KernelHeap<S>>>);

impl<S> Default for LockedHeap<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> LockedHeap<S> {
    pub const fn new() -> Self {
        Self(IrqLock::new(None))
    }
}

impl<S: BlockSource> LockedHeap<S> {
    /// Installs the heap over `source` and registers its first superblock.
    ///
    /// # Errors
    /// See [`KernelHeap::init`].
    pub fn init(&self, source: S) -> Result<(), HeapError> {
        self.0.with_lock(|slot| {
            let heap = slot.insert(KernelHeap::new(source));
            heap.init()
        })
    }

    /// Runs `f` with the heap, if it has been installed.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut KernelHeap<S>) -> R) -> Option<R> {
        self.0.with_lock(|slot| slot.as_mut().map(f))
    }
}

unsafe impl<S: BlockSource> GlobalAlloc for LockedHeap<S> {
    /// Serves `layout` from the kernel heap.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. Returns null before [`init`](Self::init)
    /// and on exhaustion.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.with_heap(|heap| heap.try_kmalloc_aligned(layout.size(), layout.align()))
            .and_then(Result::ok)
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// # Safety
    /// The `GlobalAlloc` contract applies.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.with_heap(|heap| heap.kfree(ptr));
    }
}

impl<S: BlockSource> TableAlloc for &LockedHeap<S> {
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysicalAddress)> {
        self.with_heap(|heap| heap.alloc_table()).flatten()
    }

    fn alloc_directory(&mut self) -> Option<(NonNull<PageDirectory>, PhysicalAddress)> {
        self.with_heap(|heap| heap.alloc_directory()).flatten()
    }

    fn alloc_bitmap(&mut self, words: usize) -> Option<&'static mut [u32]> {
        self.with_heap(|heap| heap.alloc_bitmap(words)).flatten()
    }
}
