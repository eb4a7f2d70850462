//! # Block Allocator
//!
//! Hands out physical memory in 4 MiB blocks, each mapped with a single
//! large page into the first free directory slot at or after the block
//! window. A second, smaller bitmap tracks the 4 KiB chunks of the
//! directory pool.
//!
//! Nothing is ever returned to this allocator; the heap and the scheduler
//! keep their blocks for the lifetime of the kernel.

use crate::BlockSource;
use core::ptr::{self, NonNull};
use kernel_info::boot::MemoryRange;
use kernel_info::memory::{
    BLOCK_COUNT, BLOCK_SIZE, BLOCK_WINDOW_BASE, DIRECTORY_POOL_CHUNKS, ENTRIES_PER_TABLE,
    FRAME_SIZE, RESERVED_BLOCKS, directory_slot,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4M, VirtualAddress};
use kernel_vmem::{Bitmap, DirectoryEntry, Mmu, PageDirectoryEntries, VirtMapper};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BlockAllocError {
    #[error("no free 4 MiB block left")]
    OutOfBlocks,
    #[error("no free page directory slot to map a block")]
    NoVirtualSlot,
    #[error("the page directory pool is exhausted")]
    OutOfDirectories,
}

/// 4 MiB block allocator over the active page directory.
pub struct BlockAllocator<M, V> {
    directory: NonNull<PageDirectoryEntries>,
    blocks: Bitmap<[u32; BLOCK_COUNT / 32]>,
    directories: Bitmap<[u32; DIRECTORY_POOL_CHUNKS / 32]>,
    pool: VirtualAddress,
    next_slot: usize,
    mmu: M,
    mapper: V,
}

// SAFETY: the directory is only touched through `&mut self`.
unsafe impl<M: Send, V: Send> Send for BlockAllocator<M, V> {}

impl<M: Mmu, V: VirtMapper> BlockAllocator<M, V> {
    /// Sets up the allocator over `directory`, which must be the directory
    /// the processor currently uses.
    ///
    /// Only blocks lying entirely inside `range` are handed out; the kernel
    /// image block and the directory pool block are always reserved.
    ///
    /// # Safety
    /// `directory` must stay valid and writable for the allocator's lifetime,
    /// and `pool` must address the mapped directory pool.
    pub unsafe fn new(
        directory: NonNull<PageDirectoryEntries>,
        range: MemoryRange,
        pool: VirtualAddress,
        mmu: M,
        mapper: V,
    ) -> Self {
        let mut blocks = Bitmap::new([0; BLOCK_COUNT / 32], BLOCK_COUNT);

        let first = range.start.as_u32().div_ceil(BLOCK_SIZE) as usize;
        let last = (range.end.as_u32() / BLOCK_SIZE) as usize;
        for block in 0..BLOCK_COUNT {
            if block < RESERVED_BLOCKS || block < first || block >= last {
                blocks.set(block);
            }
        }

        let allocator = Self {
            directory,
            blocks,
            directories: Bitmap::new([0; DIRECTORY_POOL_CHUNKS / 32], DIRECTORY_POOL_CHUNKS),
            pool,
            next_slot: directory_slot(BLOCK_WINDOW_BASE),
            mmu,
            mapper,
        };

        log::debug!(
            "block allocator: {} of {BLOCK_COUNT} blocks free in {}..{}",
            BLOCK_COUNT - allocator.used_blocks(),
            range.start,
            range.end
        );
        allocator
    }

    fn directory(&mut self) -> &mut PageDirectoryEntries {
        // SAFETY: see `new`.
        unsafe { self.directory.as_mut() }
    }

    /// Switches to a new page directory after the paging manager took over.
    ///
    /// # Safety
    /// Same requirements as for [`new`](Self::new).
    pub unsafe fn retarget(&mut self, directory: NonNull<PageDirectoryEntries>) {
        self.directory = directory;
        log::debug!("block allocator retargeted");
    }

    fn find_free_slot(&mut self) -> Option<usize> {
        let start = self.next_slot;
        let directory = self.directory();
        (0..ENTRIES_PER_TABLE)
            .map(|k| (start + k) % ENTRIES_PER_TABLE)
            .find(|&slot| !directory.get(slot).present())
    }

    /// Allocates, maps and zero-fills one block.
    ///
    /// # Errors
    /// [`BlockAllocError::NoVirtualSlot`] when every directory slot is taken,
    /// [`BlockAllocError::OutOfBlocks`] when physical memory is exhausted.
    pub fn try_alloc_block(&mut self) -> Result<VirtualAddress, BlockAllocError> {
        let slot = self.find_free_slot().ok_or(BlockAllocError::NoVirtualSlot)?;
        let index = self.blocks.first_free().ok_or(BlockAllocError::OutOfBlocks)?;
        #[allow(clippy::cast_possible_truncation)]
        let frame =
            PhysicalPage::<Size4M>::from_index(index as u32).ok_or(BlockAllocError::OutOfBlocks)?;

        self.blocks.set(index);
        self.directory().set(slot, DirectoryEntry::large(frame));
        let va = VirtualAddress::from_directory_index(slot);
        self.mmu.invalidate_page(va);
        self.next_slot = (slot + 1) % ENTRIES_PER_TABLE;

        // SAFETY: the block was just mapped and belongs to nobody else.
        unsafe {
            ptr::write_bytes(self.mapper.to_ptr::<u8>(va), 0, BLOCK_SIZE as usize);
        }

        log::trace!("block #{index} ({}) mapped at {va}", frame.base());
        Ok(va)
    }

    /// Like [`try_alloc_block`](Self::try_alloc_block), but exhaustion is fatal.
    pub fn alloc_block(&mut self) -> VirtualAddress {
        match self.try_alloc_block() {
            Ok(va) => va,
            Err(e) => {
                log::error!("alloc_block failed: {e}");
                panic!("alloc_block: {e}");
            }
        }
    }

    /// Allocates and zero-fills one 4 KiB chunk of the directory pool.
    ///
    /// # Errors
    /// [`BlockAllocError::OutOfDirectories`] when the pool is exhausted.
    pub fn try_alloc_page_directory(&mut self) -> Result<VirtualAddress, BlockAllocError> {
        let index = self
            .directories
            .first_free()
            .ok_or(BlockAllocError::OutOfDirectories)?;
        self.directories.set(index);

        #[allow(clippy::cast_possible_truncation)]
        let va = VirtualAddress::new(self.pool.as_u32() + index as u32 * FRAME_SIZE);
        // SAFETY: the chunk lies in the reserved pool block and was free.
        unsafe {
            ptr::write_bytes(self.mapper.to_ptr::<u8>(va), 0, FRAME_SIZE as usize);
        }
        log::trace!("directory chunk #{index} at {va}");
        Ok(va)
    }

    /// Like [`try_alloc_page_directory`](Self::try_alloc_page_directory), but exhaustion is fatal.
    pub fn alloc_page_directory(&mut self) -> VirtualAddress {
        match self.try_alloc_page_directory() {
            Ok(va) => va,
            Err(e) => {
                log::error!("alloc_page_directory failed: {e}");
                panic!("alloc_page_directory: {e}");
            }
        }
    }

    /// Physical address behind `va`, if it lies in a 4 MiB mapping.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        // SAFETY: see `new`.
        unsafe { self.directory.as_ref() }.translate_large(va)
    }

    /// Number of blocks marked used, reserved ones included.
    #[must_use]
    pub fn used_blocks(&self) -> usize {
        self.blocks.count_used()
    }

    #[must_use]
    pub fn is_block_used(&self, index: usize) -> bool {
        self.blocks.test(index)
    }

    /// Marks every block as used.
    pub fn mark_all_used(&mut self) {
        self.blocks.set_all();
    }

    pub const fn mapper(&self) -> &V {
        &self.mapper
    }
}

impl<M: Mmu, V: VirtMapper> BlockSource for BlockAllocator<M, V> {
    fn grant_block(&mut self) -> Result<NonNull<u8>, BlockAllocError> {
        let va = self.try_alloc_block()?;
        NonNull::new(self.mapper.to_ptr(va)).ok_or(BlockAllocError::NoVirtualSlot)
    }

    fn physical_address(&self, ptr: *const u8) -> Option<PhysicalAddress> {
        let va = self.mapper.to_virt(ptr);
        self.translate(va)
    }
}
