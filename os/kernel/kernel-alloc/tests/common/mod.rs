#![allow(dead_code)]

use core::cell::RefCell;
use core::ptr::NonNull;
use kernel_alloc::{BlockAllocError, BlockAllocator, BlockSource};
use kernel_info::boot::MemoryRange;
use kernel_info::memory::{BLOCK_SIZE, BLOCK_WINDOW_BASE, DIRECTORY_POOL_VIRT};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{Mmu, PageDirectoryEntries, VirtMapper};
use std::alloc::{Layout, alloc, alloc_zeroed, dealloc};
use std::rc::Rc;

pub const MIB: u32 = 1024 * 1024;

/// Host memory standing in for a virtual range starting at `base`.
pub struct Window {
    base: u32,
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Window {
    pub fn new(base: u32, size: usize, fill: u8) -> Self {
        let layout = Layout::from_size_align(size, 4096).unwrap();
        let ptr = NonNull::new(unsafe { alloc(layout) }).unwrap();
        unsafe { ptr.as_ptr().write_bytes(fill, size) };
        Self { base, ptr, layout }
    }

    fn contains(&self, va: u32) -> bool {
        va >= self.base && ((va - self.base) as usize) < self.layout.size()
    }

    fn host_contains(&self, p: usize) -> bool {
        let start = self.ptr.addr().get();
        p >= start && p < start + self.layout.size()
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Maps the block window and the directory pool onto host buffers.
#[derive(Clone)]
pub struct HostMapper {
    windows: Rc<Vec<Window>>,
}

impl HostMapper {
    /// `blocks` blocks worth of window at `BLOCK_WINDOW_BASE` plus a full pool.
    pub fn new(blocks: usize) -> Self {
        let windows = vec![
            Window::new(BLOCK_WINDOW_BASE, blocks.max(1) * BLOCK_SIZE as usize, 0xAA),
            Window::new(DIRECTORY_POOL_VIRT, BLOCK_SIZE as usize, 0xAA),
        ];
        Self {
            windows: Rc::new(windows),
        }
    }
}

impl VirtMapper for HostMapper {
    fn to_ptr<T>(&self, va: VirtualAddress) -> *mut T {
        let va = va.as_u32();
        let window = self
            .windows
            .iter()
            .find(|w| w.contains(va))
            .unwrap_or_else(|| panic!("{va:#x} is outside the host windows"));
        unsafe { window.ptr.as_ptr().add((va - window.base) as usize).cast() }
    }

    fn to_virt<T>(&self, ptr: *const T) -> VirtualAddress {
        let p = ptr.addr();
        let window = self
            .windows
            .iter()
            .find(|w| w.host_contains(p))
            .expect("pointer outside the host windows");
        let offset = u32::try_from(p - window.ptr.addr().get()).unwrap();
        VirtualAddress::new(window.base + offset)
    }
}

#[derive(Clone, Default)]
pub struct RecordingMmu {
    pub invalidated: Rc<RefCell<Vec<u32>>>,
}

impl Mmu for RecordingMmu {
    fn page_directory_base(&self) -> PhysicalAddress {
        PhysicalAddress::zero()
    }

    unsafe fn load_page_directory(&self, _base: PhysicalAddress) {}

    unsafe fn enable_paging(&self) {}

    fn invalidate_page(&self, va: VirtualAddress) {
        self.invalidated.borrow_mut().push(va.as_u32());
    }

    fn fault_address(&self) -> VirtualAddress {
        VirtualAddress::zero()
    }
}

pub fn directory() -> NonNull<PageDirectoryEntries> {
    NonNull::from(Box::leak(Box::new(PageDirectoryEntries::zeroed())))
}

/// A block allocator over `[start, end)` with `window_blocks` blocks of host window.
pub fn block_allocator(
    start: u32,
    end: u32,
    window_blocks: usize,
) -> BlockAllocator<RecordingMmu, HostMapper> {
    block_allocator_with(start, end, window_blocks, RecordingMmu::default())
}

pub fn block_allocator_with(
    start: u32,
    end: u32,
    window_blocks: usize,
    mmu: RecordingMmu,
) -> BlockAllocator<RecordingMmu, HostMapper> {
    unsafe {
        BlockAllocator::new(
            directory(),
            MemoryRange::new(start, end),
            VirtualAddress::new(DIRECTORY_POOL_VIRT),
            mmu,
            HostMapper::new(window_blocks),
        )
    }
}

/// Blocks straight from the host allocator, at most `limit` of them.
pub struct HostBlocks {
    pub granted: Vec<NonNull<u8>>,
    pub limit: usize,
}

impl HostBlocks {
    pub fn new(limit: usize) -> Self {
        Self {
            granted: Vec::new(),
            limit,
        }
    }

    fn layout() -> Layout {
        Layout::from_size_align(BLOCK_SIZE as usize, 4096).unwrap()
    }
}

impl BlockSource for HostBlocks {
    fn grant_block(&mut self) -> Result<NonNull<u8>, BlockAllocError> {
        if self.granted.len() == self.limit {
            return Err(BlockAllocError::OutOfBlocks);
        }
        let block = NonNull::new(unsafe { alloc_zeroed(Self::layout()) }).unwrap();
        self.granted.push(block);
        Ok(block)
    }

    fn physical_address(&self, ptr: *const u8) -> Option<PhysicalAddress> {
        let p = ptr.addr();
        self.granted.iter().enumerate().find_map(|(i, block)| {
            let start = block.addr().get();
            (p >= start && p < start + BLOCK_SIZE as usize).then(|| {
                let offset = u32::try_from(p - start).unwrap();
                PhysicalAddress::new((i as u32 + 2) * BLOCK_SIZE + offset)
            })
        })
    }
}

impl Drop for HostBlocks {
    fn drop(&mut self) {
        for block in self.granted.drain(..) {
            unsafe { dealloc(block.as_ptr(), Self::layout()) };
        }
    }
}
