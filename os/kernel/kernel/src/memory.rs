//! # Kernel Memory Bring-Up
//!
//! 1. [`detect_memory`] reads the usable RAM range from the Multiboot info.
//! 2. [`init_heap`] puts the block allocator on top of the boot page
//!    directory and installs the kernel heap as the global allocator.
//! 3. [`init_paging`] builds the kernel page directory, switches to it and
//!    points the block allocator at it.

use crate::interrupts::KernelRegistry;
use core::ptr::{self, NonNull};
use kernel_alloc::{BlockAllocator, LockedHeap};
use kernel_info::boot::{BootInfoError, MemoryRange, MultibootInfo};
use kernel_info::memory::{DIRECTORY_POOL_VIRT, low_phys_to_virt};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{IrqLock, SyncOnceCell};
use kernel_vmem::{
    KernelWindow, Mmu, PageDirectoryEntries, PageFaultHandler, PageManager, PhysMapper, X86Mmu,
};

/// Block source of the kernel heap.
pub type KernelBlocks = BlockAllocator<X86Mmu, KernelWindow>;

/// The kernel heap; empty until [`init_heap`].
#[global_allocator]
pub static HEAP: LockedHeap<KernelBlocks> = LockedHeap::new();

type KernelPaging = PageManager<&'static LockedHeap<KernelBlocks>, X86Mmu>;

static PAGING: SyncOnceCell<IrqLock<KernelPaging>> = SyncOnceCell::new();

static PAGE_FAULT: PageFaultHandler<X86Mmu> = PageFaultHandler::new(X86Mmu);

/// The usable RAM range reported by the boot loader.
///
/// # Errors
/// See [`MultibootInfo::memory_range`].
pub fn detect_memory(info: &MultibootInfo) -> Result<MemoryRange, BootInfoError> {
    let mmap: &[u8] = match info.mmap_region() {
        // SAFETY: the boot loader places the map in low memory, which the
        // boot directory maps at the kernel base.
        Some((pa, len)) => unsafe {
            let start = ptr::with_exposed_provenance::<u8>(low_phys_to_virt(pa.as_u32()) as usize);
            core::slice::from_raw_parts(start, len)
        },
        None => &[],
    };
    let range = info.memory_range(mmap)?;
    log::info!(
        "usable RAM {}..{} ({} MiB)",
        range.start,
        range.end,
        range.len() / (1024 * 1024)
    );
    Ok(range)
}

/// Installs the kernel heap over the blocks in `range`.
///
/// # Panics
/// If not even the first heap block can be allocated.
///
/// # Safety
/// Must run once, on the boot page directory, before anything allocates.
pub unsafe fn init_heap(range: MemoryRange) {
    // SAFETY: CR3 still holds the boot directory, which lives in block 0.
    let directory: &mut PageDirectoryEntries =
        unsafe { KernelWindow.phys_to_mut(X86Mmu.page_directory_base()) };
    let blocks = unsafe {
        BlockAllocator::new(
            NonNull::from(directory),
            range,
            VirtualAddress::new(DIRECTORY_POOL_VIRT),
            X86Mmu,
            KernelWindow,
        )
    };

    if let Err(e) = HEAP.init(blocks) {
        panic!("cannot set up the kernel heap: {e}");
    }
    if let Some(stats) = HEAP.with_heap(|heap| heap.stats()) {
        log::info!(
            "kernel heap ready: {} superblock(s), {} bytes free",
            stats.superblocks,
            stats.free_bytes
        );
    }
}

/// Builds the kernel page directory over the first `memory_size` bytes and
/// switches to it.
///
/// # Panics
/// If the heap cannot hold the frame bitmap, the directory or its tables.
///
/// # Safety
/// Must run once, after [`init_heap`], with interrupts disabled.
pub unsafe fn init_paging(memory_size: u32) {
    // SAFETY: as in `init_heap`; only read once the identity map is built.
    let bootstrap: &PageDirectoryEntries =
        unsafe { KernelWindow.phys_to_mut::<PageDirectoryEntries>(X86Mmu.page_directory_base()) };

    let mut paging = KernelPaging::new(&HEAP, X86Mmu);
    if let Err(e) =
        unsafe { paging.page_init(memory_size, &mut KernelRegistry, &PAGE_FAULT, Some(bootstrap)) }
    {
        panic!("cannot build the kernel page directory: {e}");
    }

    if let Some(mut kernel) = paging.kernel_directory() {
        // SAFETY: the kernel directory is never freed and is now active.
        let entries = NonNull::from(unsafe { kernel.as_mut() }.entries_mut());
        HEAP.with_heap(|heap| unsafe { heap.source_mut().retarget(entries) });
    }

    log::info!(
        "{} of {} frames in use",
        paging.used_frames(),
        paging.frame_count()
    );
    if PAGING.set(IrqLock::new(paging)).is_err() {
        log::warn!("kernel paging was initialized twice");
    }
}
