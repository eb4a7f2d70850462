//! # Memory Layout

/// Where the kernel executes (VMA); the first physical block is mapped here.
///
/// # Kernel Build
/// Sourced by the kernel's `build.rs` to configure the linker.
pub const KERNEL_VIRTUAL_BASE: u32 = 0xC000_0000;

/// Where the boot loader places the kernel image in *physical* memory (LMA).
///
/// # Kernel Build
/// Sourced by the kernel's `build.rs` to configure the linker.
pub const KERNEL_PHYS_LOAD: u32 = 0x0010_0000; // 1 MiB

/// Size of one allocator block and of a large (`PS=1`) page.
pub const BLOCK_SIZE: u32 = 4 * 1024 * 1024;

/// Size of one small page frame.
pub const FRAME_SIZE: u32 = 4096;

/// Entries per page directory and per page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Number of 4 MiB blocks in the 32-bit physical address space.
pub const BLOCK_COUNT: usize = 1024;

/// Physical block holding the kernel image, boot stack and early tables.
pub const KERNEL_BLOCK: usize = 0;

/// Physical block carved into 4 KiB chunks for page directories.
pub const DIRECTORY_POOL_BLOCK: usize = 1;

/// Blocks that are never handed out by the block allocator.
pub const RESERVED_BLOCKS: usize = 2;

/// Physical base of the directory pool.
pub const DIRECTORY_POOL_PHYS: u32 = DIRECTORY_POOL_BLOCK as u32 * BLOCK_SIZE;

/// Virtual base of the directory pool (mapped by the boot code).
pub const DIRECTORY_POOL_VIRT: u32 = KERNEL_VIRTUAL_BASE + DIRECTORY_POOL_PHYS;

/// Number of directory-sized chunks in the pool.
pub const DIRECTORY_POOL_CHUNKS: usize = (BLOCK_SIZE / FRAME_SIZE) as usize;

/// First virtual address at which allocated blocks are mapped.
///
/// The slot search wraps around the whole directory, so this is a starting
/// point rather than a hard bound.
pub const BLOCK_WINDOW_BASE: u32 = 0xD000_0000;

/// Block size of kernel heap superblocks, in bytes.
pub const HEAP_BLOCK_SIZE: u32 = 16;

/// Stack the boot code runs on before the scheduler relocates it.
pub const BOOT_STACK_SIZE: usize = 16 * 1024;

/// Converts a physical address inside the boot-mapped reserve (blocks 0 and 1)
/// to the address the kernel sees it at.
#[inline]
#[must_use]
pub const fn low_phys_to_virt(pa: u32) -> u32 {
    debug_assert!(pa < RESERVED_BLOCKS as u32 * BLOCK_SIZE);
    pa + KERNEL_VIRTUAL_BASE
}

/// Page directory slot of an address.
#[inline]
#[must_use]
pub const fn directory_slot(va: u32) -> usize {
    (va / BLOCK_SIZE) as usize
}

const _: () = {
    assert!(BLOCK_SIZE.is_power_of_two());
    assert!(KERNEL_VIRTUAL_BASE.is_multiple_of(BLOCK_SIZE));
    assert!(BLOCK_WINDOW_BASE.is_multiple_of(BLOCK_SIZE));
    assert!(BLOCK_WINDOW_BASE > DIRECTORY_POOL_VIRT);
    assert!(KERNEL_PHYS_LOAD < BLOCK_SIZE);
    assert!(BLOCK_SIZE as u64 * BLOCK_COUNT as u64 == 1 << 32);
    assert!(BOOT_STACK_SIZE.is_multiple_of(4096));
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(DIRECTORY_POOL_VIRT, 0xC040_0000);
        assert_eq!(directory_slot(KERNEL_VIRTUAL_BASE), 768);
        assert_eq!(directory_slot(BLOCK_WINDOW_BASE), 832);
        assert_eq!(low_phys_to_virt(0x0010_0000), 0xC010_0000);
        assert_eq!(DIRECTORY_POOL_CHUNKS, 1024);
    }
}
