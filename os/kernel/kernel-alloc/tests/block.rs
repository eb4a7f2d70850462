mod common;

use common::{MIB, RecordingMmu, block_allocator, block_allocator_with};
use kernel_alloc::{BlockAllocError, BlockSource};
use kernel_info::memory::{BLOCK_COUNT, BLOCK_SIZE, DIRECTORY_POOL_VIRT, FRAME_SIZE};
use kernel_memory_addresses::{PhysicalAddress, Size4M, VirtualAddress};
use kernel_vmem::VirtMapper;
use std::collections::HashSet;

fn bytes<'a>(mapper: &impl VirtMapper, va: VirtualAddress, len: usize) -> &'a [u8] {
    unsafe { core::slice::from_raw_parts(mapper.to_ptr::<u8>(va), len) }
}

#[test]
fn only_blocks_inside_the_range_are_free() {
    let blocks = block_allocator(8 * MIB, 24 * MIB, 0);
    assert_eq!(blocks.used_blocks(), BLOCK_COUNT - 4);
    for index in 0..BLOCK_COUNT {
        assert_eq!(blocks.is_block_used(index), !(2..6).contains(&index), "block {index}");
    }
}

#[test]
fn partial_blocks_at_the_edges_are_not_used() {
    let blocks = block_allocator(9 * MIB, 23 * MIB, 0);
    assert!(blocks.is_block_used(2));
    assert!(!blocks.is_block_used(3));
    assert!(!blocks.is_block_used(4));
    assert!(blocks.is_block_used(5));
}

#[test]
fn the_kernel_reserve_is_never_free() {
    let blocks = block_allocator(0, 16 * MIB, 0);
    assert!(blocks.is_block_used(0));
    assert!(blocks.is_block_used(1));
    assert!(!blocks.is_block_used(2));
}

#[test]
fn sixteen_megabytes_yield_four_zeroed_blocks() {
    let mut blocks = block_allocator(8 * MIB, 24 * MIB, 4);
    let used = blocks.used_blocks();

    let mut seen = HashSet::new();
    for n in 0..4 {
        let va = blocks.alloc_block();
        assert!(va.is_aligned::<Size4M>());
        assert!(seen.insert(va.as_u32()));
        assert_eq!(blocks.used_blocks(), used + n + 1);

        let data = bytes(blocks.mapper(), va, BLOCK_SIZE as usize);
        assert!(data.iter().all(|&b| b == 0));
    }

    // first free slot at the window base, first free physical block first
    let first = VirtualAddress::new(0xD000_0000);
    assert_eq!(blocks.translate(first), Some(PhysicalAddress::new(8 * MIB)));
    assert_eq!(
        blocks.translate(VirtualAddress::new(first.as_u32() + 0x1234)),
        Some(PhysicalAddress::new(8 * MIB + 0x1234))
    );

    assert_eq!(blocks.try_alloc_block(), Err(BlockAllocError::OutOfBlocks));
}

#[test]
fn allocation_invalidates_the_new_mapping() {
    let mmu = RecordingMmu::default();
    let invalidated = mmu.invalidated.clone();
    let mut blocks = block_allocator_with(8 * MIB, 16 * MIB, 2, mmu);

    let a = blocks.alloc_block();
    let b = blocks.alloc_block();
    assert_eq!(*invalidated.borrow(), vec![a.as_u32(), b.as_u32()]);
    assert_eq!(b.as_u32() - a.as_u32(), BLOCK_SIZE);
}

#[test]
#[should_panic(expected = "no free 4 MiB block")]
fn alloc_block_panics_when_exhausted() {
    let mut blocks = block_allocator(8 * MIB, 24 * MIB, 0);
    blocks.mark_all_used();
    let _ = blocks.alloc_block();
}

#[test]
fn grant_block_reports_physical_addresses() {
    let mut blocks = block_allocator(8 * MIB, 16 * MIB, 2);
    let ptr = blocks.grant_block().unwrap();
    let inside = unsafe { ptr.as_ptr().add(0x2000) };
    assert_eq!(
        blocks.physical_address(inside),
        Some(PhysicalAddress::new(8 * MIB + 0x2000))
    );
}

#[test]
fn directory_pool_chunks_are_distinct_and_zeroed() {
    let mut blocks = block_allocator(8 * MIB, 16 * MIB, 0);

    let a = blocks.alloc_page_directory();
    let b = blocks.alloc_page_directory();
    assert_eq!(a.as_u32(), DIRECTORY_POOL_VIRT);
    assert_eq!(b.as_u32(), DIRECTORY_POOL_VIRT + FRAME_SIZE);

    for va in [a, b] {
        assert!(bytes(blocks.mapper(), va, FRAME_SIZE as usize).iter().all(|&x| x == 0));
    }
    // the chunk after the handed out ones is untouched
    let next = bytes(blocks.mapper(), VirtualAddress::new(b.as_u32() + FRAME_SIZE), 16);
    assert!(next.iter().all(|&x| x == 0xAA));
}

#[test]
fn directory_pool_exhaustion() {
    let mut blocks = block_allocator(8 * MIB, 16 * MIB, 0);
    for _ in 0..1024 {
        blocks.try_alloc_page_directory().unwrap();
    }
    assert_eq!(
        blocks.try_alloc_page_directory(),
        Err(BlockAllocError::OutOfDirectories)
    );
}
