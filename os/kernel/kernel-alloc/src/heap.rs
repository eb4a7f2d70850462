//! # Bitmap Heap
//!
//! A heap made of superblocks, each a contiguous region split into equally
//! sized blocks. Every block has a one-byte tag in a map at the start of the
//! superblock's data area:
//!
//! ```text
//! +------------+---------------------+-----------------------------------+
//! | Superblock | tag map (1 B/block) | blocks ...                        |
//! +------------+---------------------+-----------------------------------+
//!              ^ data                 the map's own blocks carry MAP_TAG
//! ```
//!
//! A tag of 0 means free. An allocation tags all of its blocks with one id
//! that differs from both neighbours, so a free only needs the pointer: it
//! clears tags forward for as long as they carry the same id.
//!
//! The scan for a free run starts just behind the previous allocation and
//! wraps around once.

use core::ptr::{self, NonNull};

/// Tag of the blocks that hold the tag map itself.
const MAP_TAG: u8 = 5;

/// Header at the start of every superblock.
#[repr(C, align(16))]
struct Superblock {
    next: Option<NonNull<Superblock>>,
    /// Bytes after the header.
    size: usize,
    /// Blocks in use, map blocks included.
    used: usize,
    /// Size of one block.
    bsize: usize,
    /// Hint: the next scan starts at `lfb + 1`.
    lfb: usize,
}

impl Superblock {
    const fn block_count(&self) -> usize {
        self.size / self.bsize
    }

    const fn map_blocks(&self) -> usize {
        self.block_count().div_ceil(self.bsize)
    }

    fn data(&mut self) -> *mut u8 {
        // SAFETY: the data area directly follows the header.
        unsafe { ptr::from_mut(self).add(1).cast::<u8>() }
    }

    fn data_addr(&self) -> usize {
        ptr::from_ref(self).addr() + size_of::<Self>()
    }

    fn tags(&mut self) -> &mut [u8] {
        let count = self.block_count();
        // SAFETY: the map occupies the first `count` bytes of the data area.
        unsafe { core::slice::from_raw_parts_mut(self.data(), count) }
    }

    fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr.addr();
        addr >= self.data_addr() && addr < self.data_addr() + self.size
    }

    const fn free_bytes(&self) -> usize {
        self.size - self.used * self.bsize
    }

    /// Finds `need` free blocks in a row whose first block satisfies `accept`.
    fn find_run(&mut self, need: usize, accept: impl Fn(usize) -> bool) -> Option<usize> {
        let count = self.block_count();
        let start = self.lfb.wrapping_add(1);
        let mut x = if start >= count { 0 } else { start };
        let tags = self.tags();

        let mut scanned = 0;
        while scanned < count {
            if x >= count {
                x = 0;
            }

            if tags[x] != 0 || !accept(x) {
                x += 1;
                scanned += 1;
                continue;
            }

            let run = tags[x..].iter().take(need).take_while(|&&t| t == 0).count();
            if run == need {
                return Some(x);
            }

            let step = run.max(1);
            x += step;
            scanned += step;
        }
        None
    }

    /// Tags `need` blocks starting at `x` and returns their address.
    fn claim(&mut self, x: usize, need: usize) -> NonNull<u8> {
        let bsize = self.bsize;
        let tags = self.tags();
        let left = if x == 0 { 0 } else { tags[x - 1] };
        let right = tags.get(x + need).copied().unwrap_or(0);
        let id = next_id(left, right);
        tags[x..x + need].fill(id);

        self.lfb = (x + need).wrapping_sub(2);
        self.used += need;

        // SAFETY: `x + need` blocks lie inside the data area.
        unsafe { NonNull::new_unchecked(self.data().add(x * bsize)) }
    }

    /// Clears the allocation starting at `ptr`. Returns the number of blocks released.
    fn release(&mut self, ptr: *const u8) -> usize {
        let offset = ptr.addr() - self.data_addr();
        let bi = offset / self.bsize;
        if bi < self.map_blocks() || bi >= self.block_count() {
            return 0;
        }

        let tags = self.tags();
        let id = tags[bi];
        if id == 0 {
            return 0;
        }

        let run = tags[bi..].iter().take_while(|&&t| t == id).count();
        tags[bi..bi + run].fill(0);
        self.used -= run;
        run
    }
}

/// The smallest id above `a` that is neither `b` nor 0.
const fn next_id(a: u8, b: u8) -> u8 {
    let mut c = a.wrapping_add(1);
    while c == b || c == 0 {
        c = c.wrapping_add(1);
    }
    c
}

/// Usage figures over all superblocks.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HeapStats {
    pub superblocks: usize,
    pub total_blocks: usize,
    pub used_blocks: usize,
    pub free_bytes: usize,
}

/// A list of superblocks.
pub struct Heap {
    head: Option<NonNull<Superblock>>,
}

// SAFETY: superblocks are only reached through the heap.
unsafe impl Send for Heap {}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Bytes an empty superblock over a `region`-byte region can hand out,
    /// after its header and tag map.
    #[must_use]
    pub const fn superblock_capacity(region: usize, block_size: usize) -> usize {
        let count = (region - size_of::<Superblock>()) / block_size;
        (count - count.div_ceil(block_size)) * block_size
    }

    /// Adds the region `[ptr, ptr + size)` as a new superblock with
    /// blocks of `block_size` bytes. The new superblock is searched first.
    ///
    /// # Safety
    /// The region must be valid, writable, exclusively owned by the heap
    /// from now on and aligned to 16 bytes. `size` must leave room for the
    /// header and at least one block besides the tag map.
    pub unsafe fn add_superblock(&mut self, ptr: NonNull<u8>, size: usize, block_size: usize) {
        debug_assert!(block_size > 0);
        debug_assert!(ptr.addr().get() % align_of::<Superblock>() == 0);

        let mut sb_ptr = ptr.cast::<Superblock>();
        unsafe {
            sb_ptr.write(Superblock {
                next: self.head,
                size: size - size_of::<Superblock>(),
                used: 0,
                bsize: block_size,
                lfb: 0,
            });
        }
        // SAFETY: just initialized.
        let sb = unsafe { sb_ptr.as_mut() };

        let count = sb.block_count();
        let map_blocks = sb.map_blocks();
        let tags = sb.tags();
        tags.fill(0);
        tags[..map_blocks].fill(MAP_TAG);
        sb.lfb = map_blocks - 1;
        sb.used = map_blocks;

        self.head = Some(sb_ptr);
        log::debug!(
            "heap superblock at {:p}: {count} blocks of {block_size} bytes, {map_blocks} for the map",
            ptr.as_ptr()
        );
    }

    fn superblocks(&self) -> impl Iterator<Item = NonNull<Superblock>> {
        // SAFETY: the list only contains initialized superblocks.
        core::iter::successors(self.head, |sb| unsafe { sb.as_ref() }.next)
    }

    /// Allocates `size` bytes. The memory is not zeroed.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.alloc_with(size, |_| true)
    }

    /// Allocates `size` bytes at an address that is a multiple of `align`.
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());
        self.alloc_with(size, |addr| addr % align == 0)
    }

    fn alloc_with(&mut self, size: usize, aligned: impl Fn(usize) -> bool) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        for mut sb_ptr in self.superblocks() {
            // SAFETY: superblocks are owned by the heap.
            let sb = unsafe { sb_ptr.as_mut() };
            if sb.free_bytes() < size {
                continue;
            }

            let need = size.div_ceil(sb.bsize);
            let (data, bsize) = (sb.data_addr(), sb.bsize);
            if let Some(x) = sb.find_run(need, |x| aligned(data + x * bsize)) {
                let ptr = sb.claim(x, need);
                log::trace!("heap: {size} bytes at {:p}", ptr.as_ptr());
                return Some(ptr);
            }
        }
        None
    }

    /// Releases the allocation at `ptr`.
    ///
    /// Returns `false` if no superblock owns `ptr` or it does not point to
    /// a live allocation.
    pub fn free(&mut self, ptr: NonNull<u8>) -> bool {
        for mut sb_ptr in self.superblocks() {
            // SAFETY: superblocks are owned by the heap.
            let sb = unsafe { sb_ptr.as_mut() };
            if sb.contains(ptr.as_ptr()) {
                return sb.release(ptr.as_ptr()) > 0;
            }
        }
        false
    }

    /// Whether `ptr` lies in one of the superblocks.
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.superblocks()
            // SAFETY: superblocks are owned by the heap.
            .any(|sb| unsafe { sb.as_ref() }.contains(ptr))
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.superblocks().fold(HeapStats::default(), |mut stats, sb| {
            // SAFETY: superblocks are owned by the heap.
            let sb = unsafe { sb.as_ref() };
            stats.superblocks += 1;
            stats.total_blocks += sb.block_count();
            stats.used_blocks += sb.used;
            stats.free_bytes += sb.free_bytes();
            stats
        })
    }
}
