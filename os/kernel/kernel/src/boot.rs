//! # Multiboot Entry
//!
//! The boot loader jumps to [`_start`] in 32-bit protected mode with paging
//! off, `EAX` holding the Multiboot magic and `EBX` the physical address of
//! the info structure. Everything except the `.boot` section is linked at
//! [`KERNEL_VIRTUAL_BASE`] (see `kernel.ld`), so `_start` cannot touch a
//! single Rust item before paging is on.
//!
//! The boot page directory maps, with 4 MiB pages:
//!
//! Slot | Virtual       | Physical | Why
//! -----|---------------|----------|----
//! 0    | `0x0000_0000` | block 0  | `_start` keeps running after `CR0.PG` is set
//! 768  | `0xC000_0000` | block 0  | the kernel image
//! 769  | `0xC040_0000` | block 1  | the page directory pool
//!
//! The identity slot stays in place; the block allocator and the kernel page
//! directory never rely on it.

use kernel_info::memory::{
    BOOT_STACK_SIZE, DIRECTORY_POOL_PHYS, DIRECTORY_POOL_VIRT, KERNEL_VIRTUAL_BASE,
    directory_slot,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr4::Cr4;
use kernel_sched::Stack;
use kernel_vmem::{DirectoryEntry, PageDirectoryEntries};

/// Header flag: align modules on page boundaries.
const HEADER_PAGE_ALIGN: u32 = 1 << 0;

/// Header flag: provide the memory fields and the memory map.
const HEADER_MEMORY_INFO: u32 = 1 << 1;

const HEADER_FLAGS: u32 = HEADER_PAGE_ALIGN | HEADER_MEMORY_INFO;

/// The Multiboot (v1) header; must sit in the first 8 KiB of the image.
#[repr(C, align(4))]
struct MultibootHeader {
    magic: u32,
    flags: u32,
    checksum: u32,
}

#[used]
#[unsafe(link_section = ".multiboot")]
static MULTIBOOT_HEADER: MultibootHeader = MultibootHeader {
    magic: kernel_info::boot::MULTIBOOT_HEADER_MAGIC,
    flags: HEADER_FLAGS,
    checksum: 0u32.wrapping_sub(kernel_info::boot::MULTIBOOT_HEADER_MAGIC.wrapping_add(HEADER_FLAGS)),
};

#[repr(align(16))]
struct Aligned16<const N: usize>([u8; N]);

/// Stack of the boot flow until [`task_init`](kernel_sched::task_init)
/// moves it into a full task stack.
#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned16<BOOT_STACK_SIZE> = Aligned16([0; BOOT_STACK_SIZE]);

/// The page directory `_start` enables paging with.
///
/// Stays the active directory until the kernel directory is built; the block
/// allocator maps heap blocks into it in the meantime.
#[unsafe(link_section = ".data.boot")]
#[unsafe(no_mangle)]
static mut BOOT_DIRECTORY: PageDirectoryEntries = boot_directory();

const fn boot_directory() -> PageDirectoryEntries {
    let kernel = DirectoryEntry::large(PhysicalPage::from_addr(PhysicalAddress::new(0)));
    let pool =
        DirectoryEntry::large(PhysicalPage::from_addr(PhysicalAddress::new(DIRECTORY_POOL_PHYS)));

    let mut directory = PageDirectoryEntries::zeroed();
    directory.set(0, kernel);
    directory.set(directory_slot(KERNEL_VIRTUAL_BASE), kernel);
    directory.set(directory_slot(DIRECTORY_POOL_VIRT), pool);
    directory
}

/// The boot stack as the scheduler sees it.
#[must_use]
pub fn boot_stack() -> Stack {
    let base = (&raw const BOOT_STACK).addr();
    Stack::new(base, BOOT_STACK_SIZE)
}

/// Image entry point, running at its physical address.
///
/// Enables 4 MiB paging on [`BOOT_DIRECTORY`] and continues in the higher
/// half. `ESI` and `EBX` carry the boot loader's magic and info pointer
/// across.
#[unsafe(no_mangle)]
#[unsafe(naked)]
#[unsafe(link_section = ".text.boot")]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "cli",
        "mov esi, eax",
        "mov eax, offset {directory}",
        "sub eax, {virtual_base}",
        "mov cr3, eax",
        "mov eax, cr4",
        "or eax, {cr4_pse}",
        "mov cr4, eax",
        "mov eax, cr0",
        "or eax, {cr0_pg}",
        "mov cr0, eax",
        "mov ecx, offset {higher_half}",
        "jmp ecx",
        directory = sym BOOT_DIRECTORY,
        virtual_base = const KERNEL_VIRTUAL_BASE,
        cr4_pse = const Cr4::new().with_pse(true).into_bits(),
        cr0_pg = const Cr0::new().with_pg_paging(true).into_bits(),
        higher_half = sym higher_half_start,
    );
}

/// Sets up the boot stack and calls [`kernel_entry`].
#[unsafe(naked)]
unsafe extern "C" fn higher_half_start() -> ! {
    core::arch::naked_asm!(
        "mov esp, offset {stack}",
        "add esp, {stack_size}",
        "xor ebp, ebp",
        "push ebx",
        "push esi",
        "call {entry}",
        "2:",
        "cli",
        "hlt",
        "jmp 2b",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        entry = sym kernel_entry,
    );
}

/// First Rust code, on the boot stack in the higher half.
extern "C" fn kernel_entry(magic: u32, info_pa: u32) -> ! {
    #[cfg(feature = "qemu")]
    kernel_qemu::qemu_trace!("Kernel reporting to QEMU!\n");
    crate::kernel_main(magic, info_pa)
}

const _: () = assert!(size_of::<MultibootHeader>() == 12);
