//! # i686 Kernel
//!
//! Boot order, starting at [`boot::_start`]:
//!
//! 1. Logger, then the Multiboot magic, info structure and command line.
//! 2. GDT, PIC remap, IDT with the ISR stubs.
//! 3. Block allocator and kernel heap on the boot page directory.
//! 4. Kernel page directory (feature `paging`, command line `paging=on`).
//! 5. Scheduler: the boot flow becomes task 0 and the PIT starts ticking.
//! 6. Boot-time tasks, `sti`, and task 0 idles in `hlt`.
//!
//! Host builds only compile the hardware-independent parts for their tests.

#![cfg_attr(target_os = "none", no_std, no_main)]
#![cfg_attr(not(target_os = "none"), allow(dead_code))]
#![allow(unsafe_code)]

extern crate alloc;

mod gdt;
mod idt;

#[cfg(target_os = "none")]
mod boot;
#[cfg(target_os = "none")]
mod interrupts;
#[cfg(target_os = "none")]
mod memory;
#[cfg(target_os = "none")]
mod pic;
#[cfg(target_os = "none")]
mod pit;
#[cfg(target_os = "none")]
mod ports;
#[cfg(target_os = "none")]
mod tasks;

#[cfg(target_os = "none")]
use kernel_info::boot::{BootOptions, MultibootInfo};

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    kernel_sync::irq::cli_stop_interrupts();
    log::error!("kernel panic: {info}");
    loop {
        halt();
    }
}

/// Waits for the next interrupt.
#[cfg(target_os = "none")]
#[inline]
pub fn halt() {
    // SAFETY: `hlt` only stops the processor until the next interrupt.
    unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
}

/// Reads the options from the Multiboot command line, if there is one.
#[cfg(target_os = "none")]
fn boot_options(info: &MultibootInfo) -> BootOptions {
    use core::ffi::{CStr, c_char};
    use kernel_info::memory::low_phys_to_virt;

    let Some(pa) = info.cmdline_addr() else {
        return BootOptions::default();
    };
    // SAFETY: the boot loader stores a NUL-terminated string in low memory.
    let cmdline = unsafe {
        CStr::from_ptr(core::ptr::with_exposed_provenance::<c_char>(
            low_phys_to_virt(pa.as_u32()) as usize,
        ))
    };
    match cmdline.to_str() {
        Ok(cmdline) => {
            log::info!("command line: {cmdline:?}");
            BootOptions::parse(cmdline)
        }
        Err(_) => {
            log::warn!("ignoring a command line that is not UTF-8");
            BootOptions::default()
        }
    }
}

#[cfg(target_os = "none")]
fn kernel_main(magic: u32, info_pa: u32) -> ! {
    #[cfg(feature = "qemu")]
    {
        let level = if cfg!(debug_assertions) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        if kernel_qemu::init(level).is_err() {
            kernel_qemu::qemu_trace!("a logger was already installed\n");
        }
    }

    if let Err(e) = kernel_info::boot::check_magic(magic) {
        panic!("{e}");
    }
    // SAFETY: the info structure lives in low memory, mapped at the kernel base.
    let info = unsafe {
        &*core::ptr::with_exposed_provenance::<MultibootInfo>(
            kernel_info::memory::low_phys_to_virt(info_pa) as usize,
        )
    };

    let options = boot_options(info);
    if let Some(level) = options.log_level {
        kernel_qemu::LOGGER.set_max_level(level);
    }

    // SAFETY: single-threaded bring-up with interrupts disabled.
    unsafe {
        gdt::init_gdt();
        pic::remap();
        idt::init_idt_once(idt::Idt::with_stubs(interrupts::stubs()));
    }

    let range = match memory::detect_memory(info) {
        Ok(range) => range,
        Err(e) => panic!("cannot determine the usable memory: {e}"),
    };
    // SAFETY: nothing has allocated yet and CR3 holds the boot directory.
    unsafe { memory::init_heap(range) };

    if cfg!(feature = "paging") && options.paging {
        // SAFETY: the heap is up and interrupts are still disabled.
        unsafe { memory::init_paging(range.end.as_u32()) };
    } else {
        log::info!("paging disabled, staying on the boot page directory");
    }

    // SAFETY: called once from the boot flow, which holds no pointers into
    // its own frame across the call.
    unsafe { tasks::start() };
    tasks::spawn_initial_tasks();

    kernel_sync::irq::sti_enable_interrupts();
    log::info!("boot complete");
    loop {
        halt();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
