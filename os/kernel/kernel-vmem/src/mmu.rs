//! # Paging Hardware Seam
//!
//! Everything the paging code needs from the processor goes through [`Mmu`],
//! so the algorithms run unchanged against a recording fake in host tests.
//! [`X86Mmu`] is the real implementation on top of the typed control
//! registers.

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Access to the paging-related processor state.
pub trait Mmu {
    /// Physical base of the active page directory (CR3).
    fn page_directory_base(&self) -> PhysicalAddress;

    /// Makes the directory at `base` the active one.
    ///
    /// # Safety
    /// `base` must hold a valid page directory that maps the running code,
    /// its stack and all data the kernel touches afterwards.
    unsafe fn load_page_directory(&self, base: PhysicalAddress);

    /// Enables 4 MiB pages (CR4.PSE) and paging (CR0.PG).
    ///
    /// # Safety
    /// A valid page directory must be loaded.
    unsafe fn enable_paging(&self);

    /// Drops any cached translation for the page containing `va`.
    fn invalidate_page(&self, va: VirtualAddress);

    /// Linear address of the most recent page fault (CR2).
    fn fault_address(&self) -> VirtualAddress;
}

impl<M: Mmu + ?Sized> Mmu for &M {
    fn page_directory_base(&self) -> PhysicalAddress {
        (**self).page_directory_base()
    }

    unsafe fn load_page_directory(&self, base: PhysicalAddress) {
        unsafe { (**self).load_page_directory(base) }
    }

    unsafe fn enable_paging(&self) {
        unsafe { (**self).enable_paging() }
    }

    fn invalidate_page(&self, va: VirtualAddress) {
        (**self).invalidate_page(va);
    }

    fn fault_address(&self) -> VirtualAddress {
        (**self).fault_address()
    }
}

/// The processor's own MMU.
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Mmu;

#[cfg(target_arch = "x86")]
impl Mmu for X86Mmu {
    fn page_directory_base(&self) -> PhysicalAddress {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::cr3::Cr3;
        // SAFETY: reading CR3 has no side effects in ring 0.
        unsafe { Cr3::load_unsafe() }.directory_phys()
    }

    unsafe fn load_page_directory(&self, base: PhysicalAddress) {
        use kernel_registers::StoreRegisterUnsafe;
        use kernel_registers::cr3::Cr3;
        unsafe { Cr3::from_directory_phys(base, false, false).store_unsafe() };
    }

    unsafe fn enable_paging(&self) {
        use kernel_registers::cr0::Cr0;
        use kernel_registers::cr4::Cr4;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
        unsafe {
            let cr4 = Cr4::load_unsafe();
            cr4.with_pse(true).store_unsafe();
            let cr0 = Cr0::load_unsafe();
            cr0.with_pg_paging(true).store_unsafe();
        }
    }

    fn invalidate_page(&self, va: VirtualAddress) {
        // SAFETY: invlpg only affects the TLB.
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_usize(), options(nostack, preserves_flags));
        }
    }

    fn fault_address(&self) -> VirtualAddress {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::cr2::Cr2;
        // SAFETY: reading CR2 has no side effects in ring 0.
        unsafe { Cr2::load_unsafe() }.fault_address()
    }
}
