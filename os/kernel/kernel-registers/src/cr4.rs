#[cfg(all(feature = "asm", target_arch = "x86"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// CR4: Control Register 4 (32-bit).
///
/// Only the bits a 32-bit kernel cares about are named; the rest are
/// reserved. [`pse`](Self::pse) must be set before any directory entry with
/// `PS=1` is used.
#[bitfield(u32, order = Lsb)]
pub struct Cr4 {
    /// Bit 0: VME: Virtual-8086 Mode Extensions.
    pub vme: bool,

    /// Bit 1: PVI: Protected-Mode Virtual Interrupts.
    pub pvi: bool,

    /// Bit 2: TSD: Time Stamp Disable.
    pub tsd: bool,

    /// Bit 3: DE: Debugging Extensions.
    pub de: bool,

    /// Bit 4: PSE: Page Size Extensions (4 MiB pages).
    pub pse: bool,

    /// Bit 5: PAE: Physical Address Extension.
    pub pae: bool,

    /// Bit 6: MCE: Machine-Check Enable.
    pub mce: bool,

    /// Bit 7: PGE: Page Global Enable.
    pub pge: bool,

    /// Bit 8: PCE: Performance-Monitoring Counter Enable.
    pub pce: bool,

    /// Bit 9: OSFXSR: OS supports FXSAVE/FXRSTOR.
    pub osfxsr: bool,

    /// Bit 10: OSXMMEXCPT: OS supports unmasked SIMD FP exceptions.
    pub osxmmexcpt: bool,

    /// Bits 11–31: not modeled.
    #[bits(21, access = RO)]
    pub reserved: u32,
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        let mut cr4: u32;
        unsafe {
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, preserves_flags));
        }
        Self::from_bits(cr4)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl StoreRegisterUnsafe for Cr4 {
    unsafe fn store_unsafe(self) {
        let cr4 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr4, {}", in(reg) cr4, options(nomem, preserves_flags));
        }
    }
}
