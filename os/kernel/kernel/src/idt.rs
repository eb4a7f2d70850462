//! # 32-bit Interrupt Descriptor Table (IDT)
//!
//! The **IDT** tells the CPU which stub to enter for each **exception** and
//! **hardware IRQ**. In protected mode it is an array of 8-byte gate
//! descriptors whose base and limit live in the **IDTR** (loaded via `lidt`).
//!
//! Every present gate in this kernel points at one of the ISR stubs in
//! [`crate::interrupts`], runs in [`KERNEL_CS`], is only reachable from
//! ring 0, and is an **interrupt gate**: the CPU clears `IF` on entry, so
//! handlers never nest.
//!
//! ```ignore
//! idt[usize::from(vector)]
//!     .set_handler_addr(stub_addr)
//!     .selector(KERNEL_CS)
//!     .present(true)
//!     .gate_interrupt();
//! ```
//!
//! ## Ordering checklist
//! 1. **GDT:** [`crate::gdt::init_gdt`] (the gates refer to [`KERNEL_CS`]).
//! 2. **PIC:** remap the IRQs away from the exception vectors.
//! 3. **IDT:** [`init_idt_once`].
//! 4. `sti` once the scheduler is ready.

use crate::gdt::KERNEL_CS;
use bitfield_struct::bitfield;
use core::mem::size_of;
use core::ops::{Index, IndexMut};

const _: () = assert!(size_of::<IdtEntry>() == 8);

/// The attribute byte of a gate: `| P | DPL(2) | S(0) | Type(4) |`.
#[bitfield(u8)]
pub struct IdtGateAttr {
    /// **Type**: 0xE = 32-bit *Interrupt gate*, 0xF = 32-bit *Trap gate*.
    #[bits(4)]
    pub typ: u8,

    /// **S**: System bit (must be `0` for interrupt/trap gates).
    pub s: bool,

    /// **DPL**: Descriptor Privilege Level for software `int n`.
    #[bits(2)]
    pub dpl: u8,

    /// **P**: Present bit.
    pub present: bool,
}

/// One 8-byte protected-mode gate descriptor.
///
/// ```text
/// 63            48 47      40 39      32 31            16 15             0
/// +---------------+----------+----------+----------------+----------------+
/// | offset[31:16] |   attr   |   zero   |    selector    |  offset[15:0]  |
/// +---------------+----------+----------+----------------+----------------+
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    zero: u8,
    attr: u8,
    offset_hi: u16,
}

impl IdtEntry {
    /// A zeroed, non-present entry.
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        zero: 0,
        attr: 0,
        offset_hi: 0,
    };

    /// Points the entry at the stub at `addr` and returns a builder.
    ///
    /// The entry is **not** marked present by default.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn set_handler_addr(&mut self, addr: u32) -> IdtEntryBuilder<'_> {
        self.offset_lo = (addr & 0xFFFF) as u16;
        self.offset_hi = (addr >> 16) as u16;
        self.selector = KERNEL_CS;
        self.zero = 0;
        self.attr = IdtGateAttr::new().with_typ(0xE).into_bits();
        IdtEntryBuilder { entry: self }
    }

    /// Address of the stub this entry enters.
    #[must_use]
    pub fn handler_addr(&self) -> u32 {
        u32::from(self.offset_hi) << 16 | u32::from(self.offset_lo)
    }

    #[must_use]
    pub const fn attr(&self) -> IdtGateAttr {
        IdtGateAttr::from_bits(self.attr)
    }

    #[must_use]
    pub const fn selector(&self) -> u16 {
        self.selector
    }
}

/// Fluent builder for an [`IdtEntry`].
pub struct IdtEntryBuilder<'a> {
    entry: &'a mut IdtEntry,
}

impl IdtEntryBuilder<'_> {
    #[inline]
    pub const fn selector(self, selector: u16) -> Self {
        self.entry.selector = selector;
        self
    }

    /// Set the **Present** bit. Must be `true` for a usable gate.
    #[inline]
    pub const fn present(self, p: bool) -> Self {
        self.entry.attr = IdtGateAttr::from_bits(self.entry.attr)
            .with_present(p)
            .into_bits();
        self
    }

    /// Make this an **Interrupt Gate** (type 0xE): `IF` is cleared on entry.
    #[inline]
    pub const fn gate_interrupt(self) -> Self {
        self.entry.attr = IdtGateAttr::from_bits(self.entry.attr)
            .with_typ(0xE)
            .with_s(false)
            .into_bits();
        self
    }
}

/// A 256-entry **Interrupt Descriptor Table**.
#[repr(C, align(8))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    /// A table with every gate marked **not present**.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; 256],
        }
    }

    /// Installs a present, ring-0 interrupt gate for every `(vector, stub)`.
    pub fn with_stubs(stubs: impl IntoIterator<Item = (u8, u32)>) -> Self {
        let mut idt = Self::new();
        for (vector, addr) in stubs {
            idt[usize::from(vector)]
                .set_handler_addr(addr)
                .selector(KERNEL_CS)
                .present(true)
                .gate_interrupt();
        }
        idt
    }

    /// Number of present gates.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.attr().present()).count()
    }

    /// Load this IDT into the CPU's **IDTR** using `lidt`.
    ///
    /// # Safety
    /// - Must be called at **CPL0**.
    /// - All **present** entries must reference valid handler code.
    #[cfg(target_arch = "x86")]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn load(&'static self) {
        let idtr = Idtr {
            limit: (size_of::<Self>() - 1) as u16,
            base: core::ptr::from_ref(self).addr() as u32,
        };
        unsafe {
            core::arch::asm!("lidt [{}]", in(reg) &raw const idtr, options(nostack, preserves_flags, readonly));
        }
    }
}

impl Index<usize> for Idt {
    type Output = IdtEntry;
    fn index(&self, i: usize) -> &Self::Output {
        &self.entries[i]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.entries[i]
    }
}

/// Operand format used by `lidt` (limit + base).
#[cfg(target_arch = "x86")]
#[repr(C, packed)]
struct Idtr {
    limit: u16,
    base: u32,
}

#[cfg(target_arch = "x86")]
mod global {
    use super::Idt;
    use core::mem::MaybeUninit;

    /// The global interrupt descriptor table.
    static mut IDT: MaybeUninit<Idt> = MaybeUninit::uninit();

    /// Stores `idt` in the global slot and loads it into the IDTR.
    ///
    /// # Safety
    /// Must be called exactly once, with interrupts disabled, after the GDT
    /// was installed.
    pub unsafe fn init_idt_once(idt: Idt) {
        let present = idt.present_count();
        #[allow(static_mut_refs)]
        unsafe {
            IDT.write(idt);
            IDT.assume_init_ref().load();
        }
        log::debug!("IDT loaded, {present} gates present");
    }
}

#[cfg(target_arch = "x86")]
pub use global::init_idt_once;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_gate_encoding() {
        let idt = Idt::with_stubs([(14, 0xC010_2345), (32, 0xC010_3000)]);
        assert_eq!(idt.present_count(), 2);

        let gate = idt[14];
        assert_eq!(gate.handler_addr(), 0xC010_2345);
        assert_eq!(gate.selector(), KERNEL_CS);
        assert_eq!(gate.attr().into_bits(), 0x8E);

        let raw: u64 = unsafe { core::mem::transmute(gate) };
        assert_eq!(raw, 0xC010_8E00_0008_2345);
    }

    #[test]
    fn untouched_gates_are_missing() {
        let idt = Idt::with_stubs([(0, 0x1000)]);
        assert_eq!(idt[1], IdtEntry::MISSING);
        assert!(!idt[255].attr().present());
    }
}
