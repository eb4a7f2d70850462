//! # Global Descriptor Table (GDT) for flat 32-bit protected mode
//!
//! Paging provides all memory protection in this kernel, so segmentation is
//! reduced to the minimum the processor insists on: a code and a data
//! segment that both span the full 4 GiB.
//!
//! ## GDT layout used here
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (32-bit, DPL=0; [`KERNEL_CS`])
//! 2     | 0x10     | Kernel data (32-bit, DPL=0; [`KERNEL_DS`])
//!
//! The boot loader leaves a GDT of its own behind, but its location and
//! layout are unspecified, so [`init_gdt`] replaces it before the IDT (which
//! refers to [`KERNEL_CS`]) is loaded.

use bitfield_struct::bitfield;
use core::mem::size_of;

/// Bit layout of a legacy 8-byte code/data segment descriptor.
#[bitfield(u64)]
pub struct SegmentDescriptor {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40]
    pub s: bool,       // [44]     = 1 (code/data)
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53]     = 0 outside long mode
    pub db: bool,      // [54]     = 1 (32-bit segment)
    pub g: bool,       // [55]     = 1 (limit in 4 KiB units)
    pub base_hi: u8,   // [63:56]
}

/// Execute + read.
const TYPE_CODE: u8 = 0b1010;

/// Read + write.
const TYPE_DATA: u8 = 0b0010;

impl SegmentDescriptor {
    pub const NULL: Self = Self::new();

    /// A present 32-bit segment covering `0..4 GiB`.
    #[must_use]
    pub const fn flat(typ: u8, dpl: u8) -> Self {
        Self::new()
            .with_limit_lo(0xFFFF)
            .with_limit_hi(0xF)
            .with_typ(typ)
            .with_s(true)
            .with_dpl(dpl & 0b11)
            .with_p(true)
            .with_db(true)
            .with_g(true)
    }
}

/// Kernel code selector: index 1, TI=0, RPL=0.
pub const KERNEL_CS: u16 = 1 << 3;

/// Kernel data selector: index 2, TI=0, RPL=0.
pub const KERNEL_DS: u16 = 2 << 3;

/// The complete GDT.
#[repr(C, align(8))]
pub struct Gdt {
    entries: [SegmentDescriptor; 3],
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

impl Gdt {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [
                SegmentDescriptor::NULL,
                SegmentDescriptor::flat(TYPE_CODE, 0),
                SegmentDescriptor::flat(TYPE_DATA, 0),
            ],
        }
    }

    /// The descriptor a selector refers to.
    #[must_use]
    pub fn get(&self, selector: u16) -> SegmentDescriptor {
        self.entries[usize::from(selector >> 3)]
    }
}

static GDT: Gdt = Gdt::new();

/// Pointer format required by `lgdt`.
#[repr(C, packed)]
struct DescTablePtr {
    /// Size of the table **minus one** in bytes.
    limit: u16,
    /// Linear address of the table.
    base: u32,
}

/// Loads [`GDT`] and reloads every segment register from it.
///
/// `CS` can only be changed by a far control transfer, so the routine pushes
/// the new selector and a return address and executes `retf`.
///
/// ### Safety / Ordering
/// - Run with interrupts disabled, before the IDT is loaded.
#[cfg(target_arch = "x86")]
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn init_gdt() {
    let ptr = DescTablePtr {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: core::ptr::from_ref(&GDT).addr() as u32,
    };

    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",
            "push {cs}",
            "mov {tmp}, offset 2f",
            "push {tmp}",
            "retf",
            "2:",
            "mov {tmp:x}, {ds}",
            "mov ds, {tmp:x}",
            "mov es, {tmp:x}",
            "mov fs, {tmp:x}",
            "mov gs, {tmp:x}",
            "mov ss, {tmp:x}",
            ptr = in(reg) &raw const ptr,
            cs = const KERNEL_CS,
            ds = const KERNEL_DS,
            tmp = out(reg) _,
            options(preserves_flags)
        );
    }
    log::debug!("GDT loaded, CS={KERNEL_CS:#04x} DS={KERNEL_DS:#04x}");
}

const _: () = assert!(size_of::<Gdt>() == 3 * 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_segments_encode_like_the_manual() {
        let gdt = Gdt::new();
        assert_eq!(gdt.get(0).into_bits(), 0);
        assert_eq!(gdt.get(KERNEL_CS).into_bits(), 0x00CF_9A00_0000_FFFF);
        assert_eq!(gdt.get(KERNEL_DS).into_bits(), 0x00CF_9200_0000_FFFF);
    }

    #[test]
    fn selectors() {
        assert_eq!(KERNEL_CS, 0x08);
        assert_eq!(KERNEL_DS, 0x10);
    }
}
