//! # x86 I/O Port Access
//!
//! Thin wrappers around the `in` and `out` instructions for the legacy
//! devices this kernel drives through the I/O port space:
//!
//! ```text
//! 0x0020-0x0021   Programmable Interrupt Controller (PIC) #1
//! 0x0040-0x0043   Programmable Interval Timer (PIT)
//! 0x0080          POST diagnostic port (used for I/O delays)
//! 0x00A0-0x00A1   PIC #2
//! 0x00E9          QEMU/Bochs debug console (see `kernel-qemu`)
//! ```
//!
//! ## Safety Requirements
//!
//! All port accesses are `unsafe`. Callers must run at CPL 0, target the
//! intended device register, and follow that device's protocol. Multi-step
//! sequences (such as the PIC initialization words) must not be interleaved
//! with other accesses to the same device, which in this kernel means running
//! them with interrupts disabled.

/// Write one byte to an I/O port.
///
/// # Safety
/// - **Privilege:** Execute at CPL0, otherwise the CPU raises `#GP`.
/// - **Correct port:** `port` must belong to the intended device and be in a
///   state that accepts this write. Writing the wrong value can wedge the
///   system (e.g., masking every IRQ or stopping the timer).
/// - **Ordering:** `out` is not a memory fence.
#[inline]
pub unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
}

/// Read one byte from an I/O port.
///
/// # Safety
/// - **Privilege:** Execute at CPL0, otherwise the CPU raises `#GP`.
/// - **Correct port:** `port` must be a readable register of the intended
///   device; some reads have side effects.
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let mut v: u8;
    unsafe {
        core::arch::asm!("in al, dx", in("dx") port, out("al") v, options(nomem, nostack, preserves_flags));
    }
    v
}

/// Gives a slow device time to settle between two writes.
///
/// Writes to the unused POST port `0x80`, which takes roughly a microsecond.
#[inline]
pub fn io_wait() {
    // SAFETY: port 0x80 is not decoded by anything we care about.
    unsafe { outb(0x80, 0) };
}
