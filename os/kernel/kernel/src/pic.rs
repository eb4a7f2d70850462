//! # 8259A Programmable Interrupt Controller
//!
//! The two cascaded PICs power up delivering IRQs 0..16 on vectors 8..16 and
//! 0x70..0x78, right on top of the CPU exceptions. [`remap`] moves them to
//! [`IRQ_BASE`] and leaves every line masked except the cascade; drivers
//! unmask their line once their handler is registered.

use crate::ports::{inb, io_wait, outb};
use kernel_interrupts::vectors::IRQ_BASE;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: initialize, ICW4 follows.
const ICW1_INIT: u8 = 0x11;

/// ICW4: 8086 mode.
const ICW4_8086: u8 = 0x01;

/// Non-specific end of interrupt.
const EOI: u8 = 0x20;

/// The line the slave PIC is wired to on the master.
const CASCADE_LINE: u8 = 2;

/// Reprograms both PICs to deliver on `IRQ_BASE..IRQ_BASE + 16`.
///
/// # Safety
/// Run with interrupts disabled, before any IRQ is unmasked.
pub unsafe fn remap() {
    unsafe {
        outb(PIC1_COMMAND, ICW1_INIT);
        io_wait();
        outb(PIC2_COMMAND, ICW1_INIT);
        io_wait();
        outb(PIC1_DATA, IRQ_BASE);
        io_wait();
        outb(PIC2_DATA, IRQ_BASE + 8);
        io_wait();
        outb(PIC1_DATA, 1 << CASCADE_LINE);
        io_wait();
        outb(PIC2_DATA, CASCADE_LINE);
        io_wait();
        outb(PIC1_DATA, ICW4_8086);
        io_wait();
        outb(PIC2_DATA, ICW4_8086);
        io_wait();

        outb(PIC1_DATA, !(1 << CASCADE_LINE));
        outb(PIC2_DATA, 0xFF);
    }
    log::debug!("PIC remapped to vectors {IRQ_BASE}..{}", IRQ_BASE + 16);
}

/// Lets IRQ `line` through.
///
/// # Safety
/// A handler must be registered for the line's vector.
pub unsafe fn unmask(line: u8) {
    let port = if line < 8 { PIC1_DATA } else { PIC2_DATA };
    unsafe {
        let mask = inb(port) & !(1 << (line % 8));
        outb(port, mask);
    }
}

/// Acknowledges IRQ `line`; lines on the slave need both PICs acknowledged.
pub fn end_of_interrupt(line: u8) {
    // SAFETY: an EOI only tells the PIC the in-service interrupt is done.
    unsafe {
        if line >= 8 {
            outb(PIC2_COMMAND, EOI);
        }
        outb(PIC1_COMMAND, EOI);
    }
}
