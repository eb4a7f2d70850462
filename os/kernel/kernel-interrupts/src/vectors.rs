//! Interrupt vector numbers.

/// Page fault (`#PF`).
pub const PAGE_FAULT: u8 = 14;

/// Number of vectors reserved for CPU exceptions.
pub const EXCEPTION_COUNT: u8 = 32;

/// First vector the remapped master PIC delivers IRQs on.
pub const IRQ_BASE: u8 = 32;

/// Number of legacy PIC IRQ lines.
pub const IRQ_COUNT: u8 = 16;

/// IRQ 0, the PIT.
pub const TIMER: u8 = IRQ_BASE;

/// IRQ 1, the PS/2 keyboard.
pub const KEYBOARD: u8 = IRQ_BASE + 1;

#[inline]
#[must_use]
pub const fn is_exception(vector: u8) -> bool {
    vector < EXCEPTION_COUNT
}

/// The PIC line behind `vector`, if it is a hardware IRQ vector.
#[inline]
#[must_use]
pub const fn irq_line(vector: u8) -> Option<u8> {
    if vector >= IRQ_BASE && vector < IRQ_BASE + IRQ_COUNT {
        Some(vector - IRQ_BASE)
    } else {
        None
    }
}

/// Mnemonic of a CPU exception vector.
#[must_use]
pub const fn exception_name(vector: u8) -> &'static str {
    match vector {
        0 => "Divide Error",
        1 => "Debug",
        2 => "Non-Maskable Interrupt",
        3 => "Breakpoint",
        4 => "Overflow",
        5 => "BOUND Range Exceeded",
        6 => "Invalid Opcode",
        7 => "Device Not Available",
        8 => "Double Fault",
        9 => "Coprocessor Segment Overrun",
        10 => "Invalid TSS",
        11 => "Segment Not Present",
        12 => "Stack-Segment Fault",
        13 => "General Protection Fault",
        14 => "Page Fault",
        16 => "x87 Floating-Point Exception",
        17 => "Alignment Check",
        18 => "Machine Check",
        19 => "SIMD Floating-Point Exception",
        20 => "Virtualization Exception",
        0..32 => "Reserved",
        _ => "Not an exception",
    }
}

/// Whether the CPU pushes an error code for this exception vector.
#[must_use]
pub const fn has_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10..=14 | 17)
}
