//! # Interrupt Entry and Dispatch
//!
//! Every CPU exception (vectors 0..32) and every legacy PIC IRQ (vectors
//! 32..48) enters through a tiny naked stub generated by [`isr_stubs!`]. The
//! stub normalizes the stack (pushing a dummy error code where the CPU does
//! not push one) and the vector number, then jumps to [`isr_common`], which
//! saves the remaining registers so that the stack pointer addresses an
//! [`InterruptFrame`].
//!
//! [`interrupt_dispatch`] acknowledges IRQs at the PIC first, then runs the
//! handler registered in [`HANDLERS`]. The acknowledgement has to come first
//! because the timer handler switches tasks and may not return here for a
//! whole round.

use crate::gdt::KERNEL_DS;
use crate::pic;
use kernel_interrupts::vectors::{self, has_error_code};
use kernel_interrupts::{
    Dispatch, HandlerTable, InterruptFrame, InterruptHandler, InterruptRegistry, dispatch_to,
};
use kernel_sync::IrqLock;

/// Vector-to-handler table shared by all stubs.
static HANDLERS: IrqLock<HandlerTable> = IrqLock::new(HandlerTable::new());

/// Installs `handler` for `vector`.
pub fn register_interrupt_handler(vector: u8, handler: &'static dyn InterruptHandler) {
    HANDLERS.with_lock(|table| table.register(vector, handler));
}

/// [`InterruptRegistry`] backed by [`HANDLERS`].
///
/// Subsystems that register their own handlers during setup take this
/// instead of the table, so the table lock is only held per registration.
#[derive(Debug, Default, Copy, Clone)]
pub struct KernelRegistry;

impl InterruptRegistry for KernelRegistry {
    fn register_interrupt_handler(&mut self, vector: u8, handler: &'static dyn InterruptHandler) {
        register_interrupt_handler(vector, handler);
    }
}

/// Generates one naked entry stub per vector and the [`STUBS`] list.
macro_rules! isr_stubs {
    ($($name:ident = $vector:literal),* $(,)?) => {
        $(
            #[unsafe(naked)]
            #[allow(clippy::cast_lossless)]
            unsafe extern "C" fn $name() {
                core::arch::naked_asm!(
                    ".if {error_code} == 0",
                    "push 0",
                    ".endif",
                    "push {vector}",
                    "jmp {common}",
                    error_code = const has_error_code($vector) as u8,
                    vector = const $vector,
                    common = sym isr_common,
                );
            }
        )*

        /// Entry stub of every wired vector.
        const STUBS: &[(u8, unsafe extern "C" fn())] = &[$(($vector, $name)),*];
    };
}

isr_stubs! {
    isr0 = 0, isr1 = 1, isr2 = 2, isr3 = 3, isr4 = 4, isr5 = 5, isr6 = 6, isr7 = 7,
    isr8 = 8, isr9 = 9, isr10 = 10, isr11 = 11, isr12 = 12, isr13 = 13, isr14 = 14, isr15 = 15,
    isr16 = 16, isr17 = 17, isr18 = 18, isr19 = 19, isr20 = 20, isr21 = 21, isr22 = 22, isr23 = 23,
    isr24 = 24, isr25 = 25, isr26 = 26, isr27 = 27, isr28 = 28, isr29 = 29, isr30 = 30, isr31 = 31,
    irq0 = 32, irq1 = 33, irq2 = 34, irq3 = 35, irq4 = 36, irq5 = 37, irq6 = 38, irq7 = 39,
    irq8 = 40, irq9 = 41, irq10 = 42, irq11 = 43, irq12 = 44, irq13 = 45, irq14 = 46, irq15 = 47,
}

/// `(vector, stub address)` pairs for [`Idt::with_stubs`](crate::idt::Idt::with_stubs).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn stubs() -> impl Iterator<Item = (u8, u32)> {
    STUBS.iter().map(|&(vector, stub)| (vector, stub as usize as u32))
}

/// Shared tail of all stubs.
///
/// ```text
///          ┌──────────┐
///          │ ss       │ only on a privilege change
///          │ useresp  │ only on a privilege change
///          │ eflags   │
///          │ cs       │
///          │ eip      │
///          │ err_code │ CPU or stub
///          │ vector   │ stub
///          │ pushad   │ eax .. edi
///  esp ─►  │ ds       │
///          └──────────┘
/// ```
#[unsafe(naked)]
unsafe extern "C" fn isr_common() {
    core::arch::naked_asm!(
        "pushad",
        "mov ax, ds",
        "push eax",
        "mov ax, {kernel_ds}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "cld",
        "push esp",
        "call {dispatch}",
        "add esp, 4",
        "pop eax",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "popad",
        "add esp, 8",
        "iretd",
        kernel_ds = const KERNEL_DS,
        dispatch = sym interrupt_dispatch,
    );
}

/// Routes one interrupt to its handler.
extern "C" fn interrupt_dispatch(frame: &mut InterruptFrame) {
    let vector = frame.vector();
    if let Some(line) = vectors::irq_line(vector) {
        pic::end_of_interrupt(line);
    }

    // Copied out so the handler runs without the table lock.
    let handler = HANDLERS.with_lock(|table| table.get(vector));
    if dispatch_to(handler, frame) == Dispatch::UnhandledException {
        panic!(
            "unhandled exception {vector} ({}) at {:#010x}, error code {:#x}",
            vectors::exception_name(vector),
            frame.eip,
            frame.err_code
        );
    }
}
