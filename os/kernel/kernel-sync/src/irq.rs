//! Interrupt flag control.
//!
//! On the bare-metal target these are `cli`, `sti` and `pushfd; pop`. Hosted
//! builds (unit tests of the scheduler and allocator crates) get a per-thread
//! simulated `IF` bit instead, which starts out cleared just like it is when
//! the boot loader hands over control.

/// Bit 9 of `EFLAGS`.
pub const EFLAGS_IF: u32 = 1 << 9;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod imp {
    #[inline]
    pub fn cli() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn sti() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn eflags() -> u32 {
        let r: u32;
        unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(preserves_flags)) }
        r
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod imp {
    use super::EFLAGS_IF;
    use std::cell::Cell;

    std::thread_local! {
        static IF: Cell<bool> = const { Cell::new(false) };
    }

    pub fn cli() {
        IF.with(|f| f.set(false));
    }

    pub fn sti() {
        IF.with(|f| f.set(true));
    }

    pub fn eflags() -> u32 {
        // Bit 1 always reads as one.
        let base = 0b10;
        if IF.with(Cell::get) { base | EFLAGS_IF } else { base }
    }
}

/// Disables hardware interrupts (`cli`).
///
/// # Privilege
///
/// Must only be called at ring 0.
#[inline]
pub fn cli_stop_interrupts() {
    imp::cli();
}

/// Enables hardware interrupts (`sti`).
///
/// # Privilege
///
/// Must only be called at ring 0.
#[inline]
pub fn sti_enable_interrupts() {
    imp::sti();
}

/// Returns the current `EFLAGS` value.
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    imp::eflags()
}

/// Whether `IF` is currently set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    eflags() & EFLAGS_IF != 0
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit. If interrupts were enabled, it
/// executes `cli`. On drop, it executes `sti` **only** if they were previously
/// enabled, so guards nest: an inner guard created inside an interrupt handler
/// or another critical section never re-enables interrupts early.
///
/// # Examples
///
/// ```
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled, sti_enable_interrupts};
///
/// sti_enable_interrupts();
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert!(interrupts_enabled());
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether dropping this guard will re-enable interrupts.
    #[inline]
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest() {
        sti_enable_interrupts();
        let outer = IrqGuard::new();
        assert!(outer.restores_interrupts());
        {
            let inner = IrqGuard::new();
            assert!(!inner.restores_interrupts());
        }
        assert!(!interrupts_enabled());
        drop(outer);
        assert!(interrupts_enabled());
    }

    #[test]
    fn guard_keeps_disabled_state() {
        cli_stop_interrupts();
        {
            let _g = IrqGuard::new();
        }
        assert!(!interrupts_enabled());
    }
}
