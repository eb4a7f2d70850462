//! # QEMU Debug Console Support
//!
//! Logging for a kernel running under QEMU (or Bochs) through the debug
//! console port `0xE9`. Every byte written to that port shows up on the
//! host, long before any display driver exists.
//!
//! ```text
//! log::info!(..) → QemuLogger → write_record → QemuSink → out 0xE9, al
//! ```
//!
//! ## Features
//!
//! * `enabled` (default): bytes go to the port. Without it, or when not
//!   building for a bare-metal target, the sink silently drops output.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use log::LevelFilter;
//!
//! kernel_qemu::init(LevelFilter::Debug).expect("logger initialization");
//! log::info!("kernel subsystem initialized");
//! ```
//!
//! On the host, capture the output with `qemu-system-i386 -debugcon stdio`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{LOGGER, QemuLogger, init, write_record};

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// Bochs/QEMU debug console port.
    pub const QEMU_DEBUG_PORT: u16 = 0xE9;

    /// Write a single byte to the debug console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(feature = "enabled", target_os = "none"))]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(all(feature = "enabled", target_os = "none")))]
        let _ = c;
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort debug output.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

/// `print!`-style output straight to the debug console, bypassing `log`.
///
/// Used by the panic path, where the logger may be the thing that broke.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
