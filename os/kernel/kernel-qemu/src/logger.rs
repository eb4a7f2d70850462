use crate::qemu_fmt::QemuSink;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// The kernel's global logger instance.
pub static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Info);

/// Installs [`LOGGER`] with the given maximum level.
///
/// Call this once during early init.
///
/// # Errors
/// Fails if a logger was already installed.
pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.set_max_level(max_level);
    log::set_logger(&LOGGER)?;
    log::set_max_level(max_level);
    Ok(())
}

/// Formats a record as `"[LEVEL] target: message\n"` without allocating.
///
/// # Errors
/// Propagates errors of the underlying writer.
pub fn write_record(out: &mut impl fmt::Write, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

pub struct QemuLogger {
    max_level: AtomicUsize,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self {
            max_level: AtomicUsize::new(max_level as usize),
        }
    }

    /// Changes the level filter, for example after the command line was parsed.
    pub fn set_max_level(&self, level: LevelFilter) {
        self.max_level.store(level as usize, Ordering::Relaxed);
        log::set_max_level(level);
    }

    #[must_use]
    pub fn max_level(&self) -> LevelFilter {
        match self.max_level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = write_record(&mut QemuSink, record);
    }

    fn flush(&self) {}
}
