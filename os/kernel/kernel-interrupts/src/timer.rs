use crate::InterruptHandler;

/// Input clock of the 8253/8254 programmable interval timer.
pub const PIT_OSCILLATOR_HZ: u32 = 1_193_180;

/// Data port of PIT channel 0 (wired to IRQ 0).
pub const PIT_CHANNEL0: u16 = 0x40;

/// PIT mode/command register.
pub const PIT_COMMAND: u16 = 0x43;

/// Channel 0, low byte then high byte, mode 3 (square wave), binary.
pub const PIT_MODE_SQUARE_WAVE: u8 = 0x36;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TimerError {
    #[error("{hz} Hz is too low for a 16-bit PIT divisor")]
    FrequencyTooLow { hz: u32 },
    #[error("{hz} Hz exceeds the PIT input clock")]
    FrequencyTooHigh { hz: u32 },
}

/// Reload value that makes channel 0 fire at `hz`.
///
/// # Errors
/// The divisor must fit the 16-bit reload register and be non-zero.
#[allow(clippy::cast_possible_truncation)]
pub const fn pit_divisor(hz: u32) -> Result<u16, TimerError> {
    if hz == 0 {
        return Err(TimerError::FrequencyTooLow { hz });
    }
    let divisor = PIT_OSCILLATOR_HZ / hz;
    if divisor == 0 {
        return Err(TimerError::FrequencyTooHigh { hz });
    }
    if divisor > u16::MAX as u32 {
        return Err(TimerError::FrequencyTooLow { hz });
    }
    Ok(divisor as u16)
}

/// A periodic interrupt source the scheduler can ride on.
pub trait PeriodicTimer {
    /// Routes the timer vector to `handler` and starts firing at `hz`.
    ///
    /// # Errors
    /// If the hardware cannot produce `hz`.
    fn arm(&mut self, hz: u32, handler: &'static dyn InterruptHandler) -> Result<(), TimerError>;
}
