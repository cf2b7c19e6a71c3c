//! Processor clock used for millisecond to tstate conversion.

use crate::Tstates;

/// Speed of the emulated CPU.
///
/// All controller and drive delays are written in milliseconds (or in disk
/// revolutions) and converted through this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessorClock {
    /// Clock frequency in Hz (e.g. `3_500_000` for the 48K Spectrum).
    pub speed_hz: u32,
}

impl ProcessorClock {
    /// 48K Spectrum Z80 clock.
    pub const SPECTRUM_48K: Self = Self::new(3_500_000);
    /// 128K / +2 / +3 Z80 clock.
    pub const SPECTRUM_128K: Self = Self::new(3_546_900);

    #[must_use]
    pub const fn new(speed_hz: u32) -> Self {
        Self { speed_hz }
    }

    /// Tstates in `ms` milliseconds.
    #[must_use]
    pub const fn ms(&self, ms: u64) -> Tstates {
        Tstates(ms * self.speed_hz as u64 / 1000)
    }

    /// Tstates in `num / den` of a millisecond interval of `ms`.
    ///
    /// Used for partial revolutions: `fraction(200, bytes, bpt)` is the time
    /// a 300 rpm disk needs to pass `bytes` of a `bpt` byte track under the
    /// head.
    #[must_use]
    pub const fn fraction(&self, ms: u64, num: u64, den: u64) -> Tstates {
        if den == 0 {
            return self.ms(ms);
        }
        Tstates(ms * self.speed_hz as u64 / 1000 * num / den)
    }
}

impl Default for ProcessorClock {
    fn default() -> Self {
        Self::SPECTRUM_48K
    }
}
