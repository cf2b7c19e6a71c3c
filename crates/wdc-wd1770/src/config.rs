//! Controller model selection and interface wiring quirks.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Chip variant. The variants differ in step rates, settle delays and in
/// whether the chip drives the spindle motor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Wd17xxModel {
    /// +D, DISCiPLE, Opus-style interfaces.
    #[default]
    Wd1770,
    /// WD1770 with the faster step table.
    Wd1772,
    /// No motor line; head load instead. Head compare in Type II/III.
    Wd1773,
    /// Beta 128 / TR-DOS interfaces.
    Fd1793,
}

impl Wd17xxModel {
    /// Step rates in milliseconds, indexed by command bits 1..0.
    #[must_use]
    pub const fn step_rates(self) -> [u64; 4] {
        match self {
            Self::Wd1772 => [6, 12, 2, 3],
            Self::Wd1770 | Self::Wd1773 | Self::Fd1793 => [6, 12, 20, 30],
        }
    }

    /// Settle delay for the Type II/III `E` flag, in milliseconds.
    #[must_use]
    pub const fn settle_ms(self) -> u64 {
        if self.has_motor_line() { 30 } else { 15 }
    }

    /// WD1770 and WD1772 spin the motor up themselves; the others load the
    /// head instead.
    #[must_use]
    pub const fn has_motor_line(self) -> bool {
        matches!(self, Self::Wd1770 | Self::Wd1772)
    }

    /// Whether Type II/III commands may compare the ID head byte.
    #[must_use]
    pub const fn has_head_compare(self) -> bool {
        !self.has_motor_line()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Wd1770 => "WD1770",
            Self::Wd1772 => "WD1772",
            Self::Wd1773 => "WD1773",
            Self::Fd1793 => "FD1793",
        }
    }
}

bitflags! {
    /// Interface-specific controller behaviour.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct FdcFlags: u8 {
        /// Raise LOST DATA when the host leaves DRQ unserviced for a
        /// whole revolution.
        const DRQ_TIMEOUT = 0x01;
        /// The head-load line is tied active (Beta 128 style wiring).
        const HEAD_ALWAYS_LOADED = 0x02;
    }
}

/// Controller configuration, as a machine description would carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdcConfig {
    pub model: Wd17xxModel,
    /// CPU clock in Hz, for converting delays to tstates.
    pub processor_speed: u32,
    #[serde(default)]
    pub flags: FdcFlags,
}

impl FdcConfig {
    #[must_use]
    pub const fn new(model: Wd17xxModel, processor_speed: u32) -> Self {
        Self {
            model,
            processor_speed,
            flags: FdcFlags::empty(),
        }
    }

    #[must_use]
    pub const fn with_flags(mut self, flags: FdcFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl Default for FdcConfig {
    fn default() -> Self {
        Self::new(Wd17xxModel::Wd1770, 3_500_000)
    }
}
