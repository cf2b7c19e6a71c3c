//! Checksums used on the medium and in image containers.
//!
//! Sector ID and data fields carry the CCITT CRC-16 (polynomial 0x1021,
//! MSB first) seeded with 0xFFFF. In MFM the three 0xA1 sync bytes that
//! precede an address mark are part of the checksummed run. UDI files end
//! with a reflected CRC-32.

/// Seed for every FDC field checksum.
pub const CRC_FDC_SEED: u16 = 0xFFFF;

/// Checksum after the three MFM 0xA1 sync bytes have been added to the seed.
pub const CRC_AFTER_MFM_SYNC: u16 = 0xCDB4;

/// Seed for the UDI container checksum.
pub const CRC_UDI_SEED: u32 = 0xFFFF_FFFF;

/// Fold one byte into an FDC CRC-16.
#[must_use]
pub const fn crc_fdc(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    let mut bit = 0;
    while bit < 8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ 0x1021
        } else {
            crc << 1
        };
        bit += 1;
    }
    crc
}

/// Fold one byte into a UDI CRC-32.
#[must_use]
pub const fn crc_udi(crc: u32, byte: u8) -> u32 {
    let mut crc = crc ^ 0xFFFF_FFFF ^ byte as u32;
    let mut bit = 0;
    while bit < 8 {
        let mask = (crc & 1).wrapping_neg();
        crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        bit += 1;
    }
    crc ^ 0xFFFF_FFFF
}

/// UDI CRC-32 of a whole buffer.
#[must_use]
pub fn crc_udi_slice(bytes: &[u8]) -> u32 {
    bytes.iter().fold(CRC_UDI_SEED, |crc, &b| crc_udi(crc, b))
}

/// Running CRC-16 over an address-marked field.
///
/// A field whose stored checksum is included in the run leaves a residual
/// of zero when it is intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcAccumulator {
    value: u16,
}

impl CrcAccumulator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: CRC_FDC_SEED,
        }
    }

    /// Accumulator already holding the three MFM sync bytes.
    #[must_use]
    pub const fn after_mfm_sync() -> Self {
        Self {
            value: CRC_AFTER_MFM_SYNC,
        }
    }

    pub fn reset(&mut self) {
        self.value = CRC_FDC_SEED;
    }

    /// Reset to the post-sync value (WRITE TRACK 0xF5 handling).
    pub fn preset_mfm_sync(&mut self) {
        self.value = CRC_AFTER_MFM_SYNC;
    }

    pub fn update(&mut self, byte: u8) {
        self.value = crc_fdc(self.value, byte);
    }

    pub fn update_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.update(b);
        }
    }

    #[must_use]
    pub const fn value(&self) -> u16 {
        self.value
    }

    /// True once a field and its stored CRC have both been folded in intact.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.value == 0
    }
}

impl Default for CrcAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
