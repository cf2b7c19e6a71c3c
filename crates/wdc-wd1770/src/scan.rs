//! Address-mark recognisers fed one track byte at a time.
//!
//! The scanners hold no reference to the drive: the controller pulls a byte
//! from the drive, hands it over and decides from the [`Scan`] result (and
//! its own revolution budget) whether to keep going.

use format_spectrum_disk::{CrcAccumulator, DataMark, IdField, SectorId, TrackByte};

/// Gap bytes tolerated between an ID field and its data mark.
const DATAMARK_GAP_MFM: usize = 40;
const DATAMARK_GAP_FM: usize = 30;
/// Sync field in front of a data mark: 12 zeros and three A1 marks in MFM,
/// six zeros in FM.
const SYNC_MFM: usize = 12 + 3;
const SYNC_FM: usize = 6;

const ID_MARK: u8 = 0xFE;
const INDEX_MARK: u8 = 0xFC;
const MFM_SYNC: u8 = 0xA1;

/// Progress of a bounded search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan<T> {
    /// Nothing yet; feed more bytes.
    Scanning,
    Found(T),
    /// The search window closed without a match.
    Exhausted,
}

/// Recognises an ID address mark and collects the six bytes behind it.
#[derive(Debug, Clone)]
pub struct IdScanner {
    mfm: bool,
    syncs: u8,
    field: Option<(CrcAccumulator, [u8; 6], usize)>,
}

impl IdScanner {
    #[must_use]
    pub const fn new(mfm: bool) -> Self {
        Self {
            mfm,
            syncs: 0,
            field: None,
        }
    }

    /// Take the next byte under the head. `None` (no data) breaks any
    /// partial match.
    pub fn feed(&mut self, byte: Option<TrackByte>) -> Scan<IdField> {
        let Some(byte) = byte else {
            self.syncs = 0;
            self.field = None;
            return Scan::Scanning;
        };

        if let Some((crc, bytes, got)) = self.field.as_mut() {
            crc.update(byte.value);
            bytes[*got] = byte.value;
            *got += 1;
            if *got < bytes.len() {
                return Scan::Scanning;
            }
            let field = IdField {
                id: SectorId {
                    track: bytes[0],
                    head: bytes[1],
                    sector: bytes[2],
                    length: bytes[3],
                },
                crc: u16::from_be_bytes([bytes[4], bytes[5]]),
                crc_ok: crc.is_clean(),
                mfm: self.mfm,
            };
            self.field = None;
            self.syncs = 0;
            return Scan::Found(field);
        }

        if self.mfm {
            if byte.clock_mark && byte.value == MFM_SYNC {
                self.syncs = (self.syncs + 1).min(3);
            } else {
                if self.syncs >= 3 && !byte.clock_mark && byte.value == ID_MARK {
                    let mut crc = CrcAccumulator::after_mfm_sync();
                    crc.update(ID_MARK);
                    self.field = Some((crc, [0; 6], 0));
                }
                self.syncs = 0;
            }
        } else if byte.clock_mark && byte.value == ID_MARK {
            let mut crc = CrcAccumulator::new();
            crc.update(ID_MARK);
            self.field = Some((crc, [0; 6], 0));
        }
        Scan::Scanning
    }
}

/// Looks for the data mark that follows an ID field, within the gap II
/// window the controller allows.
#[derive(Debug, Clone)]
pub struct DataMarkScanner {
    mfm: bool,
    syncs: u8,
    left: usize,
}

impl DataMarkScanner {
    #[must_use]
    pub const fn new(mfm: bool) -> Self {
        let left = if mfm {
            DATAMARK_GAP_MFM + SYNC_MFM + 1
        } else {
            DATAMARK_GAP_FM + SYNC_FM + 1
        };
        Self { mfm, syncs: 0, left }
    }

    pub fn feed(&mut self, byte: Option<TrackByte>) -> Scan<DataMark> {
        let Some(byte) = byte else {
            return Scan::Exhausted;
        };
        if self.left == 0 {
            return Scan::Exhausted;
        }
        self.left -= 1;

        if self.mfm {
            if byte.clock_mark && byte.value == MFM_SYNC {
                self.syncs = (self.syncs + 1).min(3);
                return self.window();
            }
            let synced = self.syncs >= 3;
            self.syncs = 0;
            if synced && !byte.clock_mark {
                return match byte.value {
                    0xF8..=0xFB => Scan::Found(DataMark {
                        value: byte.value,
                        mfm: true,
                    }),
                    // Next ID field came first
                    _ => Scan::Exhausted,
                };
            }
        } else if byte.clock_mark {
            return match byte.value {
                0xF8..=0xFB => Scan::Found(DataMark {
                    value: byte.value,
                    mfm: false,
                }),
                ID_MARK | INDEX_MARK => Scan::Exhausted,
                _ => self.window(),
            };
        }
        self.window()
    }

    const fn window(&self) -> Scan<DataMark> {
        if self.left == 0 { Scan::Exhausted } else { Scan::Scanning }
    }
}
