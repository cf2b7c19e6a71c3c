//! Raw track layout: gaps, sync runs, address marks and CRC'd fields.
//!
//! A track is `bpt` recorded bytes followed by a clock-mark bitmap with one
//! bit per byte. A set bit means the byte was written with a missing clock
//! transition, which is how address marks are told apart from data:
//!
//! - FM: the mark byte itself (0xFC index, 0xFE ID, 0xF8..0xFB data) carries
//!   the clock bit.
//! - MFM: three 0xA1 sync bytes carry the clock bit and the mark byte that
//!   follows them is recorded normally.
//!
//! [`TrackCursor`] walks one track, either emitting fields (when it holds
//! mutable slices) or scanning for them. The rotational position is the
//! cursor's own `pos`, passed explicitly rather than kept on the disk.

use crate::bitmap;
use crate::buffer::ImageReader;
use crate::crc::CrcAccumulator;
use crate::error::TrackError;

pub const MARK_INDEX: u8 = 0xFC;
pub const MARK_ID: u8 = 0xFE;
pub const MARK_DATA: u8 = 0xFB;
pub const MARK_DELETED: u8 = 0xF8;
pub const MFM_SYNC: u8 = 0xA1;

/// One recorded byte with its clock-mark flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackByte {
    pub value: u8,
    pub clock_mark: bool,
}

impl TrackByte {
    /// Normally clocked byte.
    #[must_use]
    pub const fn data(value: u8) -> Self {
        Self {
            value,
            clock_mark: false,
        }
    }

    /// Byte recorded with a missing clock (address mark or MFM sync).
    #[must_use]
    pub const fn mark(value: u8) -> Self {
        Self {
            value,
            clock_mark: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Gap layouts
// ---------------------------------------------------------------------------

/// Byte values and lengths that make up one track style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapParams {
    /// Filler byte for gaps.
    pub gap: u8,
    /// Byte of the sync run before each address mark.
    pub sync: u8,
    pub sync_len: usize,
    /// MFM sync mark (0xA1) written three times; `None` for FM.
    pub mark: Option<u8>,
    /// Lengths of the pre-index, post-index, after-ID and after-data gaps.
    pub len: [usize; 4],
}

impl GapParams {
    const fn sync_marks(&self) -> usize {
        if self.mark.is_some() { 3 } else { 0 }
    }

    /// Sync run, MFM sync marks and the address mark byte.
    #[must_use]
    pub const fn address_mark_len(&self) -> usize {
        self.sync_len + self.sync_marks() + 1
    }
}

const GAPS: [GapParams; 6] = [
    GapParams {
        gap: 0x4E,
        sync: 0x00,
        sync_len: 12,
        mark: Some(MFM_SYNC),
        len: [0, 60, 22, 24],
    },
    GapParams {
        gap: 0x4E,
        sync: 0x00,
        sync_len: 12,
        mark: Some(MFM_SYNC),
        len: [0, 10, 22, 60],
    },
    GapParams {
        gap: 0xFF,
        sync: 0x00,
        sync_len: 6,
        mark: None,
        len: [40, 26, 11, 27],
    },
    GapParams {
        gap: 0x4E,
        sync: 0x00,
        sync_len: 12,
        mark: Some(MFM_SYNC),
        len: [80, 50, 22, 54],
    },
    GapParams {
        gap: 0xFF,
        sync: 0x00,
        sync_len: 6,
        mark: None,
        len: [0, 16, 11, 10],
    },
    GapParams {
        gap: 0x4E,
        sync: 0x00,
        sync_len: 12,
        mark: Some(MFM_SYNC),
        len: [0, 32, 22, 24],
    },
];

/// Track style used when synthesising tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapType {
    /// +D / DISCiPLE and SAM MFM layout.
    MgtPlusD,
    /// TR-DOS MFM layout (long gap III).
    TrDos,
    /// IBM 3740 FM.
    IbmFm,
    /// IBM System 34 MFM.
    IbmMfm,
    /// Tight FM layout for images that carry their own sector lists.
    MinimalFm,
    /// Tight MFM layout for images that carry their own sector lists.
    MinimalMfm,
}

impl GapType {
    #[must_use]
    pub const fn params(self) -> &'static GapParams {
        &GAPS[self as usize]
    }

    #[must_use]
    pub const fn is_mfm(self) -> bool {
        self.params().mark.is_some()
    }
}

/// Which gap of a [`GapParams`] to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapField {
    PreIndex = 0,
    PostIndex = 1,
    /// Gap II, between ID and data fields.
    AfterId = 2,
    /// Gap III, after a data field.
    AfterData = 3,
}

/// Sector size in bytes for an ID length code.
#[must_use]
pub const fn sector_length(code: u8) -> usize {
    0x80 << (code & 0x07)
}

/// ID length code for a sector size in bytes.
#[must_use]
pub const fn length_code(mut len: usize) -> u8 {
    let mut code = 0;
    while len > 0x80 {
        code += 1;
        len >>= 1;
    }
    code
}

/// Raw bytes taken by one sector (ID field, gap II, data field, gap III).
#[must_use]
pub const fn calc_sectorlen(sector_length: usize, gap: GapType) -> usize {
    let g = gap.params();
    g.address_mark_len() + 6 + g.len[GapField::AfterId as usize] + g.address_mark_len()
        + sector_length
        + 2
        + g.len[GapField::AfterData as usize]
}

/// Raw bytes taken by everything before the first sector.
#[must_use]
pub const fn calc_leadin(gap: GapType, preindex: bool) -> usize {
    let g = gap.params();
    let pre = if preindex {
        g.len[GapField::PreIndex as usize] + g.address_mark_len()
    } else {
        0
    };
    pre + g.len[GapField::PostIndex as usize]
}

// ---------------------------------------------------------------------------
// Field records
// ---------------------------------------------------------------------------

/// The four bytes of a sector ID field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorId {
    pub track: u8,
    pub head: u8,
    pub sector: u8,
    pub length: u8,
}

/// An ID field found on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdField {
    pub id: SectorId,
    /// Stored CRC bytes, high byte first.
    pub crc: u16,
    pub crc_ok: bool,
    /// Preceded by MFM sync marks rather than an FM clocked mark.
    pub mfm: bool,
}

/// A data address mark found on a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMark {
    pub value: u8,
    pub mfm: bool,
}

impl DataMark {
    /// Deleted data marks have the low bit clear (0xF8, 0xFA).
    #[must_use]
    pub const fn deleted(&self) -> bool {
        self.value & 0x01 == 0
    }
}

/// Contents of a data field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorData {
    pub bytes: Vec<u8>,
    pub deleted: bool,
    pub crc_ok: bool,
}

/// An ID field and, when one follows it, its data field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorRecord {
    pub id: IdField,
    pub data: Option<SectorData>,
}

/// Regular sector layout for [`TrackCursor::trackgen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLayout {
    /// Number of the first sector.
    pub sector_base: u8,
    pub sectors: u8,
    /// Sector size in bytes.
    pub sector_length: usize,
    pub gap: GapType,
    /// Physical distance between logically consecutive sectors.
    pub interleave: u8,
    /// Emit the pre-index gap and index mark.
    pub preindex: bool,
}

impl TrackLayout {
    /// Raw bytes this layout needs.
    #[must_use]
    pub const fn raw_len(&self) -> usize {
        calc_leadin(self.gap, self.preindex)
            + self.sectors as usize * calc_sectorlen(self.sector_length, self.gap)
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Position within one track's bytes and clock map.
#[derive(Debug)]
pub struct TrackCursor<B> {
    bytes: B,
    clocks: B,
    pos: usize,
}

/// Scanning-only cursor.
pub type TrackReader<'a> = TrackCursor<&'a [u8]>;
/// Cursor that can also emit fields.
pub type TrackWriter<'a> = TrackCursor<&'a mut [u8]>;

impl<B: AsRef<[u8]>> TrackCursor<B> {
    /// Cursor at the index hole.
    pub fn new(bytes: B, clocks: B) -> Self {
        Self {
            bytes,
            clocks,
            pos: 0,
        }
    }

    /// Bytes per track.
    #[must_use]
    pub fn bpt(&self) -> usize {
        self.bytes.as_ref().len()
    }

    #[must_use]
    pub const fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.bpt());
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Recorded bytes and clock map.
    #[must_use]
    pub fn raw(&self) -> (&[u8], &[u8]) {
        (self.bytes.as_ref(), self.clocks.as_ref())
    }

    #[must_use]
    pub fn byte_at(&self, i: usize) -> TrackByte {
        TrackByte {
            value: self.bytes.as_ref().get(i).copied().unwrap_or(0),
            clock_mark: bitmap::test(self.clocks.as_ref(), i),
        }
    }

    fn next_byte(&mut self) -> Option<TrackByte> {
        if self.pos >= self.bpt() {
            return None;
        }
        let b = self.byte_at(self.pos);
        self.pos += 1;
        Some(b)
    }

    /// Scan forward for the next ID field and read it.
    ///
    /// Leaves the cursor just past the ID's CRC bytes, or at the end of the
    /// track when nothing is found.
    pub fn id_read(&mut self) -> Option<IdField> {
        let mut a1mark = false;
        while self.pos < self.bpt() {
            let b = self.byte_at(self.pos);
            if b == TrackByte::mark(MFM_SYNC) {
                a1mark = true;
            } else if b.value == MARK_ID && (b.clock_mark || a1mark) {
                let mfm = a1mark && !b.clock_mark;
                if self.pos + 7 > self.bpt() {
                    self.pos = self.bpt();
                    return None;
                }
                let mut crc = if mfm {
                    CrcAccumulator::after_mfm_sync()
                } else {
                    CrcAccumulator::new()
                };
                crc.update(MARK_ID);
                self.pos += 1;
                let mut field = [0u8; 6];
                for f in &mut field {
                    *f = self.byte_at(self.pos).value;
                    crc.update(*f);
                    self.pos += 1;
                }
                return Some(IdField {
                    id: SectorId {
                        track: field[0],
                        head: field[1],
                        sector: field[2],
                        length: field[3],
                    },
                    crc: u16::from_be_bytes([field[4], field[5]]),
                    crc_ok: crc.is_clean(),
                    mfm,
                });
            } else {
                a1mark = false;
            }
            self.pos += 1;
        }
        None
    }

    /// Scan from the index hole for the ID of `sector`.
    pub fn id_seek(&mut self, sector: u8) -> Option<IdField> {
        self.rewind();
        while let Some(id) = self.id_read() {
            if id.id.sector == sector {
                return Some(id);
            }
        }
        None
    }

    /// Scan forward for a data address mark (0xF8..0xFB).
    ///
    /// Stops without a match when another ID or index mark comes first, so a
    /// sector with no data field never borrows its neighbour's. The cursor
    /// is left on that mark, or just past a found data mark.
    pub fn datamark_read(&mut self) -> Option<DataMark> {
        let mut a1mark = false;
        while self.pos < self.bpt() {
            let b = self.byte_at(self.pos);
            if b == TrackByte::mark(MFM_SYNC) {
                a1mark = true;
            } else if b.clock_mark || a1mark {
                match b.value {
                    0xF8..=0xFB => {
                        self.pos += 1;
                        return Some(DataMark {
                            value: b.value,
                            mfm: a1mark && !b.clock_mark,
                        });
                    }
                    0xFC..=0xFE => return None,
                    _ => a1mark = false,
                }
            } else {
                a1mark = false;
            }
            self.pos += 1;
        }
        None
    }

    /// Read the data field belonging to the ID just scanned.
    pub fn read_sector_data(&mut self, id: &IdField) -> Option<SectorData> {
        let mark = self.datamark_read()?;
        let len = sector_length(id.id.length);
        let mut crc = if mark.mfm {
            CrcAccumulator::after_mfm_sync()
        } else {
            CrcAccumulator::new()
        };
        crc.update(mark.value);

        let mut bytes = vec![0u8; len];
        let mut complete = true;
        for b in &mut bytes {
            match self.next_byte() {
                Some(t) => {
                    *b = t.value;
                    crc.update(t.value);
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        for _ in 0..2 {
            match self.next_byte() {
                Some(t) => crc.update(t.value),
                None => complete = false,
            }
        }
        Some(SectorData {
            bytes,
            deleted: mark.deleted(),
            crc_ok: complete && crc.is_clean(),
        })
    }

    /// Every ID on the track in physical order, with its data field.
    pub fn sectors(&mut self) -> Vec<SectorRecord> {
        self.rewind();
        let mut out = Vec::new();
        while let Some(id) = self.id_read() {
            let data = self.read_sector_data(&id);
            out.push(SectorRecord { id, data });
        }
        out
    }

    /// Data of `sector`, scanning from the index hole.
    pub fn find_sector(&mut self, sector: u8) -> Option<SectorRecord> {
        let id = self.id_seek(sector)?;
        let data = self.read_sector_data(&id);
        Some(SectorRecord { id, data })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TrackCursor<B> {
    /// Record `b` at the cursor and advance.
    fn emit(&mut self, b: TrackByte) {
        let pos = self.pos;
        if let Some(slot) = self.bytes.as_mut().get_mut(pos) {
            *slot = b.value;
            if b.clock_mark {
                bitmap::set(self.clocks.as_mut(), pos);
            } else {
                bitmap::reset(self.clocks.as_mut(), pos);
            }
            self.pos += 1;
        }
    }

    fn fill(&mut self, value: u8, n: usize) {
        for _ in 0..n {
            self.emit(TrackByte::data(value));
        }
    }

    /// Overwrite byte `i` without moving the cursor.
    pub fn poke(&mut self, i: usize, b: TrackByte) {
        let saved = self.pos;
        self.pos = i;
        self.emit(b);
        self.pos = saved;
    }

    /// Replace the track with raw bytes and their clock map, padding with
    /// `fill` when `data` is shorter than the track.
    pub fn load_raw(&mut self, data: &[u8], clocks: &[u8], fill: u8) {
        let bytes = self.bytes.as_mut();
        let n = data.len().min(bytes.len());
        bytes[..n].copy_from_slice(&data[..n]);
        bytes[n..].fill(fill);
        let map = self.clocks.as_mut();
        map.fill(0);
        for i in (0..n).filter(|&i| bitmap::test(clocks, i)) {
            bitmap::set(map, i);
        }
        self.pos = 0;
    }

    /// Fill the whole track with `value` and no marks.
    pub fn clear(&mut self, value: u8) {
        self.bytes.as_mut().fill(value);
        self.clocks.as_mut().fill(0);
        self.pos = 0;
    }

    /// Sync run, MFM sync marks and an address mark, folding the checksummed
    /// part into `crc`.
    fn address_mark(&mut self, gap: GapType, mark: u8, crc: &mut CrcAccumulator) {
        let g = gap.params();
        self.fill(g.sync, g.sync_len);
        crc.reset();
        if let Some(sync) = g.mark {
            for _ in 0..3 {
                self.emit(TrackByte::mark(sync));
                crc.update(sync);
            }
            self.emit(TrackByte::data(mark));
        } else {
            self.emit(TrackByte::mark(mark));
        }
        crc.update(mark);
    }

    pub fn gap_add(&mut self, field: GapField, gap: GapType) -> Result<(), TrackError> {
        let g = gap.params();
        let len = g.len[field as usize];
        if self.pos + len >= self.bpt() {
            return Err(TrackError::Overflow);
        }
        self.fill(g.gap, len);
        Ok(())
    }

    /// Pre-index gap followed by the index address mark.
    pub fn preindex_add(&mut self, gap: GapType) -> Result<(), TrackError> {
        let g = gap.params();
        if self.pos + g.len[GapField::PreIndex as usize] + g.address_mark_len() >= self.bpt() {
            return Err(TrackError::Overflow);
        }
        self.gap_add(GapField::PreIndex, gap)?;
        let mut crc = CrcAccumulator::new();
        self.address_mark(gap, MARK_INDEX, &mut crc);
        Ok(())
    }

    pub fn postindex_add(&mut self, gap: GapType) -> Result<(), TrackError> {
        self.gap_add(GapField::PostIndex, gap)
    }

    /// Fill from the cursor to the end of the track.
    pub fn gap4_add(&mut self, gap: GapType) -> Result<(), TrackError> {
        if self.pos > self.bpt() {
            return Err(TrackError::Overflow);
        }
        let len = self.bpt() - self.pos;
        self.fill(gap.params().gap, len);
        Ok(())
    }

    /// ID field followed by gap II. With `crc_error` the stored CRC is the
    /// complement of the correct one.
    pub fn id_add(&mut self, id: SectorId, gap: GapType, crc_error: bool) -> Result<(), TrackError> {
        if self.pos + gap.params().address_mark_len() + 6 >= self.bpt() {
            return Err(TrackError::Overflow);
        }
        let mut crc = CrcAccumulator::new();
        self.address_mark(gap, MARK_ID, &mut crc);
        for b in [id.track, id.head, id.sector, id.length] {
            self.emit(TrackByte::data(b));
            crc.update(b);
        }
        self.emit_crc(crc.value(), crc_error);
        self.gap_add(GapField::AfterId, gap)
    }

    fn emit_crc(&mut self, crc: u16, crc_error: bool) {
        let crc = if crc_error { !crc } else { crc };
        let [hi, lo] = crc.to_be_bytes();
        self.emit(TrackByte::data(hi));
        self.emit(TrackByte::data(lo));
    }

    /// Sync run and data address mark, returning the running CRC.
    pub fn datamark_add(&mut self, deleted: bool, gap: GapType) -> Result<CrcAccumulator, TrackError> {
        if self.pos + gap.params().address_mark_len() >= self.bpt() {
            return Err(TrackError::Overflow);
        }
        let mark = if deleted { MARK_DELETED } else { MARK_DATA };
        let mut crc = CrcAccumulator::new();
        self.address_mark(gap, mark, &mut crc);
        Ok(crc)
    }

    /// Data field of `len` bytes followed by gap III.
    ///
    /// `data` shorter than `len` is padded with `autofill`; without a fill
    /// byte that is an error.
    pub fn data_add(
        &mut self,
        data: &[u8],
        len: usize,
        deleted: bool,
        gap: GapType,
        crc_error: bool,
        autofill: Option<u8>,
    ) -> Result<(), TrackError> {
        let mut crc = self.datamark_add(deleted, gap)?;
        if self.pos + len + 2 >= self.bpt() {
            return Err(TrackError::Overflow);
        }
        let fill = if data.len() < len {
            autofill.ok_or(TrackError::ShortData)?
        } else {
            0
        };
        for i in 0..len {
            let b = data.get(i).copied().unwrap_or(fill);
            self.emit(TrackByte::data(b));
            crc.update(b);
        }
        self.emit_crc(crc.value(), crc_error);
        self.gap_add(GapField::AfterData, gap)
    }

    /// Overwrite the data field of the ID just scanned, keeping its mark.
    pub fn write_sector_data(&mut self, id: &IdField, data: &[u8]) -> Result<(), TrackError> {
        let mark = self.datamark_read().ok_or(TrackError::ShortData)?;
        let len = sector_length(id.id.length);
        if self.pos + len + 2 > self.bpt() {
            return Err(TrackError::Overflow);
        }
        let mut crc = if mark.mfm {
            CrcAccumulator::after_mfm_sync()
        } else {
            CrcAccumulator::new()
        };
        crc.update(mark.value);
        for i in 0..len {
            let b = data.get(i).copied().unwrap_or(0);
            self.emit(TrackByte::data(b));
            crc.update(b);
        }
        self.emit_crc(crc.value(), false);
        Ok(())
    }

    /// Format the whole track with a regular sector layout.
    ///
    /// Sector data is taken from `src` in logical order. Sectors are placed
    /// physically `interleave` slots apart, wrapping round to the first free
    /// slot, so 16 sectors at interleave 2 come out as 1, 9, 2, 10, ...
    pub fn trackgen(
        &mut self,
        head: u8,
        cylinder: u8,
        layout: &TrackLayout,
        src: &mut ImageReader<'_>,
        autofill: Option<u8>,
    ) -> Result<(), TrackError> {
        let gap = layout.gap;
        let slen = calc_sectorlen(layout.sector_length, gap);
        let sectors = layout.sectors as usize;
        let interleave = layout.interleave.max(1) as usize;
        let length = length_code(layout.sector_length);

        self.rewind();
        if layout.preindex {
            self.preindex_add(gap)?;
        }
        self.postindex_add(gap)?;

        let first = self.pos;
        let (mut slot, mut lap) = (0usize, 0usize);
        for s in 0..sectors {
            self.pos = first + slot * slen;
            let id = SectorId {
                track: cylinder,
                head,
                sector: layout.sector_base.wrapping_add(s as u8),
                length,
            };
            self.id_add(id, gap, false)?;
            let data = src.take(layout.sector_length);
            self.data_add(data, layout.sector_length, false, gap, false, autofill)?;

            slot += interleave;
            if slot >= sectors {
                slot -= sectors;
                if slot <= lap {
                    slot += 1;
                    lap += 1;
                }
            }
        }
        self.pos = first + sectors * slen;
        self.gap4_add(gap)
    }
}
