//! The in-memory raw track buffer.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bitmap;
use crate::buffer::ImageReader;
use crate::error::DiskError;
use crate::formats;
use crate::track::{SectorRecord, TrackLayout, TrackReader, TrackWriter};

pub const MIN_CYLINDERS: u8 = 35;
pub const MAX_CYLINDERS: u8 = 83;

/// Recording density, which fixes the raw bytes per track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Density {
    /// Resolved to [`Density::Dd`] when a disk is allocated.
    #[default]
    Auto = 0,
    /// 8" single density.
    Sd8 = 1,
    /// 8" double density.
    Dd8 = 2,
    Sd = 3,
    Dd = 4,
    Hd = 5,
}

impl Density {
    #[must_use]
    pub const fn bytes_per_track(self) -> usize {
        match self {
            Density::Auto | Density::Dd => 6250,
            Density::Sd8 => 5208,
            Density::Dd8 => 10416,
            Density::Sd => 3125,
            Density::Hd => 12500,
        }
    }

    #[must_use]
    pub const fn resolved(self) -> Self {
        match self {
            Density::Auto => Density::Dd,
            d => d,
        }
    }

    /// Smallest 5.25"/3.5" density with room for `raw_len` bytes.
    #[must_use]
    pub const fn fitting(raw_len: usize) -> Option<Self> {
        if raw_len < Density::Sd.bytes_per_track() {
            Some(Density::Sd)
        } else if raw_len < Density::Dd.bytes_per_track() {
            Some(Density::Dd)
        } else if raw_len < Density::Hd.bytes_per_track() {
            Some(Density::Hd)
        } else {
            None
        }
    }
}

impl TryFrom<u8> for Density {
    type Error = DiskError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Density::Auto,
            1 => Density::Sd8,
            2 => Density::Dd8,
            3 => Density::Sd,
            4 => Density::Dd,
            5 => Density::Hd,
            _ => return Err(DiskError::Geom),
        })
    }
}

/// Image container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DiskType {
    /// No format chosen; writers fall back to the file extension.
    #[default]
    None = 0,
    Udi = 1,
    Fdi = 2,
    Td0 = 3,
    Mgt = 4,
    Img = 5,
    Sad = 6,
    Trd = 7,
    Scl = 8,
    Opd = 9,
    /// Original CPCEMU DSK.
    Cpc = 10,
    /// Extended DSK.
    Ecpc = 11,
    Log = 12,
}

impl DiskType {
    /// Whether images of this type can be written.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, DiskType::None | DiskType::Td0)
    }

    /// Format implied by a file name's extension.
    #[must_use]
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Some(match ext.as_str() {
            "udi" => DiskType::Udi,
            "fdi" => DiskType::Fdi,
            "td0" => DiskType::Td0,
            "mgt" => DiskType::Mgt,
            "img" => DiskType::Img,
            "sad" => DiskType::Sad,
            "trd" => DiskType::Trd,
            "scl" => DiskType::Scl,
            "opd" | "opu" => DiskType::Opd,
            "dsk" => DiskType::Ecpc,
            "log" => DiskType::Log,
            _ => return None,
        })
    }
}

impl TryFrom<u8> for DiskType {
    type Error = DiskError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => DiskType::None,
            1 => DiskType::Udi,
            2 => DiskType::Fdi,
            3 => DiskType::Td0,
            4 => DiskType::Mgt,
            5 => DiskType::Img,
            6 => DiskType::Sad,
            7 => DiskType::Trd,
            8 => DiskType::Scl,
            9 => DiskType::Opd,
            10 => DiskType::Cpc,
            11 => DiskType::Ecpc,
            12 => DiskType::Log,
            _ => return Err(DiskError::Geom),
        })
    }
}

/// How to synthesise tracks when opening an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Emit a pre-index gap and index address mark before the post-index gap.
    pub preindex: bool,
}

/// A floppy disk held as raw tracks.
///
/// Track `(head, cylinder)` occupies `tlen` bytes: `bpt` recorded bytes then
/// the clock-mark bitmap. Tracks are stored cylinder by cylinder with the
/// sides interleaved.
#[derive(Debug, Clone)]
pub struct Disk {
    sides: u8,
    cylinders: u8,
    bpt: usize,
    tlen: usize,
    data: Vec<u8>,
    density: Density,
    kind: DiskType,
    write_protect: bool,
    dirty: bool,
    status: Option<DiskError>,
    filename: Option<PathBuf>,
}

impl Disk {
    /// Blank, unformatted disk.
    ///
    /// # Errors
    ///
    /// [`DiskError::Geom`] for 0 or more than 2 sides, cylinders outside
    /// 35..=83 or a type that cannot be written; [`DiskError::Mem`] if the
    /// buffer cannot be allocated.
    pub fn new(sides: u8, cylinders: u8, density: Density, kind: DiskType) -> Result<Self, DiskError> {
        if !(MIN_CYLINDERS..=MAX_CYLINDERS).contains(&cylinders) || !kind.is_writable() {
            return Err(DiskError::Geom);
        }
        Self::alloc(sides, cylinders, density, kind)
    }

    /// Allocate a zeroed buffer. Image readers use this directly since
    /// containers may hold fewer cylinders than a blank disk allows.
    pub(crate) fn alloc(sides: u8, cylinders: u8, density: Density, kind: DiskType) -> Result<Self, DiskError> {
        if !(1..=2).contains(&sides) || !(1..=MAX_CYLINDERS).contains(&cylinders) {
            return Err(DiskError::Geom);
        }
        let density = density.resolved();
        let bpt = density.bytes_per_track();
        let tlen = bpt + bitmap::len_for(bpt);
        let size = usize::from(sides) * usize::from(cylinders) * tlen;

        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| DiskError::Mem)?;
        data.resize(size, 0);

        log::debug!("disk: {sides} sides, {cylinders} cylinders, {density:?}, {bpt} bytes/track");
        Ok(Self {
            sides,
            cylinders,
            bpt,
            tlen,
            data,
            density,
            kind,
            write_protect: false,
            dirty: false,
            status: None,
            filename: None,
        })
    }

    /// Open an image file, detecting its format.
    ///
    /// # Errors
    ///
    /// [`DiskError::Open`] if the file cannot be read or parsed; otherwise
    /// whatever the format reader reports.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self, DiskError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            log::debug!("disk: cannot read {}: {e}", path.display());
            DiskError::Open
        })?;
        let mut disk = Self::open_bytes(&bytes, path, options)?;
        disk.filename = Some(path.to_path_buf());
        Ok(disk)
    }

    /// Parse an image already in memory. `name` is only used for extension
    /// based detection.
    ///
    /// # Errors
    ///
    /// As for [`Disk::open`].
    pub fn open_bytes(bytes: &[u8], name: impl AsRef<Path>, options: OpenOptions) -> Result<Self, DiskError> {
        let kind = formats::detect(bytes, name.as_ref());
        log::debug!("disk: {} detected as {kind:?}", name.as_ref().display());
        formats::open(kind, bytes, options)
    }

    /// Write the disk in its own format, or the one its file name implies
    /// when it has none.
    ///
    /// # Errors
    ///
    /// [`DiskError::Geom`] when the track layout cannot be represented,
    /// [`DiskError::WrFile`] / [`DiskError::WrPart`] on I/O failure.
    pub fn write(&mut self, path: impl AsRef<Path>) -> Result<(), DiskError> {
        let path = path.as_ref();
        let kind = match self.kind {
            DiskType::None => DiskType::from_extension(path).unwrap_or(DiskType::Udi),
            k => k,
        };
        self.write_as(path, kind)
    }

    /// Write the disk as `kind` regardless of its current format.
    ///
    /// # Errors
    ///
    /// As for [`Disk::write`].
    pub fn write_as(&mut self, path: impl AsRef<Path>, kind: DiskType) -> Result<(), DiskError> {
        let path = path.as_ref();
        let result = self.to_bytes(kind).and_then(|bytes| {
            let mut file = fs::File::create(path).map_err(|_| DiskError::WrFile)?;
            file.write_all(&bytes).map_err(|_| DiskError::WrPart)
        });
        self.status = result.err();
        result?;
        log::debug!("disk: wrote {} as {kind:?}", path.display());
        self.dirty = false;
        self.filename = Some(path.to_path_buf());
        Ok(())
    }

    /// Encode the disk as `kind`.
    ///
    /// # Errors
    ///
    /// [`DiskError::Impl`] for formats that cannot be written,
    /// [`DiskError::Geom`] when the layout does not fit the format.
    pub fn to_bytes(&self, kind: DiskType) -> Result<Vec<u8>, DiskError> {
        formats::write(kind, self)
    }

    /// Release the track buffer. Safe to call more than once.
    pub fn close(&mut self) {
        self.data = Vec::new();
        self.filename = None;
        self.kind = DiskType::None;
        self.dirty = false;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.data.is_empty()
    }

    fn track_offset(&self, head: u8, cylinder: u8) -> Option<usize> {
        if head >= self.sides || cylinder >= self.cylinders || self.is_closed() {
            return None;
        }
        Some((usize::from(cylinder) * usize::from(self.sides) + usize::from(head)) * self.tlen)
    }

    /// Scanning cursor over one track, at the index hole.
    #[must_use]
    pub fn track(&self, head: u8, cylinder: u8) -> Option<TrackReader<'_>> {
        let start = self.track_offset(head, cylinder)?;
        let (bytes, clocks) = self.data[start..start + self.tlen].split_at(self.bpt);
        Some(TrackReader::new(bytes, clocks))
    }

    /// Emitting cursor over one track, at the index hole.
    pub fn track_mut(&mut self, head: u8, cylinder: u8) -> Option<TrackWriter<'_>> {
        let start = self.track_offset(head, cylinder)?;
        let bpt = self.bpt;
        let (bytes, clocks) = self.data[start..start + self.tlen].split_at_mut(bpt);
        Some(TrackWriter::new(bytes, clocks))
    }

    /// Format one track with a regular layout, taking data from `src`.
    ///
    /// # Errors
    ///
    /// [`DiskError::Geom`] if the track does not exist or the layout
    /// overflows it, [`DiskError::Open`] if `src` runs short without
    /// `autofill`.
    pub fn trackgen(
        &mut self,
        head: u8,
        cylinder: u8,
        layout: &TrackLayout,
        src: &mut ImageReader<'_>,
        autofill: Option<u8>,
    ) -> Result<(), DiskError> {
        let mut track = self.track_mut(head, cylinder).ok_or(DiskError::Geom)?;
        track.trackgen(head, cylinder, layout, src, autofill)?;
        Ok(())
    }

    /// Find `sector` on a track and read its data field.
    #[must_use]
    pub fn read_sector(&self, head: u8, cylinder: u8, sector: u8) -> Option<SectorRecord> {
        self.track(head, cylinder)?.find_sector(sector)
    }

    /// Replace the data of `sector`, recomputing its CRC.
    ///
    /// # Errors
    ///
    /// [`DiskError::RdOnly`] on a protected disk, [`DiskError::Geom`] if the
    /// sector or its data field is missing.
    pub fn write_sector(&mut self, head: u8, cylinder: u8, sector: u8, data: &[u8]) -> Result<(), DiskError> {
        if self.write_protect {
            return Err(DiskError::RdOnly);
        }
        let mut track = self.track_mut(head, cylinder).ok_or(DiskError::Geom)?;
        let id = track.id_seek(sector).ok_or(DiskError::Geom)?;
        track.write_sector_data(&id, data).map_err(|_| DiskError::Geom)?;
        self.dirty = true;
        Ok(())
    }

    #[must_use]
    pub const fn sides(&self) -> u8 {
        self.sides
    }

    #[must_use]
    pub const fn cylinders(&self) -> u8 {
        self.cylinders
    }

    /// Recorded bytes per track.
    #[must_use]
    pub const fn bpt(&self) -> usize {
        self.bpt
    }

    /// Bytes per track including the clock-mark bitmap.
    #[must_use]
    pub const fn tlen(&self) -> usize {
        self.tlen
    }

    #[must_use]
    pub const fn density(&self) -> Density {
        self.density
    }

    #[must_use]
    pub const fn kind(&self) -> DiskType {
        self.kind
    }

    pub fn set_kind(&mut self, kind: DiskType) {
        self.kind = kind;
    }

    #[must_use]
    pub const fn is_write_protected(&self) -> bool {
        self.write_protect
    }

    pub fn set_write_protect(&mut self, protect: bool) {
        self.write_protect = protect;
    }

    /// Whether tracks changed since the disk was opened or last written.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    /// Error from the most recent write, if it failed.
    #[must_use]
    pub const fn status(&self) -> Option<DiskError> {
        self.status
    }

    #[must_use]
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }
}
