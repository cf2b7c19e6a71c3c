//! Image containers and the shared machinery they build on.
//!
//! Containers fall into two families:
//!
//! - Sector dumps (MGT, IMG, OPD, TRD, SAD) store every sector of a regular
//!   layout back to back. Tracks are generated with [`TrackCursor::trackgen`]
//!   and written back only when [`check_disk_geom`] finds the disk regular.
//! - Sector lists (FDI, DSK, TD0) store each track's IDs, flags and data.
//!   They are read into [`ListedTrack`]s and emitted field by field.
//!
//! UDI stores raw tracks and needs neither.
//!
//! [`TrackCursor::trackgen`]: crate::track::TrackCursor::trackgen

use std::path::Path;

use crate::buffer::ImageReader;
use crate::disk::{Density, Disk, DiskType, OpenOptions};
use crate::error::DiskError;
use crate::geometry::{DiskGeometry, check_disk_geom};
use crate::track::{
    GapField, GapType, SectorId, TrackLayout, calc_leadin, sector_length,
};

mod cpc;
mod fdi;
mod logfile;
mod mgt;
mod sad;
mod scl;
mod td0;
mod trd;
mod udi;

/// Work out an image's format from its contents, then its name.
pub(crate) fn detect(bytes: &[u8], name: &Path) -> DiskType {
    if udi::is_udi(bytes) {
        return DiskType::Udi;
    }
    if bytes.starts_with(fdi::SIGNATURE) {
        return DiskType::Fdi;
    }
    if bytes.starts_with(sad::SIGNATURE) {
        return DiskType::Sad;
    }
    if let Some(kind) = cpc::detect(bytes) {
        return kind;
    }
    if bytes.starts_with(scl::SIGNATURE) {
        return DiskType::Scl;
    }
    if td0::is_td0(bytes) {
        return DiskType::Td0;
    }
    if trd::signature(bytes).is_some() {
        return DiskType::Trd;
    }
    match DiskType::from_extension(name) {
        Some(DiskType::Trd) => DiskType::Trd,
        Some(DiskType::Mgt | DiskType::Ecpc) => DiskType::Mgt,
        Some(DiskType::Img) => DiskType::Img,
        Some(DiskType::Opd) => DiskType::Opd,
        _ if mgt::size_geometry(bytes.len()).is_some() => DiskType::Mgt,
        _ => DiskType::None,
    }
}

pub(crate) fn open(kind: DiskType, bytes: &[u8], options: OpenOptions) -> Result<Disk, DiskError> {
    let mut disk = match kind {
        DiskType::Udi => udi::open(bytes)?,
        DiskType::Fdi => fdi::open(bytes, options)?,
        DiskType::Td0 => td0::open(bytes, options)?,
        DiskType::Mgt | DiskType::Img => mgt::open(bytes, kind, options)?,
        DiskType::Opd => mgt::open_opd(bytes, options)?,
        DiskType::Sad => sad::open(bytes, options)?,
        DiskType::Trd => trd::open(bytes, options)?,
        DiskType::Scl => scl::open(bytes, options)?,
        DiskType::Cpc | DiskType::Ecpc => cpc::open(bytes, options)?,
        DiskType::None | DiskType::Log => return Err(DiskError::Open),
    };
    disk.set_kind(kind);
    Ok(disk)
}

pub(crate) fn write(kind: DiskType, disk: &Disk) -> Result<Vec<u8>, DiskError> {
    if disk.is_closed() {
        return Err(DiskError::WrFile);
    }
    match kind {
        DiskType::Udi => udi::write(disk),
        DiskType::Fdi => fdi::write(disk),
        DiskType::Mgt | DiskType::Img => mgt::write(disk, kind),
        DiskType::Opd => mgt::write_opd(disk),
        DiskType::Sad => sad::write(disk),
        DiskType::Trd => trd::write(disk),
        DiskType::Scl => scl::write(disk),
        DiskType::Cpc | DiskType::Ecpc => cpc::write(disk, kind),
        DiskType::Log => Ok(logfile::write(disk)),
        DiskType::Td0 | DiskType::None => Err(DiskError::Impl),
    }
}

// ---------------------------------------------------------------------------
// Sector dumps
// ---------------------------------------------------------------------------

/// Order in which a dump stores its tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SideOrder {
    /// Cylinder by cylinder, sides alternating.
    Alternate,
    /// All of side 0, then all of side 1.
    Sequential,
}

impl SideOrder {
    /// `(head, cylinder)` pairs in file order.
    pub(crate) fn tracks(self, sides: u8, cylinders: u8) -> Vec<(u8, u8)> {
        match self {
            SideOrder::Alternate => (0..cylinders)
                .flat_map(|c| (0..sides).map(move |h| (h, c)))
                .collect(),
            SideOrder::Sequential => (0..sides)
                .flat_map(|h| (0..cylinders).map(move |c| (h, c)))
                .collect(),
        }
    }
}

/// Geometry and layout of a sector dump.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DumpFormat {
    pub kind: DiskType,
    pub sides: u8,
    pub cylinders: u8,
    pub density: Density,
    pub layout: TrackLayout,
    pub order: SideOrder,
    /// Fill byte for images that stop short.
    pub autofill: Option<u8>,
}

pub(crate) fn open_dump(bytes: &[u8], format: &DumpFormat, options: OpenOptions) -> Result<Disk, DiskError> {
    let mut disk = Disk::alloc(format.sides, format.cylinders, format.density, format.kind)?;
    let layout = TrackLayout {
        preindex: options.preindex,
        ..format.layout
    };
    let mut src = ImageReader::new(bytes);
    for (head, cylinder) in format.order.tracks(format.sides, format.cylinders) {
        disk.trackgen(head, cylinder, &layout, &mut src, format.autofill)?;
    }
    if src.remaining() > 0 {
        log::debug!("disk: {} trailing bytes ignored", src.remaining());
    }
    Ok(disk)
}

/// Geometry of a disk that a sector dump can hold, or [`DiskError::Geom`].
pub(crate) fn regular_geometry(disk: &Disk) -> Result<DiskGeometry, DiskError> {
    let geom = check_disk_geom(disk);
    if !geom.is_regular() || geom.sectors == 0 {
        log::debug!("disk: layout not representable as a sector dump ({:?})", geom.flags);
        return Err(DiskError::Geom);
    }
    Ok(geom)
}

/// Dump sectors `base..base + sectors` of every track in `order`.
/// Unformatted tracks are written as zeros.
pub(crate) fn write_dump(disk: &Disk, geom: &DiskGeometry, order: SideOrder) -> Result<Vec<u8>, DiskError> {
    let track_len = usize::from(geom.sectors) * geom.sector_length;
    let mut out = Vec::with_capacity(track_len * usize::from(disk.sides()) * usize::from(disk.cylinders()));
    for (head, cylinder) in order.tracks(disk.sides(), disk.cylinders()) {
        let mut track = disk.track(head, cylinder).ok_or(DiskError::Geom)?;
        if track.id_read().is_none() {
            out.resize(out.len() + track_len, 0);
            continue;
        }
        for s in 0..geom.sectors {
            let sector = geom.sector_base.wrapping_add(s);
            let data = track
                .find_sector(sector)
                .and_then(|r| r.data)
                .ok_or(DiskError::Geom)?;
            out.extend_from_slice(&data.bytes);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Sector lists
// ---------------------------------------------------------------------------

/// One sector as a sector-list container records it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct ListedSector {
    pub id: SectorId,
    /// `None` when the sector has an ID but no data field.
    pub data: Option<Vec<u8>>,
    pub deleted: bool,
    pub id_crc_error: bool,
    pub data_crc_error: bool,
}

/// One track of a sector-list container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct ListedTrack {
    pub head: u8,
    pub cylinder: u8,
    pub fm: bool,
    pub sectors: Vec<ListedSector>,
}

impl ListedTrack {
    fn gap(&self) -> GapType {
        if self.fm { GapType::MinimalFm } else { GapType::MinimalMfm }
    }

    /// Raw bytes this track needs.
    pub(crate) fn raw_len(&self, preindex: bool) -> usize {
        let gap = self.gap();
        let g = gap.params();
        let id_len = g.address_mark_len() + 6 + g.len[GapField::AfterId as usize];
        self.sectors.iter().fold(calc_leadin(gap, preindex), |acc, s| {
            let data_len = match s.data {
                Some(_) => g.address_mark_len() + sector_length(s.id.length) + 2,
                None => 0,
            };
            acc + id_len + data_len + g.len[GapField::AfterData as usize]
        })
    }
}

/// Build a disk from listed tracks, picking the smallest density that
/// holds the longest track.
pub(crate) fn build_listed(
    tracks: &[ListedTrack],
    sides: u8,
    cylinders: u8,
    kind: DiskType,
    fill: u8,
    options: OpenOptions,
) -> Result<Disk, DiskError> {
    let longest = tracks.iter().map(|t| t.raw_len(options.preindex)).max().unwrap_or(0);
    let density = Density::fitting(longest).ok_or(DiskError::Geom)?;
    let density = if density == Density::Sd && tracks.iter().any(|t| !t.fm) {
        Density::Dd
    } else {
        density
    };
    let mut disk = Disk::alloc(sides, cylinders, density, kind)?;

    for t in tracks {
        let gap = t.gap();
        let mut cursor = disk.track_mut(t.head, t.cylinder).ok_or(DiskError::Geom)?;
        if t.sectors.is_empty() {
            cursor.clear(gap.params().gap);
            continue;
        }
        if options.preindex {
            cursor.preindex_add(gap)?;
        }
        cursor.postindex_add(gap)?;
        for s in &t.sectors {
            cursor.id_add(s.id, gap, s.id_crc_error)?;
            match &s.data {
                Some(data) => cursor.data_add(
                    data,
                    sector_length(s.id.length),
                    s.deleted,
                    gap,
                    s.data_crc_error,
                    Some(fill),
                )?,
                None => cursor.gap_add(GapField::AfterData, gap)?,
            }
        }
        cursor.gap4_add(gap)?;
    }
    Ok(disk)
}

/// Read back every track's sectors in physical order, cylinder by cylinder
/// with sides alternating.
pub(crate) fn list_tracks(disk: &Disk) -> Vec<ListedTrack> {
    let mut out = Vec::with_capacity(usize::from(disk.sides()) * usize::from(disk.cylinders()));
    for (head, cylinder) in SideOrder::Alternate.tracks(disk.sides(), disk.cylinders()) {
        let mut listed = ListedTrack {
            head,
            cylinder,
            ..ListedTrack::default()
        };
        if let Some(mut track) = disk.track(head, cylinder) {
            let records = track.sectors();
            listed.fm = records.first().is_some_and(|r| !r.id.mfm);
            listed.sectors = records
                .into_iter()
                .map(|r| ListedSector {
                    id: r.id.id,
                    deleted: r.data.as_ref().is_some_and(|d| d.deleted),
                    data_crc_error: r.data.as_ref().is_some_and(|d| !d.crc_ok),
                    id_crc_error: !r.id.crc_ok,
                    data: r.data.map(|d| d.bytes),
                })
                .collect();
        }
        out.push(listed);
    }
    out
}
