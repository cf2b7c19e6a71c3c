//! TR-DOS (Beta Disk) images.
//!
//! A plain dump of 16 sectors of 256 bytes per track, cylinders outermost.
//! The geometry is read from the disk information sector (logical sector 9
//! of track 0); images without a valid one are taken as 80 cylinders, two
//! sided. Images are often truncated after the last used sector, so missing
//! data is filled with zeros.

use super::{DumpFormat, SideOrder, open_dump, regular_geometry, write_dump};
use crate::disk::{Density, Disk, DiskType, OpenOptions};
use crate::error::DiskError;
use crate::track::{GapType, TrackLayout};

pub(crate) const SECTOR: usize = 256;
pub(crate) const SECTORS: u8 = 16;
pub(crate) const TRACK: usize = SECTORS as usize * SECTOR;

/// Offset of the disk information sector.
pub(crate) const INFO: usize = 8 * SECTOR;
/// Disk type byte within the information sector.
pub(crate) const INFO_DISK_TYPE: usize = 0xE3;
/// TR-DOS identifier byte within the information sector.
pub(crate) const INFO_TRDOS_ID: usize = 0xE7;
pub(crate) const TRDOS_ID: u8 = 0x10;

pub(crate) const LAYOUT: TrackLayout = TrackLayout {
    sector_base: 1,
    sectors: SECTORS,
    sector_length: SECTOR,
    gap: GapType::TrDos,
    interleave: 2,
    preindex: false,
};

/// Sides and cylinders from the disk information sector.
///
/// Disk types 0x16..=0x19: bit 3 set means one side, bit 0 set means 40
/// cylinders.
pub(crate) fn signature(bytes: &[u8]) -> Option<(u8, u8)> {
    let info = bytes.get(INFO..=INFO + INFO_TRDOS_ID)?;
    let disk_type = info[INFO_DISK_TYPE];
    if info[INFO_TRDOS_ID] != TRDOS_ID || !(0x16..=0x19).contains(&disk_type) {
        return None;
    }
    let sides = if disk_type & 0x08 != 0 { 1 } else { 2 };
    let cylinders = if disk_type & 0x01 != 0 { 40 } else { 80 };
    Some((sides, cylinders))
}

pub(crate) fn open(bytes: &[u8], options: OpenOptions) -> Result<Disk, DiskError> {
    let (sides, cylinders) = signature(bytes).unwrap_or((2, 80));
    open_trdos(bytes, sides, cylinders, DiskType::Trd, options)
}

/// Build a TR-DOS disk from a logical image.
pub(crate) fn open_trdos(
    bytes: &[u8],
    sides: u8,
    cylinders: u8,
    kind: DiskType,
    options: OpenOptions,
) -> Result<Disk, DiskError> {
    if bytes.len() > usize::from(sides) * usize::from(cylinders) * TRACK {
        log::debug!("trd: image larger than {sides} x {cylinders} tracks");
    }
    let format = DumpFormat {
        kind,
        sides,
        cylinders,
        density: Density::Dd,
        layout: LAYOUT,
        order: SideOrder::Alternate,
        autofill: Some(0x00),
    };
    open_dump(bytes, &format, options)
}

/// The disk as a logical TR-DOS image.
pub(crate) fn logical_image(disk: &Disk) -> Result<Vec<u8>, DiskError> {
    let geom = regular_geometry(disk)?;
    if geom.sectors != SECTORS || geom.sector_length != SECTOR || geom.sector_base != 1 {
        return Err(DiskError::Geom);
    }
    write_dump(disk, &geom, SideOrder::Alternate)
}

pub(crate) fn write(disk: &Disk) -> Result<Vec<u8>, DiskError> {
    logical_image(disk)
}
