//! SAD, the SAM Coupé disk backup format.
//!
//! A 22-byte header (`"Aley's disk backup"`, sides, cylinders, sectors per
//! track, sector size / 64) followed by the sectors, all of side 0 before
//! side 1. Sectors are numbered from 1.

use super::{DumpFormat, SideOrder, open_dump, regular_geometry, write_dump};
use crate::disk::{Density, Disk, DiskType, OpenOptions};
use crate::error::DiskError;
use crate::track::{GapType, TrackLayout};

pub(crate) const SIGNATURE: &[u8] = b"Aley's disk backup";
const HEADER: usize = 22;

pub(crate) fn open(bytes: &[u8], options: OpenOptions) -> Result<Disk, DiskError> {
    let header = bytes.get(..HEADER).ok_or(DiskError::Open)?;
    let sides = header[18];
    let cylinders = header[19];
    let sectors = header[20];
    let sector_length = usize::from(header[21]) * 64;
    if sectors == 0 || !sector_length.is_power_of_two() || !(128..=4096).contains(&sector_length) {
        return Err(DiskError::Geom);
    }

    let layout = TrackLayout {
        sector_base: 1,
        sectors,
        sector_length,
        gap: GapType::MgtPlusD,
        interleave: 1,
        preindex: options.preindex,
    };
    let density = if layout.raw_len() < Density::Dd.bytes_per_track() {
        Density::Dd
    } else {
        Density::Hd
    };
    log::debug!("sad: {sides} x {cylinders} x {sectors} x {sector_length}");

    let format = DumpFormat {
        kind: DiskType::Sad,
        sides,
        cylinders,
        density,
        layout,
        order: SideOrder::Sequential,
        autofill: None,
    };
    open_dump(&bytes[HEADER..], &format, options)
}

pub(crate) fn write(disk: &Disk) -> Result<Vec<u8>, DiskError> {
    let geom = regular_geometry(disk)?;
    if geom.sector_base != 1 || geom.sector_length < 64 || geom.sector_length / 64 > 0xFF {
        return Err(DiskError::Geom);
    }
    let mut out = Vec::with_capacity(HEADER);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&[
        disk.sides(),
        disk.cylinders(),
        geom.sectors,
        (geom.sector_length / 64) as u8,
    ]);
    out.extend(write_dump(disk, &geom, SideOrder::Sequential)?);
    Ok(out)
}
