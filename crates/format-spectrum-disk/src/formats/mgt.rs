//! MGT and IMG (+D, DISCiPLE, SAM Coupé) and OPD (Opus Discovery) dumps.
//!
//! MGT and IMG hold 10 sectors of 512 bytes per track, numbered from 1, and
//! differ only in track order: MGT alternates sides per cylinder, IMG stores
//! side 0 then side 1. OPD holds 18 sectors of 256 bytes numbered from 0,
//! recorded with the Opus skew of 13.

use super::{DumpFormat, SideOrder, open_dump, regular_geometry, write_dump};
use crate::disk::{Density, Disk, DiskType, OpenOptions};
use crate::error::DiskError;
use crate::track::{GapType, TrackLayout};

const MGT_LAYOUT: TrackLayout = TrackLayout {
    sector_base: 1,
    sectors: 10,
    sector_length: 512,
    gap: GapType::MgtPlusD,
    interleave: 1,
    preindex: false,
};

const OPD_LAYOUT: TrackLayout = TrackLayout {
    sector_base: 0,
    sectors: 18,
    sector_length: 256,
    gap: GapType::MinimalMfm,
    interleave: 13,
    preindex: false,
};

const MGT_TRACK: usize = 10 * 512;
const OPD_TRACK: usize = 18 * 256;

/// Sides and cylinders for an MGT/IMG image of `len` bytes.
pub(crate) fn size_geometry(len: usize) -> Option<(u8, u8)> {
    match len {
        n if n == 2 * 80 * MGT_TRACK => Some((2, 80)),
        n if n == 80 * MGT_TRACK => Some((1, 80)),
        n if n == 40 * MGT_TRACK => Some((1, 40)),
        _ => None,
    }
}

fn opd_geometry(len: usize) -> Option<(u8, u8)> {
    match len {
        n if n == 40 * OPD_TRACK => Some((1, 40)),
        n if n == 80 * OPD_TRACK => Some((1, 80)),
        n if n == 2 * 80 * OPD_TRACK => Some((2, 80)),
        _ => None,
    }
}

pub(crate) fn open(bytes: &[u8], kind: DiskType, options: OpenOptions) -> Result<Disk, DiskError> {
    let (sides, cylinders) = size_geometry(bytes.len()).ok_or(DiskError::Geom)?;
    let order = if kind == DiskType::Img {
        SideOrder::Sequential
    } else {
        SideOrder::Alternate
    };
    let format = DumpFormat {
        kind,
        sides,
        cylinders,
        density: Density::Dd,
        layout: MGT_LAYOUT,
        order,
        autofill: None,
    };
    open_dump(bytes, &format, options)
}

pub(crate) fn write(disk: &Disk, kind: DiskType) -> Result<Vec<u8>, DiskError> {
    let geom = regular_geometry(disk)?;
    if geom.sectors != MGT_LAYOUT.sectors
        || geom.sector_length != MGT_LAYOUT.sector_length
        || geom.sector_base != MGT_LAYOUT.sector_base
    {
        return Err(DiskError::Geom);
    }
    let order = if kind == DiskType::Img {
        SideOrder::Sequential
    } else {
        SideOrder::Alternate
    };
    write_dump(disk, &geom, order)
}

pub(crate) fn open_opd(bytes: &[u8], options: OpenOptions) -> Result<Disk, DiskError> {
    let (sides, cylinders) = opd_geometry(bytes.len()).ok_or(DiskError::Geom)?;
    let format = DumpFormat {
        kind: DiskType::Opd,
        sides,
        cylinders,
        density: Density::Dd,
        layout: OPD_LAYOUT,
        order: SideOrder::Alternate,
        autofill: None,
    };
    open_dump(bytes, &format, options)
}

pub(crate) fn write_opd(disk: &Disk) -> Result<Vec<u8>, DiskError> {
    let geom = regular_geometry(disk)?;
    if geom.sectors != OPD_LAYOUT.sectors
        || geom.sector_length != OPD_LAYOUT.sector_length
        || geom.sector_base != OPD_LAYOUT.sector_base
    {
        return Err(DiskError::Geom);
    }
    write_dump(disk, &geom, SideOrder::Alternate)
}
