//! Recovering a sector geometry from raw tracks.
//!
//! Sector-dump containers (MGT, TRD, SAD, ...) can only hold disks whose
//! tracks all share one regular layout. These checks scan every track and
//! report, as flags, each way a disk departs from that.

use bitflags::bitflags;

use crate::disk::Disk;
use crate::track::sector_length;

bitflags! {
    /// Irregularities found while scanning tracks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GeomFlags: u8 {
        /// An ID's cylinder differs from the physical cylinder.
        const ID_NOTMATCH = 0x01;
        /// Sector length varies.
        const SECLEN_VARI = 0x02;
        /// Sectors per track vary between tracks.
        const SPT_VARI = 0x04;
        /// First sector number varies between tracks.
        const SBASE_VARI = 0x08;
        /// FM and MFM fields are mixed.
        const MFM_VARI = 0x10;
        /// At least one deleted data mark.
        const DDAM = 0x20;
        /// A sector with a bad CRC or no data field.
        const CORRUPT_SECTOR = 0x40;
        /// A track with no IDs at all.
        const UNFORMATTED_TRACK = 0x80;
    }
}

impl GeomFlags {
    /// Flags that make a disk unrepresentable as a plain sector dump.
    pub const IRREGULAR: Self = Self::ID_NOTMATCH
        .union(Self::SECLEN_VARI)
        .union(Self::SPT_VARI)
        .union(Self::SBASE_VARI)
        .union(Self::MFM_VARI)
        .union(Self::DDAM)
        .union(Self::CORRUPT_SECTOR);
}

/// Layout of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackGeometry {
    pub sectors: u8,
    /// Lowest sector number seen.
    pub sector_base: u8,
    /// Sector size in bytes (0 when the track is unformatted).
    pub sector_length: usize,
    pub mfm: bool,
    pub flags: GeomFlags,
}

/// Layout shared by a whole disk, with every irregularity found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskGeometry {
    pub sectors: u8,
    pub sector_base: u8,
    pub sector_length: usize,
    pub mfm: bool,
    pub flags: GeomFlags,
}

impl DiskGeometry {
    /// No flags besides unformatted tracks.
    #[must_use]
    pub fn is_regular(&self) -> bool {
        !self.flags.intersects(GeomFlags::IRREGULAR)
    }
}

/// Scan one track from the index hole.
///
/// The sector base is the smallest sector number seen, including numbers
/// read from IDs with bad CRCs.
#[must_use]
pub fn guess_track_geom(disk: &Disk, head: u8, cylinder: u8) -> TrackGeometry {
    let mut geom = TrackGeometry {
        sector_base: u8::MAX,
        ..TrackGeometry::default()
    };
    let Some(mut track) = disk.track(head, cylinder) else {
        geom.sector_base = 0;
        geom.flags = GeomFlags::UNFORMATTED_TRACK;
        return geom;
    };

    while let Some(id) = track.id_read() {
        let len = sector_length(id.id.length);
        if geom.sectors == 0 {
            geom.mfm = id.mfm;
            geom.sector_length = len;
        } else {
            if geom.sector_length != len {
                geom.flags |= GeomFlags::SECLEN_VARI;
            }
            if geom.mfm != id.mfm {
                geom.flags |= GeomFlags::MFM_VARI;
            }
        }
        if id.id.track != cylinder {
            geom.flags |= GeomFlags::ID_NOTMATCH;
        }
        geom.sector_base = geom.sector_base.min(id.id.sector);
        if !id.crc_ok {
            geom.flags |= GeomFlags::CORRUPT_SECTOR;
        }
        match track.read_sector_data(&id) {
            Some(data) => {
                if data.deleted {
                    geom.flags |= GeomFlags::DDAM;
                }
                if !data.crc_ok {
                    geom.flags |= GeomFlags::CORRUPT_SECTOR;
                }
            }
            None => geom.flags |= GeomFlags::CORRUPT_SECTOR,
        }
        geom.sectors = geom.sectors.saturating_add(1);
    }

    if geom.sectors == 0 {
        geom.sector_base = 0;
        geom.flags |= GeomFlags::UNFORMATTED_TRACK;
    }
    geom
}

/// Scan every track and merge the results.
///
/// Unformatted tracks set [`GeomFlags::UNFORMATTED_TRACK`] but take no part
/// in the variance checks; the geometry comes from the first formatted track.
#[must_use]
pub fn check_disk_geom(disk: &Disk) -> DiskGeometry {
    let mut out = DiskGeometry::default();
    let mut seen = false;
    for cylinder in 0..disk.cylinders() {
        for head in 0..disk.sides() {
            let t = guess_track_geom(disk, head, cylinder);
            out.flags |= t.flags;
            if t.flags.contains(GeomFlags::UNFORMATTED_TRACK) {
                continue;
            }
            if !seen {
                seen = true;
                out.sectors = t.sectors;
                out.sector_base = t.sector_base;
                out.sector_length = t.sector_length;
                out.mfm = t.mfm;
                continue;
            }
            if t.sectors != out.sectors {
                out.flags |= GeomFlags::SPT_VARI;
            }
            if t.sector_base != out.sector_base {
                out.flags |= GeomFlags::SBASE_VARI;
            }
            if t.sector_length != out.sector_length {
                out.flags |= GeomFlags::SECLEN_VARI;
            }
            if t.mfm != out.mfm {
                out.flags |= GeomFlags::MFM_VARI;
            }
        }
    }
    log::trace!(
        "geometry: {} x {} bytes from sector {}, flags {:?}",
        out.sectors,
        out.sector_length,
        out.sector_base,
        out.flags
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ImageReader;
    use crate::disk::{Density, DiskType};
    use crate::track::{GapType, SectorId, TrackLayout};

    fn layout(base: u8, sectors: u8) -> TrackLayout {
        TrackLayout {
            sector_base: base,
            sectors,
            sector_length: 512,
            gap: GapType::MgtPlusD,
            interleave: 1,
            preindex: false,
        }
    }

    fn formatted(sides: u8, cyl: u8) -> Disk {
        let mut d = Disk::new(sides, cyl, Density::Dd, DiskType::Mgt).expect("disk");
        for c in 0..cyl {
            for h in 0..sides {
                let mut src = ImageReader::new(&[]);
                d.trackgen(h, c, &layout(1, 10), &mut src, Some(0))
                    .expect("format");
            }
        }
        d
    }

    #[test]
    fn regular_disk_has_no_flags() {
        let d = formatted(2, 40);
        let g = check_disk_geom(&d);
        assert_eq!(g.flags, GeomFlags::empty());
        assert_eq!((g.sectors, g.sector_base, g.sector_length), (10, 1, 512));
        assert!(g.mfm);
    }

    #[test]
    fn blank_tracks_are_unformatted_only() {
        let d = Disk::new(1, 40, Density::Dd, DiskType::Udi).expect("disk");
        let g = check_disk_geom(&d);
        assert_eq!(g.flags, GeomFlags::UNFORMATTED_TRACK);
        assert!(g.is_regular());
    }

    #[test]
    fn variance_between_tracks_is_flagged() {
        let mut d = formatted(1, 40);
        let mut src = ImageReader::new(&[]);
        d.trackgen(0, 5, &layout(0, 9), &mut src, Some(0))
            .expect("format");
        let g = check_disk_geom(&d);
        assert!(g.flags.contains(GeomFlags::SPT_VARI));
        assert!(g.flags.contains(GeomFlags::SBASE_VARI));
        assert!(!g.is_regular());
    }

    #[test]
    fn minimum_sector_number_is_the_base() {
        let mut d = formatted(1, 40);
        let mut t = d.track_mut(0, 2).expect("track");
        t.rewind();
        t.postindex_add(GapType::MinimalMfm).expect("gap");
        for s in [5, 3, 200, 4] {
            let id = SectorId {
                track: 2,
                head: 0,
                sector: s,
                length: 2,
            };
            t.id_add(id, GapType::MinimalMfm, false).expect("id");
            t.data_add(&[], 512, false, GapType::MinimalMfm, false, Some(0))
                .expect("data");
        }
        t.gap4_add(GapType::MinimalMfm).expect("gap4");
        let g = guess_track_geom(&d, 0, 2);
        assert_eq!(g.sector_base, 3);
        assert_eq!(g.sectors, 4);
    }

    #[test]
    fn deleted_and_mismatched_ids() {
        let mut d = Disk::new(1, 40, Density::Dd, DiskType::Udi).expect("disk");
        let mut t = d.track_mut(0, 0).expect("track");
        let gap = GapType::MinimalMfm;
        t.postindex_add(gap).expect("gap");
        let id = SectorId {
            track: 9,
            head: 0,
            sector: 1,
            length: 1,
        };
        t.id_add(id, gap, false).expect("id");
        t.data_add(&[0; 256], 256, true, gap, false, None)
            .expect("data");
        t.gap4_add(gap).expect("gap4");

        let g = guess_track_geom(&d, 0, 0);
        assert!(g.flags.contains(GeomFlags::ID_NOTMATCH));
        assert!(g.flags.contains(GeomFlags::DDAM));
        assert!(!g.flags.contains(GeomFlags::CORRUPT_SECTOR));
    }
}
