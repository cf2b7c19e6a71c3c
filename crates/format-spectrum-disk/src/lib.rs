//! Raw MFM/FM disk images for ZX Spectrum floppy systems.
//!
//! A [`Disk`] holds every track as the byte stream a drive head would see:
//! gaps, sync runs, address marks and CRC'd ID and data fields, with a
//! parallel bitmap flagging bytes recorded with a missing clock. Opening an
//! image synthesises those tracks from the container's sector data; writing
//! one scans the tracks back into sectors.
//!
//! Supported containers:
//!
//! | Format | Read | Write |
//! |--------|------|-------|
//! | UDI    | yes  | yes   |
//! | MGT / IMG (+D, DISCiPLE, SAM) | yes | yes |
//! | OPD (Opus Discovery) | yes | yes |
//! | TRD (TR-DOS) | yes | yes |
//! | SCL (TR-DOS archive) | yes | yes |
//! | SAD | yes | yes |
//! | FDI | yes | yes |
//! | CPC DSK / EDSK | yes | yes |
//! | TD0 (Teledisk) | yes | no |
//! | LOG (text dump) | no | yes |

#![allow(clippy::cast_possible_truncation)]

mod bitmap;
mod buffer;
mod crc;
mod disk;
mod error;
mod formats;
mod geometry;
mod track;

pub use buffer::ImageReader;
pub use crc::{CRC_AFTER_MFM_SYNC, CRC_FDC_SEED, CrcAccumulator, crc_fdc, crc_udi};
pub use disk::{Density, Disk, DiskType, OpenOptions};
pub use error::{DiskError, TrackError, strerror};
pub use geometry::{DiskGeometry, GeomFlags, TrackGeometry, check_disk_geom, guess_track_geom};
pub use track::{
    DataMark, GapField, GapParams, GapType, IdField, MARK_DATA, MARK_DELETED, MARK_ID, MARK_INDEX,
    MFM_SYNC, SectorData, SectorId, SectorRecord, TrackByte, TrackCursor, TrackLayout, TrackReader,
    TrackWriter, calc_sectorlen, length_code, sector_length,
};

/// Clock-mark bitmap helpers, for callers that hold raw track slices.
pub mod clock_map {
    pub use crate::bitmap::{len_for, reset, set, test};
}
