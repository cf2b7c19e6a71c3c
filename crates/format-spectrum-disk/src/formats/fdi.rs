//! FDI, the sector list format used by UKV Spectrum Debugger.
//!
//! ```text
//! 0x00  "FDI"
//! 0x03  u8   write protect
//! 0x04  u16  cylinders
//! 0x06  u16  heads
//! 0x08  u16  offset of the description text
//! 0x0A  u16  offset of the sector data
//! 0x0C  u16  length of the extra header that follows
//! ```
//!
//! After the extra header come the track headers, cylinders outermost:
//! a u32 offset of the track's data (from the data offset), a u16 of zero,
//! the sector count, then 7 bytes per sector: C, H, R, N, flags and a u16
//! offset from the track's data. Flag bits 0..5 mark the CRC as good for a
//! sector of 128 << bit bytes, bit 6 means no data field and bit 7 a
//! deleted data mark.

use super::{ListedSector, ListedTrack, build_listed, list_tracks};
use crate::buffer::ImageReader;
use crate::disk::{Disk, DiskType, OpenOptions};
use crate::error::DiskError;
use crate::track::SectorId;

pub(crate) const SIGNATURE: &[u8] = b"FDI";
const HEADER: usize = 0x0E;
const DESCRIPTION: &[u8] = b"format-spectrum-disk\0";

const FLAG_NO_DATA: u8 = 0x40;
const FLAG_DELETED: u8 = 0x80;

fn crc_ok_flag(length: u8) -> u8 {
    if length <= 5 { 1 << length } else { 0 }
}

fn word(bytes: &[u8], at: usize) -> usize {
    usize::from(u16::from_le_bytes([bytes[at], bytes[at + 1]]))
}

pub(crate) fn open(bytes: &[u8], options: OpenOptions) -> Result<Disk, DiskError> {
    let header = bytes.get(..HEADER).ok_or(DiskError::Open)?;
    let write_protect = header[3] != 0;
    let cylinders = u8::try_from(word(header, 4)).map_err(|_| DiskError::Geom)?;
    let heads = u8::try_from(word(header, 6)).map_err(|_| DiskError::Geom)?;
    let data_offset = word(header, 0x0A);
    let extra = word(header, 0x0C);

    let mut src = ImageReader::new(bytes);
    src.seek(HEADER + extra);
    let mut tracks = Vec::with_capacity(usize::from(heads) * usize::from(cylinders));
    for cylinder in 0..cylinders {
        for head in 0..heads {
            let track_offset = data_offset + src.u32_le().ok_or(DiskError::Open)? as usize;
            src.skip(2);
            let count = src.u8().ok_or(DiskError::Open)?;
            let mut track = ListedTrack {
                head,
                cylinder,
                ..ListedTrack::default()
            };
            for _ in 0..count {
                let entry = src.take_exact(7).ok_or(DiskError::Open)?;
                let id = SectorId {
                    track: entry[0],
                    head: entry[1],
                    sector: entry[2],
                    length: entry[3],
                };
                let flags = entry[4];
                let at = track_offset + word(entry, 5);
                let data = if flags & FLAG_NO_DATA == 0 {
                    let len = 128usize << (id.length & 0x07);
                    Some(bytes.get(at..at + len).ok_or(DiskError::Open)?.to_vec())
                } else {
                    None
                };
                track.sectors.push(ListedSector {
                    id,
                    data,
                    deleted: flags & FLAG_DELETED != 0,
                    id_crc_error: false,
                    data_crc_error: flags & FLAG_NO_DATA == 0 && flags & crc_ok_flag(id.length) == 0,
                });
            }
            tracks.push(track);
        }
    }

    log::debug!("fdi: {heads} heads, {cylinders} cylinders");
    let mut disk = build_listed(&tracks, heads, cylinders, DiskType::Fdi, 0x00, options)?;
    disk.set_write_protect(write_protect);
    Ok(disk)
}

pub(crate) fn write(disk: &Disk) -> Result<Vec<u8>, DiskError> {
    let tracks = list_tracks(disk);
    let headers_len: usize = tracks.iter().map(|t| 7 + 7 * t.sectors.len()).sum();
    let text_offset = HEADER + headers_len;
    let data_offset = text_offset + DESCRIPTION.len();
    let to_u16 = |n: usize| u16::try_from(n).map_err(|_| DiskError::Geom);

    let mut out = Vec::with_capacity(data_offset);
    out.extend_from_slice(SIGNATURE);
    out.push(u8::from(disk.is_write_protected()));
    out.extend_from_slice(&u16::from(disk.cylinders()).to_le_bytes());
    out.extend_from_slice(&u16::from(disk.sides()).to_le_bytes());
    out.extend_from_slice(&to_u16(text_offset)?.to_le_bytes());
    out.extend_from_slice(&to_u16(data_offset)?.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    let mut data = Vec::new();
    for track in &tracks {
        let track_start = data.len();
        out.extend_from_slice(&u32::try_from(track_start).map_err(|_| DiskError::Geom)?.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.push(u8::try_from(track.sectors.len()).map_err(|_| DiskError::Geom)?);
        for s in &track.sectors {
            let mut flags = 0;
            if s.deleted {
                flags |= FLAG_DELETED;
            }
            match &s.data {
                Some(_) if !s.data_crc_error => flags |= crc_ok_flag(s.id.length),
                Some(_) => {}
                None => flags |= FLAG_NO_DATA,
            }
            out.extend_from_slice(&[s.id.track, s.id.head, s.id.sector, s.id.length, flags]);
            out.extend_from_slice(&to_u16(data.len() - track_start)?.to_le_bytes());
            if let Some(bytes) = &s.data {
                data.extend_from_slice(bytes);
            }
        }
    }
    out.extend_from_slice(DESCRIPTION);
    out.extend_from_slice(&data);
    Ok(out)
}
