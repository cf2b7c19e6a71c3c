//! Teledisk (TD0) images, read only.
//!
//! ```text
//! 0x00  "TD" (or "td" for the LZSS-compressed variant)
//! 0x02  u8   volume sequence
//! 0x03  u8   check sequence
//! 0x04  u8   version
//! 0x05  u8   data rate, bit 7 set for FM
//! 0x06  u8   drive type
//! 0x07  u8   stepping, bit 7 set when a comment block follows
//! 0x08  u8   DOS allocation flag
//! 0x09  u8   sides
//! 0x0A  u16  CRC of bytes 0..10
//! ```
//!
//! An optional comment block (CRC, length, 6-byte timestamp, text) comes
//! next, then tracks until a sector count of 0xFF. Track headers are
//! sector count, cylinder, head (bit 7 set for FM) and a CRC byte. Each
//! sector header is C, H, R, N, flags and a CRC byte, then unless the
//! flags say otherwise a u16 block length, an encoding byte and the
//! encoded data.

use super::{ListedSector, ListedTrack, build_listed};
use crate::buffer::ImageReader;
use crate::disk::{Disk, DiskType, OpenOptions};
use crate::error::DiskError;
use crate::track::{SectorId, sector_length};

const SIGNATURE: &[u8] = b"TD";
const SIGNATURE_COMPRESSED: &[u8] = b"td";
const HEADER: usize = 12;
const COMMENT_HEADER: usize = 10;
const END_OF_IMAGE: u8 = 0xFF;

const FM: u8 = 0x80;
const HAS_COMMENT: u8 = 0x80;

const FLAG_CRC_ERROR: u8 = 0x02;
const FLAG_DELETED: u8 = 0x04;
const FLAG_NO_DATA: u8 = 0x30;

const ENCODING_RAW: u8 = 0;
const ENCODING_REPEATED: u8 = 1;
const ENCODING_RLE: u8 = 2;

/// CRC-16 with polynomial 0xA097 and a zero seed.
fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = (crc << 1) ^ if crc & 0x8000 != 0 { 0xA097 } else { 0 };
        }
    }
    crc
}

pub(crate) fn is_td0(bytes: &[u8]) -> bool {
    let Some(header) = bytes.get(..HEADER) else {
        return false;
    };
    (header.starts_with(SIGNATURE) || header.starts_with(SIGNATURE_COMPRESSED))
        && u16::from_le_bytes([header[10], header[11]]) == crc16(&header[..10])
}

/// Expand one sector's data block to `len` bytes.
fn decode(encoding: u8, mut src: ImageReader<'_>, len: usize) -> Result<Vec<u8>, DiskError> {
    let mut out = Vec::with_capacity(len);
    match encoding {
        ENCODING_RAW => out.extend_from_slice(src.take(len)),
        ENCODING_REPEATED => {
            while out.len() < len {
                let count = src.u16_le().ok_or(DiskError::Open)?;
                let pair = src.take_exact(2).ok_or(DiskError::Open)?;
                for _ in 0..count {
                    out.extend_from_slice(pair);
                }
            }
        }
        ENCODING_RLE => {
            while out.len() < len {
                let kind = src.u8().ok_or(DiskError::Open)?;
                let count = src.u8().ok_or(DiskError::Open)?;
                if kind == 0 {
                    out.extend_from_slice(src.take_exact(usize::from(count)).ok_or(DiskError::Open)?);
                } else {
                    let pattern = src.take_exact(2 * usize::from(kind)).ok_or(DiskError::Open)?;
                    for _ in 0..count {
                        out.extend_from_slice(pattern);
                    }
                }
            }
        }
        other => {
            log::debug!("td0: sector encoding {other}");
            return Err(DiskError::Unsup);
        }
    }
    if out.len() != len {
        log::warn!("td0: sector decoded to {} bytes, expected {len}", out.len());
    }
    out.resize(len, 0);
    Ok(out)
}

pub(crate) fn open(bytes: &[u8], options: OpenOptions) -> Result<Disk, DiskError> {
    if !is_td0(bytes) {
        return Err(DiskError::Open);
    }
    if bytes.starts_with(SIGNATURE_COMPRESSED) {
        log::debug!("td0: advanced compression");
        return Err(DiskError::Unsup);
    }
    let mut src = ImageReader::new(bytes);
    let header = src.take_exact(HEADER).ok_or(DiskError::Open)?;
    let rate_fm = header[5] & FM != 0;

    if header[7] & HAS_COMMENT != 0 {
        let comment = src.take_exact(COMMENT_HEADER).ok_or(DiskError::Open)?;
        let len = usize::from(u16::from_le_bytes([comment[2], comment[3]]));
        let text = src.take_exact(len).ok_or(DiskError::Open)?;
        let mut checked = comment[2..].to_vec();
        checked.extend_from_slice(text);
        if u16::from_le_bytes([comment[0], comment[1]]) != crc16(&checked) {
            log::warn!("td0: comment CRC mismatch");
        }
        log::debug!("td0: comment {:?}", String::from_utf8_lossy(text));
    }

    let mut tracks: Vec<ListedTrack> = Vec::new();
    loop {
        let count = src.u8().ok_or(DiskError::Open)?;
        if count == END_OF_IMAGE {
            break;
        }
        let rest = src.take_exact(3).ok_or(DiskError::Open)?;
        let (cylinder, head) = (rest[0], rest[1]);
        if crc16(&[count, cylinder, head]) as u8 != rest[2] {
            log::warn!("td0: track header CRC mismatch at cylinder {cylinder} head {head}");
        }
        let mut track = ListedTrack {
            head: head & 0x01,
            cylinder,
            fm: head & FM != 0 || rate_fm,
            sectors: Vec::with_capacity(usize::from(count)),
        };

        for _ in 0..count {
            let sh = src.take_exact(6).ok_or(DiskError::Open)?;
            let id = SectorId {
                track: sh[0],
                head: sh[1],
                sector: sh[2],
                length: sh[3],
            };
            let flags = sh[4];
            let data = if flags & FLAG_NO_DATA == 0 {
                let block = usize::from(src.u16_le().ok_or(DiskError::Open)?);
                let block = src.take_exact(block).ok_or(DiskError::Open)?;
                let (&encoding, body) = block.split_first().ok_or(DiskError::Open)?;
                let data = decode(encoding, ImageReader::new(body), sector_length(id.length))?;
                if crc16(&data) as u8 != sh[5] {
                    log::warn!("td0: sector {} data CRC mismatch", id.sector);
                }
                Some(data)
            } else {
                None
            };
            track.sectors.push(ListedSector {
                id,
                data,
                deleted: flags & FLAG_DELETED != 0,
                id_crc_error: false,
                data_crc_error: flags & FLAG_CRC_ERROR != 0,
            });
        }
        tracks.push(track);
    }

    let cylinders = tracks.iter().map(|t| t.cylinder).max().map_or(0, |c| c.saturating_add(1));
    let sides = if header[9] == 1 && tracks.iter().all(|t| t.head == 0) { 1 } else { 2 };
    log::debug!("td0: {sides} sides, {cylinders} cylinders, {} tracks", tracks.len());
    build_listed(&tracks, sides, cylinders, DiskType::Td0, 0x00, options)
}
