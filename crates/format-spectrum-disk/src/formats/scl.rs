//! SCL, the TR-DOS file archive.
//!
//! ```text
//! "SINCLAIR"  count  count x 14-byte headers  file data  u32 sum
//! ```
//!
//! Each header is a TR-DOS catalogue entry without its start position:
//! name (8), type (1), start (2), length (2), sectors (1). Opening lays the
//! files out on a fresh 80-cylinder double-sided TR-DOS disk, writing the
//! catalogue and the disk information sector. Writing walks the catalogue
//! and packs every live file back up.

use super::trd::{self, INFO, INFO_DISK_TYPE, INFO_TRDOS_ID, SECTOR, SECTORS, TRACK, TRDOS_ID};
use crate::buffer::ImageReader;
use crate::disk::{Disk, DiskType, OpenOptions};
use crate::error::DiskError;

pub(crate) const SIGNATURE: &[u8] = b"SINCLAIR";

const HEADER: usize = 14;
const ENTRY: usize = 16;
const MAX_FILES: usize = 128;
/// Logical tracks on an 80 cylinder double-sided disk.
const LOGICAL_TRACKS: usize = 160;
/// Sectors free on a blank disk (track 0 holds the catalogue).
const FREE_SECTORS: usize = (LOGICAL_TRACKS - 1) * SECTORS as usize;

const INFO_FIRST_FREE_SECTOR: usize = 0xE1;
const INFO_FIRST_FREE_TRACK: usize = 0xE2;
const INFO_FILES: usize = 0xE4;
const INFO_FREE: usize = 0xE5;
const INFO_DELETED: usize = 0xF4;
const INFO_LABEL: usize = 0xF5;

fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
}

pub(crate) fn open(bytes: &[u8], options: OpenOptions) -> Result<Disk, DiskError> {
    let mut src = ImageReader::new(bytes);
    if src.take_exact(SIGNATURE.len()) != Some(SIGNATURE) {
        return Err(DiskError::Open);
    }
    let count = usize::from(src.u8().ok_or(DiskError::Open)?);
    if count > MAX_FILES {
        return Err(DiskError::Open);
    }
    let headers = src.take_exact(count * HEADER).ok_or(DiskError::Open)?;

    let mut image = vec![0u8; LOGICAL_TRACKS * TRACK];
    let mut free = TRACK;
    for (n, header) in headers.chunks_exact(HEADER).enumerate() {
        let sectors = usize::from(header[13]);
        let len = sectors * SECTOR;
        if free + len > image.len() {
            log::debug!("scl: files exceed disk capacity");
            return Err(DiskError::Geom);
        }
        let data = src.take_exact(len).ok_or(DiskError::Open)?;

        let entry = &mut image[n * ENTRY..(n + 1) * ENTRY];
        entry[..HEADER].copy_from_slice(header);
        entry[14] = ((free / SECTOR) % usize::from(SECTORS)) as u8;
        entry[15] = (free / TRACK) as u8;
        image[free..free + len].copy_from_slice(data);
        free += len;
    }

    let sum_end = src.position();
    match src.u32_le() {
        Some(stored) if stored != checksum(&bytes[..sum_end]) => {
            log::warn!("scl: checksum mismatch");
        }
        None => log::warn!("scl: checksum missing"),
        Some(_) => {}
    }

    let used = (free - TRACK) / SECTOR;
    let info = &mut image[INFO..INFO + SECTOR];
    info[INFO_FIRST_FREE_SECTOR] = ((free / SECTOR) % usize::from(SECTORS)) as u8;
    info[INFO_FIRST_FREE_TRACK] = (free / TRACK) as u8;
    info[INFO_DISK_TYPE] = 0x16;
    info[INFO_FILES] = count as u8;
    info[INFO_FREE..INFO_FREE + 2].copy_from_slice(&((FREE_SECTORS - used) as u16).to_le_bytes());
    info[INFO_TRDOS_ID] = TRDOS_ID;
    info[0xEA..=0xF2].fill(b' ');
    info[INFO_DELETED] = 0;
    info[INFO_LABEL..INFO_LABEL + 8].fill(b' ');

    log::debug!("scl: {count} files, {used} sectors");
    trd::open_trdos(&image, 2, 80, DiskType::Scl, options)
}

pub(crate) fn write(disk: &Disk) -> Result<Vec<u8>, DiskError> {
    let image = trd::logical_image(disk)?;
    let catalogue = image.get(..MAX_FILES * ENTRY).ok_or(DiskError::Geom)?;

    let mut headers = Vec::new();
    let mut data = Vec::new();
    let mut count = 0u8;
    for entry in catalogue.chunks_exact(ENTRY) {
        match entry[0] {
            0x00 => break,
            0x01 => continue,
            _ => {}
        }
        let sectors = usize::from(entry[13]);
        let start = (usize::from(entry[15]) * usize::from(SECTORS) + usize::from(entry[14])) * SECTOR;
        let body = image
            .get(start..start + sectors * SECTOR)
            .ok_or(DiskError::Geom)?;
        headers.extend_from_slice(&entry[..HEADER]);
        data.extend_from_slice(body);
        count += 1;
    }

    let mut out = Vec::with_capacity(SIGNATURE.len() + 1 + headers.len() + data.len() + 4);
    out.extend_from_slice(SIGNATURE);
    out.push(count);
    out.extend_from_slice(&headers);
    out.extend_from_slice(&data);
    let sum = checksum(&out);
    out.extend_from_slice(&sum.to_le_bytes());
    Ok(out)
}
