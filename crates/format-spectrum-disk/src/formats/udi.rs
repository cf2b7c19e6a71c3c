//! UDI (Ultra Disk Image), the raw track container.
//!
//! ```text
//! 0x00  "UDI!"
//! 0x04  u32  file length, not counting the trailing CRC
//! 0x08  u8   version (0)
//! 0x09  u8   highest cylinder number
//! 0x0A  u8   highest side number
//! 0x0B  u8   unused
//! 0x0C  u32  extended header length
//! 0x10  extended header, then per track (cylinders outermost):
//!       u8 type, u16 length, length bytes, ceil(length / 8) clock bytes
//! end   u32  CRC-32 of everything before it
//! ```
//!
//! `"udi!"` marks a compressed image, which is not supported.

use crate::bitmap;
use crate::buffer::ImageReader;
use crate::crc::crc_udi_slice;
use crate::disk::{Density, Disk, DiskType};
use crate::error::DiskError;
use crate::track::GapType;

const SIGNATURE: &[u8] = b"UDI!";
const SIGNATURE_COMPRESSED: &[u8] = b"udi!";
const HEADER: usize = 16;

/// Track recording types.
const TYPE_MFM: u8 = 0x00;
const TYPE_FM: u8 = 0x01;
const TYPE_MIXED: u8 = 0x02;

pub(crate) fn is_udi(bytes: &[u8]) -> bool {
    bytes.starts_with(SIGNATURE) || bytes.starts_with(SIGNATURE_COMPRESSED)
}

struct RawTrack<'a> {
    data: &'a [u8],
    clocks: &'a [u8],
}

pub(crate) fn open(bytes: &[u8]) -> Result<Disk, DiskError> {
    if bytes.starts_with(SIGNATURE_COMPRESSED) {
        return Err(DiskError::Unsup);
    }
    let mut src = ImageReader::new(bytes);
    src.skip(SIGNATURE.len());
    let size = src.u32_le().ok_or(DiskError::Open)? as usize;
    let header = src.take_exact(8).ok_or(DiskError::Open)?;
    let (version, cylinders, sides) = (header[0], header[1], header[2]);
    let ext_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if version != 0 {
        return Err(DiskError::Unsup);
    }
    if size > bytes.len() || size < HEADER {
        return Err(DiskError::Open);
    }
    let cylinders = cylinders.checked_add(1).ok_or(DiskError::Geom)?;
    let sides = sides.checked_add(1).ok_or(DiskError::Geom)?;

    match bytes.get(size..size + 4) {
        Some(stored) => {
            let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
            if stored != crc_udi_slice(&bytes[..size]) {
                log::warn!("udi: CRC mismatch");
            }
        }
        None => log::warn!("udi: CRC missing"),
    }

    let mut src = ImageReader::new(&bytes[..size]);
    src.seek(HEADER + ext_len);
    let count = usize::from(sides) * usize::from(cylinders);
    let mut tracks = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = src.u8().ok_or(DiskError::Open)?;
        if kind > TYPE_MIXED {
            log::debug!("udi: track type {kind:#04x}");
            return Err(DiskError::Unsup);
        }
        let len = usize::from(src.u16_le().ok_or(DiskError::Open)?);
        let data = src.take_exact(len).ok_or(DiskError::Open)?;
        let clocks = src.take_exact(bitmap::len_for(len)).ok_or(DiskError::Open)?;
        tracks.push(RawTrack { data, clocks });
    }

    let longest = tracks.iter().map(|t| t.data.len()).max().unwrap_or(0);
    let density = [Density::Sd, Density::Dd, Density::Hd]
        .into_iter()
        .find(|d| d.bytes_per_track() >= longest)
        .ok_or(DiskError::Unsup)?;

    let mut disk = Disk::alloc(sides, cylinders, density, DiskType::Udi)?;
    let fill = GapType::MgtPlusD.params().gap;
    for (n, raw) in tracks.iter().enumerate() {
        let (cylinder, head) = (n / usize::from(sides), n % usize::from(sides));
        let mut track = disk
            .track_mut(head as u8, cylinder as u8)
            .ok_or(DiskError::Geom)?;
        track.load_raw(raw.data, raw.clocks, fill);
    }
    Ok(disk)
}

fn track_type(disk: &Disk, head: u8, cylinder: u8) -> u8 {
    let Some(mut track) = disk.track(head, cylinder) else {
        return TYPE_MFM;
    };
    let (mut fm, mut mfm) = (false, false);
    while let Some(id) = track.id_read() {
        if id.mfm {
            mfm = true;
        } else {
            fm = true;
        }
    }
    match (fm, mfm) {
        (true, true) => TYPE_MIXED,
        (true, false) => TYPE_FM,
        _ => TYPE_MFM,
    }
}

pub(crate) fn write(disk: &Disk) -> Result<Vec<u8>, DiskError> {
    let bpt = u16::try_from(disk.bpt()).map_err(|_| DiskError::Geom)?;
    let mut out = Vec::with_capacity(HEADER + usize::from(disk.sides()) * usize::from(disk.cylinders()) * (disk.tlen() + 3) + 4);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&[0, disk.cylinders() - 1, disk.sides() - 1, 0]);
    out.extend_from_slice(&0u32.to_le_bytes());

    for cylinder in 0..disk.cylinders() {
        for head in 0..disk.sides() {
            let track = disk.track(head, cylinder).ok_or(DiskError::Geom)?;
            let (data, clocks) = track.raw();
            out.push(track_type(disk, head, cylinder));
            out.extend_from_slice(&bpt.to_le_bytes());
            out.extend_from_slice(data);
            out.extend_from_slice(clocks);
        }
    }

    let size = u32::try_from(out.len()).map_err(|_| DiskError::Geom)?;
    out[4..8].copy_from_slice(&size.to_le_bytes());
    let crc = crc_udi_slice(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}
