//! CPCEMU DSK and Extended DSK images, as used by +3 software.
//!
//! A 256-byte disk information block is followed by one Track-Info block
//! per track, cylinders outermost. Each Track-Info lists the sector IDs
//! with the FDC status bytes the sector produced when it was imaged, then
//! the sector data. Standard DSK tracks all occupy the size given in the
//! disk header; Extended DSK keeps a per-track size table, where 0 marks an
//! unformatted track, and stores an actual data length per sector.
//!
//! Status bits carried over to the raw track:
//!
//! | Bits | Meaning |
//! |------|---------|
//! | ST1 0x20 without ST2 0x20 | CRC error in the ID field |
//! | ST2 0x20 | CRC error in the data field |
//! | ST2 0x40 | deleted data mark |
//! | ST2 0x01 | no data field |

use super::{ListedSector, ListedTrack, build_listed, list_tracks};
use crate::disk::{Disk, DiskType, OpenOptions};
use crate::error::DiskError;
use crate::track::{SectorId, sector_length};

const STANDARD_HEADER: &[u8] = b"MV - CPCEMU Disk-File\r\nDisk-Info\r\n";
const EXTENDED_HEADER: &[u8] = b"EXTENDED CPC DSK File\r\nDisk-Info\r\n";
const TRACK_HEADER: &[u8] = b"Track-Info\r\n";
const BLOCK: usize = 0x100;
/// Sector entries that fit in a Track-Info block.
const MAX_SECTORS: usize = (BLOCK - 0x18) / 8;

const ST1_DATA_ERROR: u8 = 0x20;
const ST1_MISSING_AM: u8 = 0x01;
const ST2_DATA_ERROR: u8 = 0x20;
const ST2_DELETED: u8 = 0x40;
const ST2_MISSING_DAM: u8 = 0x01;

/// Filler byte recorded in new Track-Info blocks.
const FILLER: u8 = 0xE5;
const GAP3: u8 = 0x4E;

pub(crate) fn detect(bytes: &[u8]) -> Option<DiskType> {
    if bytes.starts_with(&STANDARD_HEADER[..8]) {
        Some(DiskType::Cpc)
    } else if bytes.starts_with(&EXTENDED_HEADER[..21]) {
        Some(DiskType::Ecpc)
    } else {
        None
    }
}

pub(crate) fn open(bytes: &[u8], options: OpenOptions) -> Result<Disk, DiskError> {
    let kind = detect(bytes).ok_or(DiskError::Open)?;
    let info = bytes.get(..BLOCK).ok_or(DiskError::Open)?;
    let cylinders = info[0x30];
    let sides = info[0x31];
    let extended = kind == DiskType::Ecpc;
    let standard_size = usize::from(u16::from_le_bytes([info[0x32], info[0x33]]));

    let mut tracks = Vec::with_capacity(usize::from(cylinders) * usize::from(sides));
    let mut filler = FILLER;
    let mut offset = BLOCK;
    for i in 0..usize::from(cylinders) * usize::from(sides) {
        let (cylinder, head) = ((i / usize::from(sides)) as u8, (i % usize::from(sides)) as u8);
        let size = if extended {
            usize::from(info.get(0x34 + i).copied().unwrap_or(0)) * BLOCK
        } else {
            standard_size
        };
        let mut track = ListedTrack {
            head,
            cylinder,
            ..ListedTrack::default()
        };
        if size > 0 {
            let block = bytes.get(offset..).ok_or(DiskError::Open)?;
            let block = &block[..size.min(block.len())];
            filler = parse_track_info(block, extended, &mut track)?;
            offset += size;
        }
        tracks.push(track);
    }

    log::debug!("dsk: {sides} sides, {cylinders} cylinders, extended {extended}");
    build_listed(&tracks, sides, cylinders, kind, filler, options)
}

/// Read one Track-Info block into `track`, returning its filler byte.
fn parse_track_info(block: &[u8], extended: bool, track: &mut ListedTrack) -> Result<u8, DiskError> {
    if block.len() < BLOCK || !block.starts_with(&TRACK_HEADER[..10]) {
        return Err(DiskError::Open);
    }
    let default_length = block[0x14];
    let count = usize::from(block[0x15]);
    let filler = block[0x17];
    if count > MAX_SECTORS {
        return Err(DiskError::Open);
    }

    let mut data_at = BLOCK;
    for entry in block[0x18..0x18 + count * 8].chunks_exact(8) {
        let id = SectorId {
            track: entry[0],
            head: entry[1],
            sector: entry[2],
            length: entry[3],
        };
        let (st1, st2) = (entry[4], entry[5]);
        let stored = if extended {
            usize::from(u16::from_le_bytes([entry[6], entry[7]]))
        } else {
            sector_length(default_length)
        };
        // a truncated image leaves later sectors short; the filler pads them
        let data: Vec<u8> = block
            .get(data_at..)
            .unwrap_or(&[])
            .iter()
            .take(stored)
            .copied()
            .collect();
        data_at += stored;

        let no_data = st2 & ST2_MISSING_DAM != 0;
        track.sectors.push(ListedSector {
            id,
            data: (!no_data).then_some(data),
            deleted: st2 & ST2_DELETED != 0,
            id_crc_error: st1 & ST1_DATA_ERROR != 0 && st2 & ST2_DATA_ERROR == 0,
            data_crc_error: st2 & ST2_DATA_ERROR != 0,
        });
    }
    Ok(filler)
}

/// Serialise one track as a Track-Info block followed by its data.
fn track_block(track: &ListedTrack, extended: bool) -> Vec<u8> {
    let mut buf = vec![0u8; BLOCK];
    buf[..TRACK_HEADER.len()].copy_from_slice(TRACK_HEADER);
    buf[0x10] = track.cylinder;
    buf[0x11] = track.head;
    buf[0x14] = track.sectors.first().map_or(2, |s| s.id.length);
    buf[0x15] = track.sectors.len() as u8;
    buf[0x16] = GAP3;
    buf[0x17] = FILLER;

    let mut body = Vec::new();
    for (i, s) in track.sectors.iter().enumerate() {
        let (mut st1, mut st2) = (0, 0);
        if s.id_crc_error || s.data_crc_error {
            st1 |= ST1_DATA_ERROR;
        }
        if s.data_crc_error {
            st2 |= ST2_DATA_ERROR;
        }
        if s.deleted {
            st2 |= ST2_DELETED;
        }
        let len = match &s.data {
            Some(data) => {
                body.extend_from_slice(data);
                data.len()
            }
            None => {
                st1 |= ST1_MISSING_AM;
                st2 |= ST2_MISSING_DAM;
                if extended {
                    0
                } else {
                    let len = sector_length(s.id.length);
                    body.resize(body.len() + len, FILLER);
                    len
                }
            }
        };
        let e = &mut buf[0x18 + i * 8..0x20 + i * 8];
        e[..6].copy_from_slice(&[s.id.track, s.id.head, s.id.sector, s.id.length, st1, st2]);
        e[6..].copy_from_slice(&(len as u16).to_le_bytes());
    }
    buf.extend_from_slice(&body);
    buf.resize(buf.len().div_ceil(BLOCK) * BLOCK, 0);
    buf
}

pub(crate) fn write(disk: &Disk, kind: DiskType) -> Result<Vec<u8>, DiskError> {
    let extended = kind != DiskType::Cpc;
    let tracks = list_tracks(disk);

    let mut header = vec![0u8; BLOCK];
    let signature = if extended { EXTENDED_HEADER } else { STANDARD_HEADER };
    header[..signature.len()].copy_from_slice(signature);
    header[0x30] = disk.cylinders();
    header[0x31] = disk.sides();

    if tracks.iter().any(|t| t.sectors.len() > MAX_SECTORS) {
        return Err(DiskError::Geom);
    }

    let blocks: Vec<Option<Vec<u8>>> = tracks
        .iter()
        .map(|t| (!t.sectors.is_empty()).then(|| track_block(t, extended)))
        .collect();

    let mut out = Vec::new();
    if extended {
        if blocks.len() > BLOCK - 0x34 {
            return Err(DiskError::Geom);
        }
        for (i, block) in blocks.iter().enumerate() {
            let size = block.as_ref().map_or(0, |b| b.len() / BLOCK);
            header[0x34 + i] = u8::try_from(size).map_err(|_| DiskError::Geom)?;
        }
        out.extend_from_slice(&header);
        for block in blocks.into_iter().flatten() {
            out.extend_from_slice(&block);
        }
    } else {
        for t in &tracks {
            if t.sectors.iter().any(|s| Some(s.id.length) != t.sectors.first().map(|f| f.id.length)) {
                return Err(DiskError::Geom);
            }
        }
        let size = blocks.iter().flatten().map(Vec::len).max().unwrap_or(BLOCK);
        header[0x32..0x34].copy_from_slice(&u16::try_from(size).map_err(|_| DiskError::Geom)?.to_le_bytes());
        out.extend_from_slice(&header);
        for (track, block) in tracks.iter().zip(blocks) {
            let mut block = block.unwrap_or_else(|| track_block(track, false));
            block.resize(size, 0);
            out.extend_from_slice(&block);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ImageReader;
    use crate::disk::Density;
    use crate::track::{GapType, TrackLayout};

    /// Standard DSK, one track with one 512-byte sector.
    fn standard_dsk() -> Vec<u8> {
        let mut data = vec![0u8; BLOCK];
        data[..STANDARD_HEADER.len()].copy_from_slice(STANDARD_HEADER);
        data[0x30] = 1;
        data[0x31] = 1;
        data[0x32..0x34].copy_from_slice(&0x0300u16.to_le_bytes());

        let mut track = vec![0u8; BLOCK];
        track[..12].copy_from_slice(TRACK_HEADER);
        track[0x14] = 2;
        track[0x15] = 1;
        track[0x17] = FILLER;
        track[0x18..0x1C].copy_from_slice(&[0, 0, 0xC1, 2]);
        data.extend_from_slice(&track);

        let mut sector = vec![0xE5u8; 512];
        sector[0] = 0xAA;
        sector[511] = 0xBB;
        data.extend_from_slice(&sector);
        data
    }

    /// EDSK, two tracks: track 0 with a deleted sector carrying a data CRC
    /// error and a sector without data, track 1 unformatted.
    fn extended_dsk() -> Vec<u8> {
        let mut data = vec![0u8; BLOCK];
        data[..EXTENDED_HEADER.len()].copy_from_slice(EXTENDED_HEADER);
        data[0x30] = 2;
        data[0x31] = 1;
        data[0x34] = 2;
        data[0x35] = 0;

        let mut track = vec![0u8; BLOCK];
        track[..12].copy_from_slice(TRACK_HEADER);
        track[0x14] = 1;
        track[0x15] = 2;
        track[0x17] = 0xAB;
        track[0x18..0x20].copy_from_slice(&[0, 0, 1, 1, 0x20, 0x60, 0x00, 0x01]);
        track[0x20..0x28].copy_from_slice(&[0, 0, 2, 1, 0x01, 0x01, 0x00, 0x00]);
        data.extend_from_slice(&track);
        data.extend(std::iter::repeat_n(0xCC, 256));
        data
    }

    #[test]
    fn detects_both_signatures() {
        assert_eq!(detect(&standard_dsk()), Some(DiskType::Cpc));
        assert_eq!(detect(&extended_dsk()), Some(DiskType::Ecpc));
        assert_eq!(detect(&[0; 256]), None);
    }

    #[test]
    fn standard_sector_data() {
        let disk = open(&standard_dsk(), OpenOptions::default()).expect("open");
        let rec = disk.read_sector(0, 0, 0xC1).expect("sector C1");
        let data = rec.data.expect("data");
        assert!(data.crc_ok);
        assert_eq!((data.bytes[0], data.bytes[511]), (0xAA, 0xBB));
        assert_eq!(data.bytes.len(), 512);
    }

    #[test]
    fn status_bytes_become_track_features() {
        let disk = open(&extended_dsk(), OpenOptions::default()).expect("open");
        let one = disk.read_sector(0, 0, 1).expect("sector 1");
        assert!(one.id.crc_ok, "ST2 data error means the ID was fine");
        let data = one.data.expect("data");
        assert!(data.deleted);
        assert!(!data.crc_ok);
        assert_eq!(data.bytes, vec![0xCC; 256]);

        let two = disk.read_sector(0, 0, 2).expect("sector 2");
        assert!(two.data.is_none(), "missing data mark");
        assert!(disk.read_sector(0, 1, 1).is_none(), "unformatted track");
    }

    #[test]
    fn extended_round_trip() {
        let disk = open(&extended_dsk(), OpenOptions::default()).expect("open");
        let bytes = write(&disk, DiskType::Ecpc).expect("write");
        assert_eq!(&bytes[..EXTENDED_HEADER.len()], EXTENDED_HEADER);
        assert_eq!(bytes[0x35], 0, "unformatted track keeps size 0");

        let back = open(&bytes, OpenOptions::default()).expect("reopen");
        for s in [1, 2] {
            assert_eq!(back.read_sector(0, 0, s), disk.read_sector(0, 0, s), "sector {s}");
        }
    }

    #[test]
    fn standard_round_trip() {
        let disk = open(&standard_dsk(), OpenOptions::default()).expect("open");
        let bytes = write(&disk, DiskType::Cpc).expect("write");
        assert_eq!(&bytes[..STANDARD_HEADER.len()], STANDARD_HEADER);
        let back = open(&bytes, OpenOptions::default()).expect("reopen");
        assert_eq!(back.read_sector(0, 0, 0xC1), disk.read_sector(0, 0, 0xC1));
    }

    #[test]
    fn truncated_extended_image_pads_missing_data() {
        // the size table claims 0x500 bytes, two 512-byte sectors follow,
        // but only 100 bytes of data made it into the file
        let mut data = vec![0u8; BLOCK];
        data[..EXTENDED_HEADER.len()].copy_from_slice(EXTENDED_HEADER);
        data[0x30] = 1;
        data[0x31] = 1;
        data[0x34] = 5;

        let mut track = vec![0u8; BLOCK];
        track[..12].copy_from_slice(TRACK_HEADER);
        track[0x14] = 2;
        track[0x15] = 2;
        track[0x17] = FILLER;
        track[0x18..0x20].copy_from_slice(&[0, 0, 1, 2, 0, 0, 0x00, 0x02]);
        track[0x20..0x28].copy_from_slice(&[0, 0, 2, 2, 0, 0, 0x00, 0x02]);
        data.extend_from_slice(&track);
        data.extend(std::iter::repeat_n(0x5A, 100));

        let disk = open(&data, OpenOptions::default()).expect("open truncated");
        let one = disk.read_sector(0, 0, 1).and_then(|r| r.data).expect("sector 1");
        assert_eq!(&one.bytes[..100], &[0x5A; 100][..]);
        assert!(one.bytes[100..].iter().all(|&b| b == FILLER), "rest is filler");
        let two = disk.read_sector(0, 0, 2).and_then(|r| r.data).expect("sector 2");
        assert_eq!(two.bytes, vec![FILLER; 512]);
    }

    #[test]
    fn track_with_too_many_sectors_is_refused() {
        let mut disk = Disk::new(1, 40, Density::Hd, DiskType::Ecpc).expect("disk");
        let layout = TrackLayout {
            sector_base: 1,
            sectors: 30,
            sector_length: 128,
            gap: GapType::MinimalMfm,
            interleave: 1,
            preindex: false,
        };
        disk.trackgen(0, 0, &layout, &mut ImageReader::new(&[0x11; 30 * 128]), None)
            .expect("format dense track");
        assert_eq!(list_tracks(&disk)[0].sectors.len(), 30);

        for kind in [DiskType::Ecpc, DiskType::Cpc] {
            assert_eq!(write(&disk, kind).err(), Some(DiskError::Geom), "{kind:?}");
        }
    }

    #[test]
    fn invalid_header_errors() {
        assert_eq!(open(&[0; 256], OpenOptions::default()).err(), Some(DiskError::Open));
    }
}
