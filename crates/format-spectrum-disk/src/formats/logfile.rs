//! Human-readable dump of a disk, for debugging images.
//!
//! Lists the geometry, then each track's sectors in physical order with
//! their ID fields, data marks and CRC state, followed by a hex dump of
//! every data field.

use std::fmt::Write as _;

use crate::disk::Disk;
use crate::geometry::check_disk_geom;
use crate::track::SectorRecord;

const ROW: usize = 16;

fn describe(out: &mut String, rec: &SectorRecord) {
    let id = rec.id.id;
    let _ = write!(
        out,
        "  {} C:{:02X} H:{:02X} R:{:02X} N:{:02X} id crc {}",
        if rec.id.mfm { "MFM" } else { "FM " },
        id.track,
        id.head,
        id.sector,
        id.length,
        if rec.id.crc_ok { "ok" } else { "ERROR" },
    );
    match &rec.data {
        Some(data) => {
            let _ = writeln!(
                out,
                ", {} data, {} bytes, data crc {}",
                if data.deleted { "deleted" } else { "normal" },
                data.bytes.len(),
                if data.crc_ok { "ok" } else { "ERROR" },
            );
        }
        None => out.push_str(", no data field\n"),
    }
}

fn hexdump(out: &mut String, bytes: &[u8]) {
    for (row, chunk) in bytes.chunks(ROW).enumerate() {
        let _ = write!(out, "    {:04X}:", row * ROW);
        for b in chunk {
            let _ = write!(out, " {b:02X}");
        }
        for _ in chunk.len()..ROW {
            out.push_str("   ");
        }
        out.push_str("  ");
        out.extend(chunk.iter().map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' }));
        out.push('\n');
    }
}

pub(crate) fn write(disk: &Disk) -> Vec<u8> {
    let mut out = String::new();
    let geom = check_disk_geom(disk);
    let _ = writeln!(
        out,
        "Sides: {}  Cylinders: {}  Bytes/track: {}  Density: {:?}  Type: {:?}",
        disk.sides(),
        disk.cylinders(),
        disk.bpt(),
        disk.density(),
        disk.kind(),
    );
    let _ = writeln!(
        out,
        "Layout: {} sectors of {} bytes from {}, {}, flags {:?}",
        geom.sectors,
        geom.sector_length,
        geom.sector_base,
        if geom.mfm { "MFM" } else { "FM" },
        geom.flags,
    );

    for cylinder in 0..disk.cylinders() {
        for head in 0..disk.sides() {
            let Some(mut track) = disk.track(head, cylinder) else {
                continue;
            };
            let records = track.sectors();
            let _ = writeln!(out, "\nTrack {cylinder}:{head}  {} sectors", records.len());
            if records.is_empty() {
                out.push_str("  unformatted\n");
            }
            for rec in &records {
                describe(&mut out, rec);
            }
            for rec in &records {
                if let Some(data) = &rec.data {
                    let _ = writeln!(out, "  Sector {:02X}:", rec.id.id.sector);
                    hexdump(&mut out, &data.bytes);
                }
            }
        }
    }
    out.into_bytes()
}
