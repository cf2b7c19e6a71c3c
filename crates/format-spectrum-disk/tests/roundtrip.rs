//! File-level round trips through the image containers.
//!
//! Each test builds a disk in memory, writes it to a temporary directory,
//! reopens it with format detection and checks the sectors survived.

use format_spectrum_disk::{
    Density, Disk, DiskError, DiskType, GapType, GeomFlags, ImageReader, OpenOptions, TrackLayout,
    check_disk_geom,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const TRDOS: TrackLayout = TrackLayout {
    sector_base: 1,
    sectors: 16,
    sector_length: 256,
    gap: GapType::TrDos,
    interleave: 2,
    preindex: false,
};

/// Byte `i` of the logical image a formatted test disk carries.
fn pattern(i: usize) -> u8 {
    (i * 7 + i / 256) as u8
}

/// Double-sided 80 cylinder TR-DOS disk filled with [`pattern`].
fn trdos_disk() -> Disk {
    let mut disk = Disk::new(2, 80, Density::Dd, DiskType::Trd).expect("blank disk");
    let data: Vec<u8> = (0..2 * 80 * 16 * 256).map(pattern).collect();
    let mut src = ImageReader::new(&data);
    for cylinder in 0..80 {
        for head in 0..2 {
            disk.trackgen(head, cylinder, &TRDOS, &mut src, None)
                .expect("format track");
        }
    }
    disk
}

fn sector_bytes(disk: &Disk, head: u8, cylinder: u8, sector: u8) -> Vec<u8> {
    disk.read_sector(head, cylinder, sector)
        .and_then(|r| r.data)
        .map(|d| d.bytes)
        .unwrap_or_default()
}

#[test]
fn trd_file_round_trip() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("game.trd");

    let mut disk = trdos_disk();
    disk.write(&path).expect("write trd");
    assert!(!disk.is_dirty());
    assert_eq!(disk.filename(), Some(path.as_path()));

    let bytes = std::fs::read(&path).expect("read back");
    assert_eq!(bytes.len(), 2 * 80 * 16 * 256);
    assert!(bytes.iter().enumerate().all(|(i, &b)| b == pattern(i)), "logical order preserved");

    let back = Disk::open(&path, OpenOptions::default()).expect("reopen");
    assert_eq!(back.kind(), DiskType::Trd);
    assert_eq!((back.sides(), back.cylinders()), (2, 80));
    assert_eq!(sector_bytes(&back, 1, 40, 9), sector_bytes(&disk, 1, 40, 9));
}

#[test]
fn conversion_through_udi_keeps_every_sector() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let udi = dir.path().join("disk.udi");
    let trd = dir.path().join("disk.trd");

    let mut disk = trdos_disk();
    disk.write_as(&udi, DiskType::Udi).expect("write udi");
    let mut raw = Disk::open(&udi, OpenOptions::default()).expect("open udi");
    assert_eq!(raw.kind(), DiskType::Udi);

    let geom = check_disk_geom(&raw);
    assert!(geom.is_regular(), "flags {:?}", geom.flags);
    assert_eq!((geom.sectors, geom.sector_length, geom.sector_base), (16, 256, 1));

    raw.write_as(&trd, DiskType::Trd).expect("write trd");
    let bytes = std::fs::read(&trd).expect("read trd");
    assert_eq!(bytes, trdos_disk().to_bytes(DiskType::Trd).expect("direct"));
}

#[test]
fn mgt_is_detected_by_size() {
    init_logging();
    let image: Vec<u8> = (0..819_200usize).map(pattern).collect();
    let disk = Disk::open_bytes(&image, "backup.bin", OpenOptions::default()).expect("open");
    assert_eq!(disk.kind(), DiskType::Mgt);
    assert_eq!((disk.sides(), disk.cylinders()), (2, 80));
    assert_eq!(disk.to_bytes(DiskType::Mgt).expect("write"), image);
}

#[test]
fn irregular_disk_only_fits_sector_lists() {
    init_logging();
    let mut disk = trdos_disk();
    let short = TrackLayout {
        sectors: 9,
        sector_length: 512,
        gap: GapType::IbmMfm,
        interleave: 1,
        ..TRDOS
    };
    let data = vec![0x5A; 9 * 512];
    disk.trackgen(0, 3, &short, &mut ImageReader::new(&data), None)
        .expect("reformat track");

    let geom = check_disk_geom(&disk);
    assert!(geom.flags.intersects(GeomFlags::IRREGULAR));
    assert_eq!(disk.to_bytes(DiskType::Trd).err(), Some(DiskError::Geom));

    let edsk = disk.to_bytes(DiskType::Ecpc).expect("edsk");
    let back = Disk::open_bytes(&edsk, "mixed.dsk", OpenOptions::default()).expect("reopen");
    assert_eq!(back.kind(), DiskType::Ecpc);
    assert_eq!(sector_bytes(&back, 0, 3, 9), vec![0x5A; 512]);
    assert_eq!(sector_bytes(&back, 1, 3, 16), sector_bytes(&disk, 1, 3, 16));

    let fdi = disk.to_bytes(DiskType::Fdi).expect("fdi");
    let back = Disk::open_bytes(&fdi, "mixed.fdi", OpenOptions::default()).expect("reopen");
    assert_eq!(back.kind(), DiskType::Fdi);
    assert_eq!(sector_bytes(&back, 0, 3, 1), vec![0x5A; 512]);
}

#[test]
fn failed_write_records_status() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut disk = trdos_disk();
    assert_eq!(
        disk.write_as(dir.path().join("out.td0"), DiskType::Td0).err(),
        Some(DiskError::Impl)
    );
    assert_eq!(disk.status(), Some(DiskError::Impl));

    let missing = dir.path().join("no-such-dir").join("out.trd");
    assert_eq!(disk.write(&missing).err(), Some(DiskError::WrFile));
    assert_eq!(disk.status(), Some(DiskError::WrFile));
}

#[test]
fn write_protected_disk_refuses_sector_writes() {
    let mut disk = trdos_disk();
    disk.set_write_protect(true);
    assert_eq!(disk.write_sector(0, 0, 1, &[0; 256]).err(), Some(DiskError::RdOnly));
    disk.set_write_protect(false);
    disk.write_sector(0, 0, 1, &[0xEE; 256]).expect("write sector");
    assert!(disk.is_dirty());
    assert_eq!(sector_bytes(&disk, 0, 0, 1), vec![0xEE; 256]);
}

#[test]
fn log_dump_is_text() {
    let disk = trdos_disk();
    let text = String::from_utf8(disk.to_bytes(DiskType::Log).expect("log")).expect("utf8");
    assert!(text.contains("Track 79:1  16 sectors"));
}

#[test]
fn unknown_content_fails_to_open() {
    assert_eq!(
        Disk::open_bytes(&[1, 2, 3], "mystery.bin", OpenOptions::default()).err(),
        Some(DiskError::Open)
    );
    let dir = tempfile::tempdir().expect("tempdir");
    assert_eq!(
        Disk::open(dir.path().join("absent.udi"), OpenOptions::default()).err(),
        Some(DiskError::Open)
    );
}
