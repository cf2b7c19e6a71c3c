//! Whole-command behaviour as a host CPU sees it through the four registers.
//!
//! Each test drives a controller with a formatted disk in drive 0, polling
//! the status register and servicing DRQ the way interface ROMs do.

use drive_spectrum_floppy::{DriveGeometry, Fdd};
use emu_core::{ProcessorClock, Tstates};
use format_spectrum_disk::{
    CrcAccumulator, Density, Disk, DiskType, GapType, ImageReader, TrackByte, TrackLayout,
};
use wdc_wd1770::status::{
    BUSY, CRC_ERROR, LOST_DATA, RECORD_NOT_FOUND, RECORD_TYPE, TRACK_0, WRITE_PROTECT,
};
use wdc_wd1770::{FdcConfig, FdcFlags, FdcState, Wd1770, Wd17xxModel};

const SPEED: u32 = 3_500_000;
/// Host polling interval, a little faster than one MFM byte.
const TICK: u64 = 100;
/// Polls before a test gives up on a command.
const POLL_LIMIT: usize = 1_000_000;

const TRDOS: TrackLayout = TrackLayout {
    sector_base: 1,
    sectors: 16,
    sector_length: 256,
    gap: GapType::TrDos,
    interleave: 2,
    preindex: false,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ms(n: u64) -> Tstates {
    ProcessorClock::new(SPEED).ms(n)
}

/// Fill byte of `sector` on the test disks; sector 1 carries 0xAA.
fn fill(sector: u8) -> u8 {
    if sector == 1 { 0xAA } else { sector }
}

/// Double-sided 80 cylinder disk with only cylinder 0 formatted, both
/// sides, TR-DOS style.
fn fresh_disk() -> Disk {
    let mut disk = Disk::new(2, 80, Density::Dd, DiskType::Udi).expect("blank disk");
    let data: Vec<u8> = (1..=16).flat_map(|s| vec![fill(s); 256]).collect();
    for head in 0..2 {
        disk.trackgen(head, 0, &TRDOS, &mut ImageReader::new(&data), None)
            .expect("format track");
    }
    disk
}

struct Host {
    fdc: Wd1770,
    now: Tstates,
}

impl Host {
    fn new(config: FdcConfig, disk: Disk) -> Self {
        init_logging();
        let mut drive = Fdd::with_seed(DriveGeometry::AUTO, 0x1770).expect("drive");
        drive.load(disk, false).expect("load disk");
        Self {
            fdc: Wd1770::new(config, drive),
            now: Tstates::ZERO,
        }
    }

    fn wd1770(disk: Disk) -> Self {
        Self::new(FdcConfig::new(Wd17xxModel::Wd1770, SPEED), disk)
    }

    fn tick(&mut self) {
        self.now += Tstates::new(TICK);
    }

    fn command(&mut self, b: u8) {
        self.fdc.cr_write(self.now, b);
    }

    /// Poll status until BUSY drops and return the final status.
    fn wait(&mut self) -> u8 {
        for _ in 0..POLL_LIMIT {
            let sr = self.fdc.sr_read(self.now);
            if sr & BUSY == 0 {
                return sr;
            }
            self.tick();
        }
        panic!("command {:?} never finished", self.fdc.state());
    }

    /// Wait for the first DRQ of a transfer.
    fn wait_drq(&mut self) {
        for _ in 0..POLL_LIMIT {
            self.fdc.run_until(self.now);
            if self.fdc.drq() {
                return;
            }
            self.tick();
        }
        panic!("no data request");
    }

    /// Read every byte the command offers until it finishes. INTRQ is left
    /// as the controller raised it.
    fn read_transfer(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for _ in 0..POLL_LIMIT {
            self.fdc.run_until(self.now);
            if self.fdc.drq() {
                out.push(self.fdc.dr_read(self.now));
            } else if self.fdc.state() == FdcState::None {
                return out;
            }
            self.tick();
        }
        panic!("read transfer never finished after {} bytes", out.len());
    }

    /// Feed `data` to the command, padding with gap bytes once it runs out.
    /// Returns how many bytes were taken.
    fn write_transfer(&mut self, data: &[u8]) -> usize {
        let mut sent = 0;
        for _ in 0..POLL_LIMIT {
            self.fdc.run_until(self.now);
            if self.fdc.drq() {
                self.fdc.dr_write(self.now, data.get(sent).copied().unwrap_or(0x4E));
                sent += 1;
            } else if self.fdc.state() == FdcState::None {
                return sent;
            }
            self.tick();
        }
        panic!("write transfer never finished after {sent} bytes");
    }

    fn read_sector(&mut self, sector: u8) -> (Vec<u8>, u8) {
        self.fdc.sec_write(sector);
        self.command(0x88);
        let bytes = self.read_transfer();
        (bytes, self.wait())
    }

    fn seek(&mut self, cylinder: u8) {
        self.fdc.dr_write(self.now, cylinder);
        self.command(0x18);
        self.wait();
    }

    fn disk(&self) -> &Disk {
        self.fdc.current_drive().disk().expect("disk inserted")
    }
}

#[test]
fn reads_sector_one_of_fresh_disk() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.sec_write(1);
    host.command(0x88);
    let bytes = host.read_transfer();
    assert!(host.fdc.intrq(), "interrupt at the end of the command");
    assert_eq!(bytes, vec![0xAA; 256]);

    let sr = host.wait();
    assert!(!host.fdc.intrq(), "status read acknowledges the interrupt");
    assert_eq!(sr & (CRC_ERROR | RECORD_NOT_FOUND), 0, "status {sr:#04X}");
}

#[test]
fn multi_sector_read_runs_to_end_of_track() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.sec_write(1);
    host.command(0x98);
    let bytes = host.read_transfer();
    let expected: Vec<u8> = (1..=16).flat_map(|s| vec![fill(s); 256]).collect();
    assert_eq!(bytes, expected, "sectors arrive in numeric order");
    assert_eq!(host.fdc.sec_read(), 17);
    assert!(host.wait() & RECORD_NOT_FOUND != 0);
}

#[test]
fn missing_sector_takes_the_revolution_budget() {
    let mut host = Host::wd1770(fresh_disk());
    let start = host.now;
    let (bytes, sr) = host.read_sector(99);
    assert!(bytes.is_empty());
    assert!(sr & RECORD_NOT_FOUND != 0);
    assert!(host.now.since(start) >= ms(800).get(), "gave up too soon");
}

#[test]
fn force_interrupt_cancels_busy_command() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.sec_write(99);
    host.command(0x88);
    host.now += ms(10);
    assert!(host.fdc.sr_read(host.now) & BUSY != 0);

    host.command(0xD0);
    assert_eq!(host.fdc.state(), FdcState::None);
    assert!(!host.fdc.drq());
    host.fdc.run_until(host.now + ms(2000));
    assert!(!host.fdc.intrq(), "the cancelled search never reports");
    assert_eq!(host.fdc.sr_read(host.now + ms(2000)) & (BUSY | RECORD_NOT_FOUND), 0);
}

#[test]
fn immediate_force_interrupt_during_transfer() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.sec_write(2);
    host.command(0x88);
    host.wait_drq();
    host.fdc.dr_read(host.now);

    host.command(0xD8);
    assert!(host.fdc.intrq());
    assert!(!host.fdc.drq());
    assert_eq!(host.fdc.state(), FdcState::None);

    // the controller takes new commands straight away
    let (bytes, _) = host.read_sector(3);
    assert_eq!(bytes, vec![3; 256]);
}

#[test]
fn written_sector_reads_back() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.sec_write(5);
    host.command(0xA8);
    assert_eq!(host.write_transfer(&[0x3C; 256]), 256);
    let sr = host.wait();
    assert_eq!(sr & (WRITE_PROTECT | RECORD_NOT_FOUND | LOST_DATA), 0, "status {sr:#04X}");

    let (bytes, sr) = host.read_sector(5);
    assert_eq!(bytes, vec![0x3C; 256]);
    assert_eq!(sr & (CRC_ERROR | RECORD_TYPE), 0);

    let disk = host.disk();
    assert!(disk.is_dirty());
    let record = disk.read_sector(0, 0, 5).and_then(|r| r.data).expect("data field");
    assert!(record.crc_ok);
    assert_eq!(record.bytes, vec![0x3C; 256]);
    let neighbour = disk.read_sector(0, 0, 6).and_then(|r| r.data).expect("sector 6");
    assert!(neighbour.crc_ok, "write stayed inside its data field");
    assert_eq!(neighbour.bytes, vec![6; 256]);
}

#[test]
fn deleted_data_mark_sets_record_type() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.sec_write(7);
    host.command(0xA9);
    host.write_transfer(&[0x11; 256]);
    host.wait();

    let (bytes, sr) = host.read_sector(7);
    assert_eq!(bytes, vec![0x11; 256]);
    assert!(sr & RECORD_TYPE != 0, "status {sr:#04X}");
    let record = host.disk().read_sector(0, 0, 7).and_then(|r| r.data).expect("data");
    assert!(record.deleted);
}

#[test]
fn multi_sector_write_fills_following_sectors() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.sec_write(15);
    host.command(0xB8);
    let data: Vec<u8> = [0x15u8, 0x16].iter().flat_map(|&b| vec![b; 256]).collect();
    host.write_transfer(&data);
    assert!(host.wait() & RECORD_NOT_FOUND != 0, "ran off the end at sector 17");
    for (sector, fill) in [(15, 0x15), (16, 0x16)] {
        let record = host.disk().read_sector(0, 0, sector).and_then(|r| r.data).expect("data");
        assert!(record.crc_ok);
        assert_eq!(record.bytes, vec![fill; 256]);
    }
}

#[test]
fn read_address_returns_id_with_valid_crc() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.sec_write(0x55);
    host.command(0xC8);
    let id = host.read_transfer();
    assert_eq!(id.len(), 6);
    assert_eq!((id[0], id[1], id[3]), (0, 0, 1));
    assert!((1..=16).contains(&id[2]));

    let mut crc = CrcAccumulator::after_mfm_sync();
    crc.update(0xFE);
    crc.update_all(&id[..4]);
    assert_eq!(crc.value(), u16::from_be_bytes([id[4], id[5]]));
    assert_eq!(host.fdc.sec_read(), 0, "sector register takes the track number");
    assert_eq!(host.wait() & CRC_ERROR, 0);
}

#[test]
fn read_track_returns_one_revolution() {
    let mut host = Host::wd1770(fresh_disk());
    host.command(0xE8);
    let track = host.read_transfer();
    assert_eq!(track.len(), 6250);
    assert!(track.windows(256).any(|w| w.iter().all(|&b| b == 0xAA)));
}

/// WRITE TRACK stream for one 256 byte sector, as a format routine sends it.
fn format_stream(sector: u8, fill: u8) -> Vec<u8> {
    let mut out = vec![0x4E; 80];
    out.extend([0x00; 12]);
    out.extend([0xF5; 3]);
    out.extend([0xFE, 0, 0, sector, 1, 0xF7]);
    out.extend([0x4E; 22]);
    out.extend([0x00; 12]);
    out.extend([0xF5; 3]);
    out.push(0xFB);
    out.extend([fill; 256]);
    out.push(0xF7);
    out
}

#[test]
fn written_track_is_readable() {
    let mut host = Host::wd1770(Disk::new(1, 40, Density::Dd, DiskType::Udi).expect("disk"));
    host.command(0xF8);
    let sent = host.write_transfer(&format_stream(9, 0x77));
    assert!(sent > 6000, "write track runs for a revolution, took {sent}");

    let (bytes, sr) = host.read_sector(9);
    assert_eq!(sr & (CRC_ERROR | RECORD_NOT_FOUND), 0, "status {sr:#04X}");
    assert_eq!(bytes, vec![0x77; 256]);
}

#[test]
fn corrupt_data_field_sets_crc_error() {
    let mut disk = fresh_disk();
    {
        let mut track = disk.track_mut(0, 0).expect("track");
        track.id_seek(3).expect("sector 3");
        track.datamark_read().expect("data mark");
        let at = track.pos() + 100;
        let old = track.byte_at(at).value;
        track.poke(at, TrackByte::data(!old));
    }
    let mut host = Host::wd1770(disk);
    let (bytes, sr) = host.read_sector(3);
    assert_eq!(bytes.len(), 256, "the data is still delivered");
    assert!(sr & CRC_ERROR != 0);
    assert_eq!(sr & RECORD_NOT_FOUND, 0);
}

#[test]
fn corrupt_id_field_is_never_matched() {
    let mut disk = fresh_disk();
    {
        let mut track = disk.track_mut(0, 0).expect("track");
        track.id_seek(5).expect("sector 5");
        let at = track.pos() - 1;
        let old = track.byte_at(at).value;
        track.poke(at, TrackByte::data(!old));
    }
    let mut host = Host::wd1770(disk);
    let (bytes, sr) = host.read_sector(5);
    assert!(bytes.is_empty());
    assert_eq!(sr & (RECORD_NOT_FOUND | CRC_ERROR), RECORD_NOT_FOUND | CRC_ERROR);
}

#[test]
fn unserviced_drq_loses_data() {
    let config = FdcConfig::new(Wd17xxModel::Wd1772, SPEED).with_flags(FdcFlags::DRQ_TIMEOUT);
    let mut host = Host::new(config, fresh_disk());
    host.fdc.sec_write(1);
    host.command(0x88);
    host.wait_drq();
    host.now += ms(250);
    let sr = host.wait();
    assert!(sr & LOST_DATA != 0, "status {sr:#04X}");
    assert!(!host.fdc.drq());
}

#[test]
fn write_protected_disk_refuses_writes() {
    let mut host = Host::wd1770(fresh_disk());
    host.fdc.current_drive_mut().set_write_protect(true);

    host.command(0x08);
    let sr = host.wait();
    assert!(sr & WRITE_PROTECT != 0, "type I status shows the tab");
    assert!(sr & TRACK_0 != 0);

    host.fdc.sec_write(1);
    host.command(0xA8);
    let sr = host.wait();
    assert!(sr & WRITE_PROTECT != 0);
    assert!(!host.fdc.drq(), "no data was asked for");

    host.command(0xF8);
    assert!(host.wait() & WRITE_PROTECT != 0);
    let untouched = host.disk().read_sector(0, 0, 1).and_then(|r| r.data);
    assert_eq!(untouched.map(|d| d.bytes), Some(vec![0xAA; 256]));
}

#[test]
fn fm_disk_needs_single_density() {
    let layout = TrackLayout {
        sectors: 8,
        gap: GapType::IbmFm,
        interleave: 1,
        ..TRDOS
    };
    let mut disk = Disk::new(1, 40, Density::Sd, DiskType::Udi).expect("disk");
    let data: Vec<u8> = (1..=8).flat_map(|s| vec![s * 0x11; 256]).collect();
    disk.trackgen(0, 0, &layout, &mut ImageReader::new(&data), None)
        .expect("format fm track");

    let mut host = Host::wd1770(disk);
    let (_, sr) = host.read_sector(4);
    assert!(sr & RECORD_NOT_FOUND != 0, "MFM controller sees no marks");

    host.fdc.set_double_density(false);
    let (bytes, sr) = host.read_sector(4);
    assert_eq!(sr & (RECORD_NOT_FOUND | CRC_ERROR), 0, "status {sr:#04X}");
    assert_eq!(bytes, vec![0x44; 256]);
}

#[test]
fn fd1793_compares_side_when_asked() {
    let mut host = Host::new(FdcConfig::new(Wd17xxModel::Fd1793, SPEED), fresh_disk());
    host.fdc.set_side(1);
    host.fdc.sec_write(2);

    // compare against side 0: the side 1 IDs all carry head 1
    host.command(0x82);
    assert!(host.read_transfer().is_empty());
    assert!(host.wait() & RECORD_NOT_FOUND != 0);

    host.command(0x8A);
    assert_eq!(host.read_transfer(), vec![2; 256]);

    // without compare any side matches
    host.command(0x80);
    assert_eq!(host.read_transfer(), vec![2; 256]);
}

#[test]
fn empty_drive_is_not_ready_on_fd1793() {
    init_logging();
    let drive = Fdd::with_seed(DriveGeometry::DS_80, 3).expect("drive");
    let mut fdc = Wd1770::new(FdcConfig::new(Wd17xxModel::Fd1793, SPEED), drive);
    fdc.sec_write(1);
    fdc.cr_write(Tstates::ZERO, 0x80);
    let sr = fdc.sr_read(ms(1));
    assert!(sr & wdc_wd1770::status::NOT_READY != 0);
    assert_eq!(sr & BUSY, 0, "type II gives up at once without a disk");
}

#[test]
fn seek_reaches_outer_cylinders() {
    let mut disk = fresh_disk();
    let data = vec![0x79; 16 * 256];
    disk.trackgen(1, 79, &TRDOS, &mut ImageReader::new(&data), None)
        .expect("format last track");
    let mut host = Host::wd1770(disk);
    host.seek(79);
    assert_eq!(host.fdc.current_drive().cylinder(), 79);
    assert_eq!(host.fdc.tr_read(), 79);
    host.fdc.set_side(1);
    let (bytes, _) = host.read_sector(16);
    assert_eq!(bytes, vec![0x79; 256]);
}
