//! Western Digital WD1770 family floppy disk controller.
//!
//! Covers the WD1770, WD1772, WD1773 and FD1793 as found in the +D,
//! DISCiPLE, Opus and Beta 128 interfaces. The chip talks to one of its
//! [`Fdd`] drives a byte at a time and is clocked by the host: every
//! register access carries the current tstate, and delayed work (step
//! pulses, spin-up, settle time, the rotational wait for a sector) is
//! queued on an [`EventQueue`] and run when the host's clock passes it.
//!
//! # Register interface
//!
//! Four registers, mapped to ports by the interface:
//! - **Status** (read) / **Command** (write)
//! - **Track**
//! - **Sector**
//! - **Data**
//!
//! # State machine
//!
//! None → Seek ⇄ SeekDelay → Verify → None for Type I commands;
//! None → Read/Write → None for Type II; None → ReadId/ReadTrack/WriteTrack
//! → None for Type III. FORCE INTERRUPT returns to None from anywhere.
//! Failures never surface as `Result`s: they are status bits, as the guest
//! software sees them.

mod commands;
mod config;
pub mod registry;
pub mod scan;

pub use config::{FdcConfig, FdcFlags, Wd17xxModel};
pub use registry::{FdcHandle, FdcRegistry};

use drive_spectrum_floppy::{Fdd, StepDirection};
use emu_core::{
    Activity, EventQueue, Observable, ProcessorClock, StatusIndicator, StatusItem, Tstates, Value,
};
use format_spectrum_disk::{CrcAccumulator, IdField};

/// Status register bits. Several bits mean different things depending on
/// the model and on whether the last command was Type I.
pub mod status {
    /// WD1770/1772: motor on. WD1773/FD1793: drive not ready.
    pub const MOTOR_ON: u8 = 0x80;
    pub const NOT_READY: u8 = 0x80;
    pub const WRITE_PROTECT: u8 = 0x40;
    /// Type I on WD1770/1772: spin-up complete.
    pub const SPIN_UP: u8 = 0x20;
    /// Type I on WD1773/FD1793: head loaded.
    pub const HEAD_LOADED: u8 = 0x20;
    /// Type II read: deleted data mark.
    pub const RECORD_TYPE: u8 = 0x20;
    pub const RECORD_NOT_FOUND: u8 = 0x10;
    pub const CRC_ERROR: u8 = 0x08;
    /// Type II/III.
    pub const LOST_DATA: u8 = 0x04;
    /// Type I.
    pub const TRACK_0: u8 = 0x04;
    /// Type I.
    pub const INDEX: u8 = 0x02;
    /// Type II/III.
    pub const DRQ: u8 = 0x02;
    pub const BUSY: u8 = 0x01;
}

use status::{BUSY, CRC_ERROR, DRQ, INDEX, MOTOR_ON, NOT_READY, TRACK_0, WRITE_PROTECT};

/// One 300 rpm revolution.
const REVOLUTION_MS: u64 = 200;
/// Idle revolutions before a WD1770/1772 drops the motor line.
const MOTOR_OFF_REVOLUTIONS: u64 = 10;
/// Idle revolutions before a WD1773/FD1793 unloads the head.
const HEAD_UNLOAD_REVOLUTIONS: u64 = 15;
/// Revolutions a Type II/III command (or a verify) may search.
const REVOLUTION_BUDGET: u8 = 5;

/// Controller state between host accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcState {
    None,
    Seek,
    SeekDelay,
    Verify,
    Read,
    Write,
    ReadId,
    ReadTrack,
    WriteTrack,
}

/// Which layout the status register presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    TypeI,
    TypeII,
}

/// Work queued for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FdcEvent {
    /// Resume the running command.
    Command,
    /// Motor off (WD1770/1772) or head unload (WD1773/FD1793).
    Idle,
    /// DRQ left unserviced too long.
    DrqTimeout,
    /// FORCE INTERRUPT waiting for the index pulse.
    IndexPulse,
}

/// WD17xx floppy disk controller with its drives.
pub struct Wd1770 {
    config: FdcConfig,
    clock: ProcessorClock,
    drives: Vec<Fdd>,
    current: usize,
    /// DDEN input: true for MFM.
    dden: bool,

    state: FdcState,
    status_type: StatusType,
    status: u8,
    track: u8,
    sector: u8,
    data: u8,
    command: u8,
    direction: StepDirection,

    intrq: bool,
    drq: bool,
    spun_up: bool,

    // Per-command scratch
    rev: u8,
    /// The rotational search ran; its outcome is acted on when the
    /// matching event fires.
    located: bool,
    id: Option<IdField>,
    crc: CrcAccumulator,
    data_offset: usize,
    sector_length: usize,
    multisector: bool,
    check_head: Option<u8>,

    events: EventQueue<FdcEvent>,
    now: Tstates,
    /// Time up to which the disk rotation has been accounted for.
    spun_at: Tstates,
    indicator: Option<Box<dyn StatusIndicator>>,
}

impl Wd1770 {
    /// Controller with one drive attached as drive 0, selected.
    #[must_use]
    pub fn new(config: FdcConfig, drive: Fdd) -> Self {
        let mut fdc = Self {
            config,
            clock: ProcessorClock::new(config.processor_speed),
            drives: vec![drive],
            current: 0,
            dden: true,
            state: FdcState::None,
            status_type: StatusType::TypeI,
            status: 0,
            track: 0,
            sector: 0,
            data: 0,
            command: 0,
            direction: StepDirection::In,
            intrq: false,
            drq: false,
            spun_up: false,
            rev: 0,
            located: false,
            id: None,
            crc: CrcAccumulator::new(),
            data_offset: 0,
            sector_length: 0,
            multisector: false,
            check_head: None,
            events: EventQueue::new(),
            now: Tstates::ZERO,
            spun_at: Tstates::ZERO,
            indicator: None,
        };
        fdc.select_drive(0);
        fdc
    }

    /// Attach another drive. Returns its number.
    pub fn add_drive(&mut self, drive: Fdd) -> usize {
        self.drives.push(drive);
        self.drives.len() - 1
    }

    /// Route the controller to drive `n`. Out of range numbers are ignored.
    pub fn select_drive(&mut self, n: usize) {
        if n >= self.drives.len() {
            return;
        }
        for (i, drive) in self.drives.iter_mut().enumerate() {
            drive.select(i == n);
        }
        self.current = n;
        if !self.config.model.has_motor_line()
            && self.config.flags.contains(FdcFlags::HEAD_ALWAYS_LOADED)
        {
            self.load_head(true);
        }
    }

    /// Side select line, driven by the interface.
    pub fn set_side(&mut self, head: u8) {
        self.current_drive_mut().set_head(head);
    }

    /// DDEN line: true selects MFM, false FM.
    pub fn set_double_density(&mut self, mfm: bool) {
        self.dden = mfm;
    }

    pub fn set_indicator(&mut self, indicator: Box<dyn StatusIndicator>) {
        self.indicator = Some(indicator);
    }

    /// Power-on reset. Drives keep their disks and head positions.
    pub fn master_reset(&mut self) {
        self.events.clear();
        if self.config.model.has_motor_line() {
            self.motor(false);
        } else {
            self.load_head(false);
        }
        self.state = FdcState::None;
        self.status_type = StatusType::TypeI;
        self.status = 0;
        self.track = 0;
        self.sector = 0;
        self.data = 0;
        self.command = 0;
        self.direction = StepDirection::In;
        self.intrq = false;
        self.drq = false;
        self.spun_up = false;
        self.rev = 0;
        self.located = false;
        self.id = None;
        self.multisector = false;
        self.check_head = None;
        log::debug!("{}: master reset", self.config.model.name());
    }

    // -----------------------------------------------------------------------
    // Registers
    // -----------------------------------------------------------------------

    /// Read the status register. Clears INTRQ.
    pub fn sr_read(&mut self, now: Tstates) -> u8 {
        self.run_until(now);
        self.intrq = false;
        if !self.drq {
            self.spin_to(now);
        }
        let drive = &self.drives[self.current];
        let mut sr = self.status;
        if self.status_type == StatusType::TypeI {
            sr &= !(WRITE_PROTECT | status::SPIN_UP | TRACK_0 | INDEX);
            if drive.is_write_protected() {
                sr |= WRITE_PROTECT;
            }
            let bit5 = if self.config.model.has_motor_line() {
                self.spun_up
            } else {
                drive.head_loaded()
            };
            if bit5 {
                sr |= status::SPIN_UP;
            }
            if drive.tr00() {
                sr |= TRACK_0;
            }
            if !drive.is_loaded() || drive.index_hole() {
                sr |= INDEX;
            }
        }
        if !self.config.model.has_motor_line() {
            sr &= !NOT_READY;
            if !drive.is_ready() {
                sr |= NOT_READY;
            }
        }
        sr
    }

    /// Write the command register. FORCE INTERRUPT is obeyed at once; any
    /// other command is ignored while BUSY.
    pub fn cr_write(&mut self, now: Tstates, b: u8) {
        self.run_until(now);
        self.intrq = false;

        if b & 0xF0 == 0xD0 {
            log::debug!("{}: force interrupt {b:#04X}", self.config.model.name());
            self.force_interrupt(b);
            return;
        }
        if self.status & BUSY != 0 {
            log::debug!("{}: command {b:#04X} ignored while busy", self.config.model.name());
            return;
        }

        self.spin_to(now);
        self.command = b;
        self.status |= BUSY;
        self.events.remove_type(FdcEvent::Idle);
        self.located = false;
        self.rev = REVOLUTION_BUDGET;

        if b & 0x80 == 0 {
            log::debug!("{}: type I command {b:#04X}", self.config.model.name());
            self.state = FdcState::Seek;
            self.status_type = StatusType::TypeI;
            self.status &= !(CRC_ERROR | status::RECORD_NOT_FOUND | DRQ | status::LOST_DATA);
            self.reset_drq();
            if self.spinup(b) {
                return;
            }
            self.type_i();
        } else if b & 0x40 == 0 {
            log::debug!("{}: type II command {b:#04X}", self.config.model.name());
            self.check_head =
                (self.config.model.has_head_compare() && b & 0x02 != 0).then_some((b >> 3) & 0x01);
            self.multisector = b & 0x10 != 0;
            self.state = if b & 0x20 != 0 {
                FdcState::Write
            } else {
                FdcState::Read
            };
            self.status_type = StatusType::TypeII;
            self.status &= !(WRITE_PROTECT
                | status::RECORD_TYPE
                | status::RECORD_NOT_FOUND
                | CRC_ERROR
                | status::LOST_DATA
                | DRQ);
            if self.spinup(b) {
                return;
            }
            self.type_ii();
        } else {
            log::debug!("{}: type III command {b:#04X}", self.config.model.name());
            self.state = match b & 0x30 {
                0x20 => FdcState::ReadTrack,
                0x30 => FdcState::WriteTrack,
                _ => FdcState::ReadId,
            };
            self.status_type = StatusType::TypeII;
            self.status &= !(WRITE_PROTECT
                | status::RECORD_TYPE
                | status::RECORD_NOT_FOUND
                | CRC_ERROR
                | status::LOST_DATA
                | DRQ);
            if self.spinup(b) {
                return;
            }
            self.type_iii();
        }
    }

    #[must_use]
    pub const fn tr_read(&self) -> u8 {
        self.track
    }

    pub fn tr_write(&mut self, b: u8) {
        self.track = b;
    }

    #[must_use]
    pub const fn sec_read(&self) -> u8 {
        self.sector
    }

    pub fn sec_write(&mut self, b: u8) {
        self.sector = b;
    }

    /// Read the data register, pulling the next byte of a transfer.
    pub fn dr_read(&mut self, now: Tstates) -> u8 {
        self.run_until(now);
        self.events.remove_type(FdcEvent::DrqTimeout);
        if self.drq {
            match self.state {
                FdcState::Read => self.read_sector_byte(),
                FdcState::ReadId => self.read_address_byte(),
                FdcState::ReadTrack => self.read_track_byte(),
                _ => {}
            }
            self.spun_at = self.now;
            self.arm_drq_timeout();
        }
        self.data
    }

    /// Write the data register, pushing the next byte of a transfer.
    pub fn dr_write(&mut self, now: Tstates, b: u8) {
        self.run_until(now);
        self.events.remove_type(FdcEvent::DrqTimeout);
        self.data = b;
        if self.drq {
            match self.state {
                FdcState::Write => self.write_sector_byte(b),
                FdcState::WriteTrack => self.write_track_byte(b),
                _ => {}
            }
            self.spun_at = self.now;
            self.arm_drq_timeout();
        }
    }

    /// Interrupt request line.
    #[must_use]
    pub const fn intrq(&self) -> bool {
        self.intrq
    }

    /// Data request line.
    #[must_use]
    pub const fn drq(&self) -> bool {
        self.drq
    }

    #[must_use]
    pub const fn state(&self) -> FdcState {
        self.state
    }

    #[must_use]
    pub const fn status_type(&self) -> StatusType {
        self.status_type
    }

    #[must_use]
    pub const fn config(&self) -> &FdcConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Drives
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn drive(&self, n: usize) -> Option<&Fdd> {
        self.drives.get(n)
    }

    pub fn drive_mut(&mut self, n: usize) -> Option<&mut Fdd> {
        self.drives.get_mut(n)
    }

    #[must_use]
    pub const fn current_drive_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_drive(&self) -> &Fdd {
        &self.drives[self.current]
    }

    pub fn current_drive_mut(&mut self) -> &mut Fdd {
        &mut self.drives[self.current]
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Run every event due at or before `now`.
    pub fn run_until(&mut self, now: Tstates) {
        while let Some(due) = self.events.pop_due(now) {
            self.now = self.now.max(due.at);
            log::trace!("{}: {:?} at {}", self.config.model.name(), due.event, due.at.get());
            match due.event {
                FdcEvent::Command => self.resume(),
                FdcEvent::Idle => self.idle_timeout(),
                FdcEvent::DrqTimeout => self.lost_data(),
                FdcEvent::IndexPulse => self.set_intrq(),
            }
        }
        self.now = self.now.max(now);
    }

    /// When the controller next needs to run, if ever.
    #[must_use]
    pub fn next_event(&self) -> Option<Tstates> {
        self.events.next_due()
    }

    fn schedule(&mut self, delay: Tstates, event: FdcEvent) {
        self.events.remove_type(event);
        self.events.add(self.now + delay, event);
    }

    /// Time for `bytes` of the current track to pass under the head.
    fn scan_time(&self, bytes: usize) -> Tstates {
        let bpt = self.drives[self.current].bytes_per_track();
        self.clock.fraction(REVOLUTION_MS, bytes as u64, bpt as u64)
    }

    /// Account for the bytes a scan consumed: the rotation has now reached
    /// the end of the scan, and the command resumes then.
    fn resume_after_scan(&mut self, bytes: usize) {
        let delay = self.scan_time(bytes);
        self.spun_at = self.now + delay;
        self.schedule(delay, FdcEvent::Command);
    }

    /// Turn the disk for the time that passed with nobody reading it.
    fn spin_to(&mut self, now: Tstates) {
        let revolution = self.clock.ms(REVOLUTION_MS).get();
        let drive = &mut self.drives[self.current];
        let bpt = drive.bytes_per_track() as u64;
        if bpt == 0 || revolution == 0 || !drive.motor_on() {
            self.spun_at = self.spun_at.max(now);
            return;
        }
        let bytes = now.since(self.spun_at) * bpt / revolution;
        if bytes == 0 {
            return;
        }
        // Keep the position and whether the index passed, not the turn count
        let turn = bytes % bpt + if bytes >= bpt { bpt } else { 0 };
        drive.rotate(turn as usize);
        self.spun_at = self.spun_at + bytes * revolution / bpt;
    }

    fn resume(&mut self) {
        if self.config.model.has_motor_line() && self.status & MOTOR_ON != 0 {
            self.spun_up = true;
        }
        if !self.drq {
            self.spin_to(self.now);
        }
        match self.state {
            FdcState::Seek | FdcState::SeekDelay => self.type_i(),
            FdcState::Verify => self.seek_verify(),
            FdcState::Read | FdcState::Write => self.type_ii(),
            FdcState::ReadId | FdcState::ReadTrack | FdcState::WriteTrack => self.type_iii(),
            FdcState::None => {}
        }
    }

    // -----------------------------------------------------------------------
    // Lines
    // -----------------------------------------------------------------------

    fn set_intrq(&mut self) {
        self.schedule_idle();
        self.intrq = true;
    }

    fn set_drq(&mut self) {
        self.drq = true;
        self.status |= DRQ;
        self.spun_at = self.now;
        self.arm_drq_timeout();
    }

    fn reset_drq(&mut self) {
        self.drq = false;
        self.status &= !DRQ;
        self.events.remove_type(FdcEvent::DrqTimeout);
    }

    fn arm_drq_timeout(&mut self) {
        if self.drq && self.config.flags.contains(FdcFlags::DRQ_TIMEOUT) {
            self.schedule(self.clock.ms(REVOLUTION_MS), FdcEvent::DrqTimeout);
        }
    }

    /// Finish the running command: not busy, back to idle, interrupt.
    fn end_command(&mut self) {
        self.status &= !BUSY;
        self.state = FdcState::None;
        self.located = false;
        self.reset_drq();
        self.set_intrq();
    }

    fn lost_data(&mut self) {
        if self.drq {
            log::debug!("{}: lost data in {:?}", self.config.model.name(), self.state);
            self.status |= status::LOST_DATA;
            self.end_command();
        }
    }

    /// Start the idle countdown that drops the motor or unloads the head.
    fn schedule_idle(&mut self) {
        self.events.remove_type(FdcEvent::Idle);
        if self.config.model.has_motor_line() {
            if self.status & MOTOR_ON != 0 {
                let delay = self.clock.ms(MOTOR_OFF_REVOLUTIONS * REVOLUTION_MS);
                self.schedule(delay, FdcEvent::Idle);
            }
        } else if self.drives[self.current].head_loaded()
            && !self.config.flags.contains(FdcFlags::HEAD_ALWAYS_LOADED)
        {
            let delay = self.clock.ms(HEAD_UNLOAD_REVOLUTIONS * REVOLUTION_MS);
            self.schedule(delay, FdcEvent::Idle);
        }
    }

    fn idle_timeout(&mut self) {
        if self.config.model.has_motor_line() {
            self.status &= !MOTOR_ON;
            self.motor(false);
        } else {
            self.load_head(false);
        }
    }

    /// WD1770/1772 motor line. The drive loads its head with the motor.
    fn motor(&mut self, on: bool) {
        if !on {
            self.spun_up = false;
        }
        let drive = &mut self.drives[self.current];
        if drive.motor_on() == on {
            return;
        }
        drive.set_motor(on);
        drive.set_head_load(on);
        self.notify(on);
    }

    /// WD1773/FD1793 head load line. The interface runs the spindle while
    /// the head is loaded.
    fn load_head(&mut self, load: bool) {
        let load = load || self.config.flags.contains(FdcFlags::HEAD_ALWAYS_LOADED);
        let drive = &mut self.drives[self.current];
        if drive.head_loaded() == load && drive.motor_on() == load {
            return;
        }
        drive.set_head_load(load);
        drive.set_motor(load);
        self.notify(load);
    }

    fn notify(&mut self, active: bool) {
        if let Some(indicator) = self.indicator.as_mut() {
            let activity = if active {
                Activity::Active
            } else {
                Activity::Inactive
            };
            indicator.update(StatusItem::Disk, activity);
        }
    }
}

impl Observable for Wd1770 {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("drive.") {
            return self.drives[self.current].query(rest);
        }
        match path {
            "status" => Some(self.status.into()),
            "track" => Some(self.track.into()),
            "sector" => Some(self.sector.into()),
            "data" => Some(self.data.into()),
            "command" => Some(self.command.into()),
            "state" => Some(Value::String(format!("{:?}", self.state))),
            "status_type" => Some(Value::String(format!("{:?}", self.status_type))),
            "intrq" => Some(self.intrq.into()),
            "drq" => Some(self.drq.into()),
            "rev" => Some(self.rev.into()),
            "dden" => Some(self.dden.into()),
            "model" => Some(self.config.model.name().into()),
            "drive" => Some((self.current as u8).into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "status",
            "track",
            "sector",
            "data",
            "command",
            "state",
            "status_type",
            "intrq",
            "drq",
            "rev",
            "dden",
            "model",
            "drive",
            "drive.cylinder",
            "drive.head",
            "drive.position",
            "drive.motor",
            "drive.head_loaded",
            "drive.index",
            "drive.tr00",
        ]
    }
}
