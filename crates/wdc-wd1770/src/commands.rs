//! Command execution: spin-up, the four command types and the per-byte
//! transfer paths behind the data register.
//!
//! A command runs in slices. Each slice either finishes the command or
//! leaves `state` describing what comes next and queues an event for when
//! it is due. Searches for an ID field run synchronously over as many disk
//! bytes as they need, bounded by the revolution budget, and the command
//! resumes when that much rotation would have passed.

use drive_spectrum_floppy::StepDirection;
use emu_core::Tstates;
use format_spectrum_disk::{CrcAccumulator, DataMark, IdField, TrackByte};

use crate::scan::{DataMarkScanner, IdScanner, Scan};
use crate::status::{self, BUSY, CRC_ERROR, DRQ, MOTOR_ON, RECORD_NOT_FOUND, WRITE_PROTECT};
use crate::{FdcEvent, FdcState, REVOLUTION_BUDGET, REVOLUTION_MS, StatusType, Wd1770};

/// Revolutions the WD1770 waits for the motor before a command runs.
const SPIN_UP_REVOLUTIONS: u64 = 6;
/// Head settle before a verify.
const VERIFY_SETTLE_MS: u64 = 15;
/// Pause before the next sector of a multi-sector read.
const READ_RESTART_MS: u64 = 20;
/// Pause before the next sector of a multi-sector write.
const WRITE_RESTART_MS: u64 = 3;
/// Index pulses one ID search may see.
const READ_ID_PULSES: u8 = 2;
/// Gap bytes skipped after the ID field before a write asks for data;
/// MFM skips the same again.
const WRITE_GAP: usize = 11;

const MFM_SYNC: u8 = 0xA1;
const MFM_INDEX_SYNC: u8 = 0xC2;

impl Wd1770 {
    /// Start the motor or load the head for the command in `b`. Returns true
    /// when the command has to wait for it.
    pub(crate) fn spinup(&mut self, b: u8) -> bool {
        let type_i = self.state == FdcState::Seek;
        let mut delay = if !type_i && b & 0x04 != 0 {
            self.clock.ms(self.config.model.settle_ms())
        } else {
            Tstates::ZERO
        };

        if self.config.model.has_motor_line() {
            if self.status & MOTOR_ON == 0 {
                self.status |= MOTOR_ON;
                self.motor(true);
                if b & 0x08 == 0 {
                    delay += self.clock.ms(SPIN_UP_REVOLUTIONS * REVOLUTION_MS);
                    self.spun_up = false;
                } else {
                    self.spun_up = true;
                }
            }
        } else {
            // Type I loads the head only when asked (h); II and III always do
            self.load_head(!type_i || b & 0x08 != 0);
        }

        if delay.get() == 0 {
            return false;
        }
        self.schedule(delay, FdcEvent::Command);
        true
    }

    // -----------------------------------------------------------------------
    // Type I: RESTORE, SEEK, STEP, STEP IN, STEP OUT
    // -----------------------------------------------------------------------

    pub(crate) fn type_i(&mut self) {
        let b = self.command;

        if self.state == FdcState::SeekDelay {
            if b & 0x60 != 0 {
                // single step done
                self.type_i_verify();
                return;
            }
        } else {
            if self.config.model.has_motor_line() {
                self.spun_up = true;
            }
            if b & 0x60 != 0 {
                if b & 0x40 != 0 {
                    self.direction = if b & 0x20 != 0 {
                        StepDirection::Out
                    } else {
                        StepDirection::In
                    };
                }
                if b & 0x10 != 0 {
                    self.update_track();
                }
                if !self.step_pulse() {
                    self.type_i_verify();
                }
                return;
            }
            if b & 0x10 == 0 {
                // RESTORE seeks to 0 from an unknown position
                self.track = 0xFF;
                self.data = 0;
            }
        }

        if self.track != self.data {
            self.direction = if self.track < self.data {
                StepDirection::In
            } else {
                StepDirection::Out
            };
            self.update_track();
            if self.step_pulse() {
                return;
            }
        }
        self.type_i_verify();
    }

    fn update_track(&mut self) {
        self.track = match self.direction {
            StepDirection::In => self.track.wrapping_add(1),
            StepDirection::Out => self.track.wrapping_sub(1),
        };
    }

    /// Step the head once and wait the step rate. False when stepping out
    /// is cut short by the track 0 sensor.
    fn step_pulse(&mut self) -> bool {
        let drive = &mut self.drives[self.current];
        if drive.tr00() && self.direction == StepDirection::Out {
            self.track = 0;
            return false;
        }
        drive.step(self.direction);
        self.state = FdcState::SeekDelay;
        let rate = self.config.model.step_rates()[usize::from(self.command & 0x03)];
        self.schedule(self.clock.ms(rate), FdcEvent::Command);
        true
    }

    fn type_i_verify(&mut self) {
        if self.command & 0x04 == 0 {
            self.end_command();
            return;
        }
        if !self.config.model.has_motor_line() {
            self.load_head(true);
        }
        self.state = FdcState::Verify;
        self.rev = REVOLUTION_BUDGET;
        self.located = false;
        self.schedule(self.clock.ms(VERIFY_SETTLE_MS), FdcEvent::Command);
    }

    /// Look for an intact ID field carrying the track register's number.
    pub(crate) fn seek_verify(&mut self) {
        if !self.located {
            let mut bytes = 0;
            self.id = None;
            while self.rev > 0 {
                let (scan, n) = self.read_id();
                bytes += n;
                let Scan::Found(id) = scan else {
                    continue;
                };
                if !id.crc_ok {
                    self.status |= CRC_ERROR;
                } else if id.id.track == self.track {
                    self.status &= !CRC_ERROR;
                    self.id = Some(id);
                    break;
                }
            }
            self.located = true;
            self.resume_after_scan(bytes);
            return;
        }

        self.located = false;
        if self.id.is_some() {
            self.status &= !RECORD_NOT_FOUND;
        } else {
            log::debug!("{}: verify found no track {}", self.config.model.name(), self.track);
            self.status |= RECORD_NOT_FOUND;
        }
        self.end_command();
    }

    // -----------------------------------------------------------------------
    // Type II: READ SECTOR, WRITE SECTOR
    // -----------------------------------------------------------------------

    pub(crate) fn type_ii(&mut self) {
        if !self.located {
            let drive = &self.drives[self.current];
            if !self.config.model.has_motor_line() && !drive.is_ready() {
                self.end_command();
                return;
            }
            if self.state == FdcState::Write && drive.is_write_protected() {
                self.status |= WRITE_PROTECT;
                self.end_command();
                return;
            }
            let bytes = self.seek_id();
            self.located = true;
            self.resume_after_scan(bytes);
            return;
        }

        self.located = false;
        if self.id.is_none() {
            log::debug!(
                "{}: sector {} track {} not found",
                self.config.model.name(),
                self.sector,
                self.track
            );
            self.status |= RECORD_NOT_FOUND;
            self.end_command();
            return;
        }
        if self.state == FdcState::Read {
            let Some(mark) = self.read_datamark() else {
                self.status |= RECORD_NOT_FOUND;
                self.end_command();
                return;
            };
            if mark.deleted() {
                self.status |= status::RECORD_TYPE;
            } else {
                self.status &= !status::RECORD_TYPE;
            }
            self.crc = if self.dden {
                CrcAccumulator::after_mfm_sync()
            } else {
                CrcAccumulator::new()
            };
            self.crc.update(mark.value);
        } else {
            let gap = if self.dden { 2 * WRITE_GAP } else { WRITE_GAP };
            let drive = &mut self.drives[self.current];
            for _ in 0..gap {
                let _ = drive.read_data();
            }
        }
        self.data_offset = 0;
        self.set_drq();
    }

    /// Find the ID field matching the track and sector registers (and the
    /// expected side when head compare is on), leaving it in `id`. Returns
    /// how many bytes went past.
    fn seek_id(&mut self) -> usize {
        let mut bytes = 0;
        self.id = None;
        while self.rev > 0 {
            let (scan, n) = self.read_id();
            bytes += n;
            let Scan::Found(id) = scan else {
                continue;
            };
            if !id.crc_ok {
                self.status |= CRC_ERROR;
                continue;
            }
            if id.id.track == self.track
                && id.id.sector == self.sector
                && self.check_head.is_none_or(|h| h == id.id.head)
            {
                self.status &= !CRC_ERROR;
                self.sector_length = 0x80 << (id.id.length & 0x03);
                self.id = Some(id);
                return bytes;
            }
        }
        bytes
    }

    /// Scan for the next ID field of any kind. Gives up after two index
    /// pulses, or sooner when the revolution budget runs out. Each index
    /// pulse spends one revolution of the budget.
    fn read_id(&mut self) -> (Scan<IdField>, usize) {
        let drive = &mut self.drives[self.current];
        if !drive.is_ready() || drive.bytes_per_track() == 0 {
            self.rev = 0;
            return (Scan::Exhausted, 0);
        }
        let mut scanner = IdScanner::new(self.dden);
        let mut pulses = 0;
        let mut bytes = 0;
        while self.rev > 0 && pulses < READ_ID_PULSES {
            let byte = drive.read_data();
            bytes += 1;
            if drive.index() {
                self.rev -= 1;
                pulses += 1;
            }
            if let Scan::Found(id) = scanner.feed(byte) {
                log::trace!("{}: id {:?} crc ok {}", self.config.model.name(), id.id, id.crc_ok);
                return (Scan::Found(id), bytes);
            }
        }
        (Scan::Exhausted, bytes)
    }

    fn read_datamark(&mut self) -> Option<DataMark> {
        let mut scanner = DataMarkScanner::new(self.dden);
        let drive = &mut self.drives[self.current];
        loop {
            match scanner.feed(drive.read_data()) {
                Scan::Scanning => {}
                Scan::Found(mark) => return Some(mark),
                Scan::Exhausted => return None,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Type III: READ ADDRESS, READ TRACK, WRITE TRACK
    // -----------------------------------------------------------------------

    pub(crate) fn type_iii(&mut self) {
        if !self.config.model.has_motor_line() && !self.drives[self.current].is_ready() {
            self.end_command();
            return;
        }
        match self.state {
            FdcState::WriteTrack => {
                if self.drives[self.current].is_write_protected() {
                    self.status |= WRITE_PROTECT;
                    self.end_command();
                    return;
                }
                self.data_offset = 0;
                self.crc = CrcAccumulator::new();
                self.drives[self.current].wait_index_hole();
                self.set_drq();
            }
            FdcState::ReadTrack => {
                self.drives[self.current].wait_index_hole();
                self.set_drq();
            }
            _ => self.read_address(),
        }
    }

    fn read_address(&mut self) {
        if !self.located {
            let mut bytes = 0;
            self.id = None;
            while self.rev > 0 {
                let (scan, n) = self.read_id();
                bytes += n;
                if let Scan::Found(id) = scan {
                    self.id = Some(id);
                    break;
                }
            }
            self.located = true;
            self.resume_after_scan(bytes);
            return;
        }
        self.located = false;
        if self.id.is_none() {
            self.status |= RECORD_NOT_FOUND;
            self.end_command();
            return;
        }
        if self.id.is_some_and(|id| !id.crc_ok) {
            self.status |= CRC_ERROR;
        }
        self.data_offset = 0;
        self.set_drq();
    }

    // -----------------------------------------------------------------------
    // Type IV: FORCE INTERRUPT
    // -----------------------------------------------------------------------

    pub(crate) fn force_interrupt(&mut self, b: u8) {
        self.events.remove_type(FdcEvent::Command);
        self.events.remove_type(FdcEvent::IndexPulse);
        self.status &= !(BUSY | WRITE_PROTECT | CRC_ERROR | DRQ);
        self.state = FdcState::None;
        self.status_type = StatusType::TypeI;
        self.located = false;
        self.reset_drq();

        if b & 0x08 != 0 {
            self.set_intrq();
            return;
        }
        if b & 0x04 != 0 {
            let drive = &self.drives[self.current];
            let bpt = drive.bytes_per_track();
            if drive.is_ready() && bpt > 0 {
                let left = bpt - drive.position().min(bpt - 1);
                let delay = self.clock.fraction(REVOLUTION_MS, left as u64, bpt as u64);
                self.schedule(delay, FdcEvent::IndexPulse);
            }
        }
        self.schedule_idle();
    }

    // -----------------------------------------------------------------------
    // Data register transfers
    // -----------------------------------------------------------------------

    pub(crate) fn read_sector_byte(&mut self) {
        self.data_offset += 1;
        let drive = &mut self.drives[self.current];
        let Some(byte) = drive.read_data() else {
            self.status |= RECORD_NOT_FOUND;
            self.end_command();
            return;
        };
        self.crc.update(byte.value);
        self.data = byte.value;
        if self.data_offset < self.sector_length {
            return;
        }

        let mut intact = true;
        for _ in 0..2 {
            match drive.read_data() {
                Some(b) => self.crc.update(b.value),
                None => intact = false,
            }
        }
        if intact && self.crc.is_clean() {
            self.status &= !CRC_ERROR;
        } else {
            self.status |= CRC_ERROR;
        }

        if self.multisector && self.status & CRC_ERROR == 0 {
            self.next_sector(READ_RESTART_MS);
        } else {
            self.end_command();
        }
    }

    /// Move on to the following sector of a multi-sector command.
    fn next_sector(&mut self, pause_ms: u64) {
        self.sector = self.sector.wrapping_add(1);
        self.rev = REVOLUTION_BUDGET;
        self.reset_drq();
        self.schedule(self.clock.ms(pause_ms), FdcEvent::Command);
    }

    pub(crate) fn read_address_byte(&mut self) {
        let Some(id) = self.id else {
            self.end_command();
            return;
        };
        let [crc_high, crc_low] = id.crc.to_be_bytes();
        self.data = match self.data_offset {
            0 => id.id.track,
            1 => id.id.head,
            2 => id.id.sector,
            3 => id.id.length,
            4 => crc_high,
            _ => crc_low,
        };
        self.data_offset += 1;
        if self.data_offset == 6 {
            self.sector = id.id.track;
            self.end_command();
        }
    }

    pub(crate) fn read_track_byte(&mut self) {
        let drive = &mut self.drives[self.current];
        // unformatted or unreadable reads as zeros
        self.data = drive.read_data().map_or(0, |b| b.value);
        if drive.index() {
            self.end_command();
        }
    }

    /// Put one byte on the disk, noting a refused write.
    fn put(&mut self, byte: TrackByte) {
        if self.drives[self.current].write_data(byte).is_err() {
            self.status |= WRITE_PROTECT;
        }
    }

    pub(crate) fn write_sector_byte(&mut self, b: u8) {
        if self.data_offset == 0 {
            let zeros = if self.dden { 12 } else { 6 };
            for _ in 0..zeros {
                self.put(TrackByte::data(0x00));
            }
            self.crc = CrcAccumulator::new();
            if self.dden {
                for _ in 0..3 {
                    self.crc.update(MFM_SYNC);
                    self.put(TrackByte::mark(MFM_SYNC));
                }
            }
            let mark = if self.command & 0x01 != 0 { 0xF8 } else { 0xFB };
            self.crc.update(mark);
            self.put(if self.dden {
                TrackByte::data(mark)
            } else {
                TrackByte::mark(mark)
            });
        }

        self.data_offset += 1;
        self.crc.update(b);
        self.put(TrackByte::data(b));
        if self.data_offset < self.sector_length {
            return;
        }

        for crc in self.crc.value().to_be_bytes() {
            self.put(TrackByte::data(crc));
        }
        self.put(TrackByte::data(if self.dden { 0x4E } else { 0xFF }));
        if self.multisector {
            self.next_sector(WRITE_RESTART_MS);
        } else {
            self.end_command();
        }
    }

    /// WRITE TRACK: most bytes go down as given; a few values stand for
    /// marks and for the CRC the controller has been accumulating.
    pub(crate) fn write_track_byte(&mut self, b: u8) {
        let byte = if self.dden {
            match b {
                0xF7 => {
                    let [high, low] = self.crc.value().to_be_bytes();
                    self.put(TrackByte::data(high));
                    TrackByte::data(low)
                }
                0xF5 => {
                    self.crc.preset_mfm_sync();
                    TrackByte::mark(MFM_SYNC)
                }
                0xF6 => TrackByte::mark(MFM_INDEX_SYNC),
                _ => {
                    self.crc.update(b);
                    TrackByte::data(b)
                }
            }
        } else {
            match b {
                0xF7 => {
                    let [high, low] = self.crc.value().to_be_bytes();
                    self.put(TrackByte::data(high));
                    TrackByte::data(low)
                }
                0xFE | 0xF8..=0xFB => {
                    self.crc.reset();
                    self.crc.update(b);
                    TrackByte::mark(b)
                }
                0xFC => TrackByte::mark(b),
                _ => {
                    self.crc.update(b);
                    TrackByte::data(b)
                }
            }
        };
        self.put(byte);
        self.data_offset += 1;
        if self.drives[self.current].index() {
            log::debug!("{}: track written, {} bytes", self.config.model.name(), self.data_offset);
            self.end_command();
        }
    }
}
