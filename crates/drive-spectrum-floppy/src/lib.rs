//! Floppy drive mechanism for ZX Spectrum disk interfaces.
//!
//! Models what sits between a controller and the medium: which cylinder
//! the head is over, which head is active, and where the spinning track is
//! under it. The medium itself is a [`Disk`] holding raw tracks; the drive
//! exchanges one [`TrackByte`] at a time with the current track and raises
//! the index signal each time the track wraps.
//!
//! A real motor never starts at a reproducible rotational position, so
//! loading a disk, switching heads and stepping all nudge the rotation by a
//! random amount. Tests pin this down with [`Fdd::with_seed`].

mod error;

pub use error::FddError;

use emu_core::{Observable, Value};
use format_spectrum_disk::{Disk, TrackByte};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Most heads a drive can have.
pub const MAX_HEADS: u8 = 2;
/// Most cylinders a drive can reach.
pub const MAX_CYLINDERS: u8 = 83;

/// Random rotation after a load: up to `bpt / LOAD_FACT` bytes.
const LOAD_FACT: usize = 16;
/// Random rotation after a head change.
const HEAD_FACT: usize = 16;
/// Random rotation after a step.
const STEP_FACT: usize = 34;

/// Share of a revolution for which the index hole is under the sensor.
const INDEX_HOLE_FRACTION: usize = 50;

/// Mechanism limits of a drive.
///
/// Zero heads and zero cylinders means "take the geometry of whatever disk
/// is inserted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveGeometry {
    pub heads: u8,
    pub cylinders: u8,
}

impl DriveGeometry {
    pub const AUTO: Self = Self::new(0, 0);
    /// Single-sided 40 track 5.25" drive.
    pub const SS_40: Self = Self::new(1, 40);
    /// Double-sided 40 track drive.
    pub const DS_40: Self = Self::new(2, 40);
    /// Single-sided 80 track drive.
    pub const SS_80: Self = Self::new(1, 80);
    /// Double-sided 80 track 3.5" drive.
    pub const DS_80: Self = Self::new(2, 80);

    #[must_use]
    pub const fn new(heads: u8, cylinders: u8) -> Self {
        Self { heads, cylinders }
    }

    #[must_use]
    pub const fn is_auto(&self) -> bool {
        self.heads == 0 && self.cylinders == 0
    }
}

/// Head movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepDirection {
    /// Towards the spindle (higher cylinders).
    #[default]
    In,
    /// Towards cylinder 0.
    Out,
}

/// A floppy drive.
#[derive(Debug)]
pub struct Fdd {
    /// Geometry the drive was declared with.
    declared: DriveGeometry,
    /// Geometry in effect, taken from the disk when `declared` is auto.
    heads: u8,
    cylinders: u8,

    disk: Option<Disk>,
    upside_down: bool,
    /// The disk has more cylinders than the drive can reach.
    unreadable: bool,
    write_protect: bool,

    head: u8,
    cylinder: u8,
    direction: StepDirection,
    /// Rotational position within the current track.
    pos: usize,
    tr00: bool,
    index: bool,

    motor_on: bool,
    head_loaded: bool,
    selected: bool,

    rng: SmallRng,
}

impl Fdd {
    /// Empty drive with the given limits, seeded from the OS.
    pub fn new(geometry: DriveGeometry) -> Result<Self, FddError> {
        Self::build(geometry, SmallRng::from_os_rng())
    }

    /// Empty drive whose rotational jitter is reproducible.
    pub fn with_seed(geometry: DriveGeometry, seed: u64) -> Result<Self, FddError> {
        Self::build(geometry, SmallRng::seed_from_u64(seed))
    }

    fn build(geometry: DriveGeometry, rng: SmallRng) -> Result<Self, FddError> {
        let mut fdd = Self {
            declared: DriveGeometry::AUTO,
            heads: 0,
            cylinders: 0,
            disk: None,
            upside_down: false,
            unreadable: false,
            write_protect: false,
            head: 0,
            cylinder: 0,
            direction: StepDirection::In,
            pos: 0,
            tr00: true,
            index: false,
            motor_on: false,
            head_loaded: false,
            selected: false,
            rng,
        };
        fdd.init(geometry)?;
        Ok(fdd)
    }

    /// Reset to the unloaded state with new limits. Any inserted disk is
    /// dropped; use [`Fdd::unload`] first to keep it.
    pub fn init(&mut self, geometry: DriveGeometry) -> Result<(), FddError> {
        if geometry.heads > MAX_HEADS || geometry.cylinders > MAX_CYLINDERS {
            return Err(FddError::Geom);
        }
        self.declared = geometry;
        self.reset();
        Ok(())
    }

    /// Empty the drive and return it to its declared geometry, head parked
    /// on cylinder 0.
    fn reset(&mut self) {
        self.heads = self.declared.heads;
        self.cylinders = self.declared.cylinders;
        self.disk = None;
        self.upside_down = false;
        self.unreadable = false;
        self.write_protect = false;
        self.head = 0;
        self.cylinder = 0;
        self.direction = StepDirection::In;
        self.pos = 0;
        self.tr00 = true;
        self.index = false;
        self.motor_on = false;
        self.head_loaded = false;
    }

    /// Insert `disk`. A single-sided disk inserted `upside_down` is read by
    /// head 1 rather than head 0.
    pub fn load(&mut self, disk: Disk, upside_down: bool) -> Result<(), FddError> {
        if disk.is_closed() {
            return Err(FddError::Geom);
        }
        if self.declared.is_auto() {
            self.heads = disk.sides();
            self.cylinders = disk.cylinders();
        }
        self.unreadable = disk.cylinders() > self.cylinders;
        if self.unreadable {
            log::debug!(
                "fdd: {} cylinder disk in a {} cylinder drive is unreadable",
                disk.cylinders(),
                self.cylinders
            );
        }
        self.write_protect = disk.is_write_protected();
        self.upside_down = upside_down;
        log::debug!(
            "fdd: loaded {:?} disk, {} sides, {} cylinders",
            disk.kind(),
            disk.sides(),
            disk.cylinders()
        );
        self.disk = Some(disk);
        self.pos = 0;
        self.jitter(LOAD_FACT);
        Ok(())
    }

    /// Eject the disk, handing it back, and return the drive to its
    /// declared geometry.
    pub fn unload(&mut self) -> Option<Disk> {
        let disk = self.disk.take();
        let (motor, head, selected) = (self.motor_on, self.head_loaded, self.selected);
        self.reset();
        self.motor_on = motor;
        self.head_loaded = head;
        self.selected = selected;
        if disk.is_some() {
            log::debug!("fdd: unloaded");
        }
        disk
    }

    // -----------------------------------------------------------------------
    // Control lines
    // -----------------------------------------------------------------------

    pub fn set_motor(&mut self, on: bool) {
        if self.motor_on != on {
            log::trace!("fdd: motor {}", if on { "on" } else { "off" });
        }
        self.motor_on = on;
    }

    pub fn set_head_load(&mut self, load: bool) {
        self.head_loaded = load;
    }

    pub fn select(&mut self, selected: bool) {
        self.selected = selected;
    }

    /// Make `head` the active head. Ignored on single-headed drives.
    pub fn set_head(&mut self, head: u8) {
        if self.heads == 1 {
            return;
        }
        let head = head & 0x01;
        if head != self.head {
            self.head = head;
            self.jitter(HEAD_FACT);
        }
    }

    /// Move the head one cylinder, clamped to the drive's range.
    pub fn step(&mut self, direction: StepDirection) {
        self.direction = direction;
        let last = match self.cylinders {
            0 => MAX_CYLINDERS - 1,
            n => n - 1,
        };
        match direction {
            StepDirection::Out => self.cylinder = self.cylinder.saturating_sub(1),
            StepDirection::In if self.cylinder < last => self.cylinder += 1,
            StepDirection::In => {}
        }
        self.tr00 = self.cylinder == 0;
        log::trace!("fdd: step {direction:?} to cylinder {}", self.cylinder);
        self.jitter(STEP_FACT);
    }

    /// Flip a single-sided disk over.
    pub fn flip(&mut self, upside_down: bool) {
        self.upside_down = upside_down;
    }

    /// Change the write-protect tab of the inserted disk.
    pub fn set_write_protect(&mut self, protect: bool) {
        if let Some(disk) = self.disk.as_mut() {
            disk.set_write_protect(protect);
            self.write_protect = protect;
        }
    }

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------

    /// Surface under the head, if the drive can read it right now.
    fn surface(&self) -> Option<(u8, u8)> {
        if !self.selected || !self.is_ready() || !self.head_loaded || self.unreadable {
            return None;
        }
        let disk = self.disk.as_ref()?;
        let head = if self.upside_down { 1 - self.head } else { self.head };
        (head < disk.sides() && self.cylinder < disk.cylinders()).then_some((head, self.cylinder))
    }

    fn bpt(&self) -> usize {
        self.disk.as_ref().map_or(0, Disk::bpt)
    }

    fn jitter(&mut self, fact: usize) {
        let bpt = self.bpt();
        let span = bpt / fact;
        if span > 0 {
            self.pos = (self.pos + self.rng.random_range(0..span)) % bpt;
        }
    }

    /// Step past one byte. `index` goes high on the byte that completes a
    /// revolution.
    fn advance(&mut self) {
        let bpt = self.bpt();
        if bpt == 0 {
            return;
        }
        self.pos += 1;
        self.index = self.pos >= bpt;
        if self.index {
            self.pos = 0;
        }
    }

    /// Without a readable surface the disk still turns if it can.
    fn idle_spin(&mut self) {
        if self.disk.is_some() && self.motor_on {
            self.advance();
        }
    }

    /// Read the byte under the head and move on. `None` means no data:
    /// no disk, motor off, head unloaded or an unreadable surface.
    pub fn read_data(&mut self) -> Option<TrackByte> {
        let Some((head, cylinder)) = self.surface() else {
            self.idle_spin();
            return None;
        };
        if self.pos >= self.bpt() {
            self.pos = 0;
        }
        let byte = self.disk.as_ref()?.track(head, cylinder)?.byte_at(self.pos);
        self.advance();
        Some(byte)
    }

    /// Record `byte` under the head and move on. Without a readable surface
    /// the byte is dropped; on a protected disk the track is left untouched
    /// and [`FddError::RdOnly`] returned.
    pub fn write_data(&mut self, byte: TrackByte) -> Result<(), FddError> {
        let Some((head, cylinder)) = self.surface() else {
            self.idle_spin();
            return Ok(());
        };
        if self.write_protect {
            self.advance();
            return Err(FddError::RdOnly);
        }
        if self.pos >= self.bpt() {
            self.pos = 0;
        }
        let pos = self.pos;
        if let Some(disk) = self.disk.as_mut() {
            if let Some(mut track) = disk.track_mut(head, cylinder) {
                track.poke(pos, byte);
            }
            disk.set_dirty();
        }
        self.advance();
        Ok(())
    }

    /// Jump to the index hole, for commands that work from a known
    /// rotational reference.
    pub fn wait_index_hole(&mut self) {
        if !self.selected || !self.is_ready() {
            return;
        }
        self.pos = 0;
        self.index = true;
    }

    /// Let the disk turn by `bytes` without reading. `index` reports
    /// whether the index hole passed.
    pub fn rotate(&mut self, bytes: usize) {
        let bpt = self.bpt();
        if bpt == 0 || !self.motor_on {
            return;
        }
        let pos = self.pos + bytes;
        self.index = pos >= bpt;
        self.pos = pos % bpt;
    }

    // -----------------------------------------------------------------------
    // Sensors and state
    // -----------------------------------------------------------------------

    /// Whether the index hole is under the sensor now.
    #[must_use]
    pub fn index_hole(&self) -> bool {
        let bpt = self.bpt();
        self.is_ready() && bpt > 0 && self.pos < bpt / INDEX_HOLE_FRACTION
    }

    /// Whether the last byte exchanged (or rotation) passed the index.
    #[must_use]
    pub const fn index(&self) -> bool {
        self.index
    }

    #[must_use]
    pub const fn tr00(&self) -> bool {
        self.tr00
    }

    /// Disk inserted and motor running.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.disk.is_some() && self.motor_on
    }

    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.disk.is_some()
    }

    #[must_use]
    pub const fn is_unreadable(&self) -> bool {
        self.unreadable
    }

    #[must_use]
    pub const fn is_write_protected(&self) -> bool {
        self.write_protect
    }

    #[must_use]
    pub const fn motor_on(&self) -> bool {
        self.motor_on
    }

    #[must_use]
    pub const fn head_loaded(&self) -> bool {
        self.head_loaded
    }

    #[must_use]
    pub const fn is_selected(&self) -> bool {
        self.selected
    }

    #[must_use]
    pub const fn head(&self) -> u8 {
        self.head
    }

    #[must_use]
    pub const fn cylinder(&self) -> u8 {
        self.cylinder
    }

    #[must_use]
    pub const fn direction(&self) -> StepDirection {
        self.direction
    }

    /// Rotational position within the track.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Geometry in effect (the disk's when the drive is auto).
    #[must_use]
    pub const fn geometry(&self) -> DriveGeometry {
        DriveGeometry::new(self.heads, self.cylinders)
    }

    /// Bytes per track of the inserted disk, 0 when empty.
    #[must_use]
    pub fn bytes_per_track(&self) -> usize {
        self.bpt()
    }

    #[must_use]
    pub fn disk(&self) -> Option<&Disk> {
        self.disk.as_ref()
    }

    pub fn disk_mut(&mut self) -> Option<&mut Disk> {
        self.disk.as_mut()
    }
}

impl Observable for Fdd {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "cylinder" => Some(self.cylinder.into()),
            "head" => Some(self.head.into()),
            "position" => Some((self.pos as u32).into()),
            "index" => Some(self.index.into()),
            "tr00" => Some(self.tr00.into()),
            "motor" => Some(self.motor_on.into()),
            "head_loaded" => Some(self.head_loaded.into()),
            "selected" => Some(self.selected.into()),
            "loaded" => Some(self.is_loaded().into()),
            "unreadable" => Some(self.unreadable.into()),
            "write_protect" => Some(self.write_protect.into()),
            "heads" => Some(self.heads.into()),
            "cylinders" => Some(self.cylinders.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "cylinder",
            "head",
            "position",
            "index",
            "tr00",
            "motor",
            "head_loaded",
            "selected",
            "loaded",
            "unreadable",
            "write_protect",
            "heads",
            "cylinders",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format_spectrum_disk::{Density, DiskType, GapType, ImageReader, TrackLayout};

    fn formatted(sides: u8, cylinders: u8) -> Disk {
        let mut disk = Disk::new(sides, cylinders, Density::Dd, DiskType::Udi).expect("disk");
        let layout = TrackLayout {
            sector_base: 1,
            sectors: 16,
            sector_length: 256,
            gap: GapType::TrDos,
            interleave: 2,
            preindex: false,
        };
        for c in 0..cylinders {
            for h in 0..sides {
                let data = vec![c ^ (h << 7); 16 * 256];
                disk.trackgen(h, c, &layout, &mut ImageReader::new(&data), None)
                    .expect("format");
            }
        }
        disk
    }

    fn running(geometry: DriveGeometry, disk: Disk) -> Fdd {
        let mut fdd = Fdd::with_seed(geometry, 7).expect("drive");
        fdd.load(disk, false).expect("load");
        fdd.select(true);
        fdd.set_motor(true);
        fdd.set_head_load(true);
        fdd
    }

    #[test]
    fn geometry_limits() {
        assert_eq!(Fdd::new(DriveGeometry::new(3, 80)).err(), Some(FddError::Geom));
        assert_eq!(Fdd::new(DriveGeometry::new(2, 84)).err(), Some(FddError::Geom));
        assert!(Fdd::new(DriveGeometry::new(2, 83)).is_ok());
        assert!(Fdd::new(DriveGeometry::AUTO).is_ok());
    }

    #[test]
    fn auto_drive_takes_disk_geometry() {
        let fdd = running(DriveGeometry::AUTO, formatted(1, 40));
        assert_eq!(fdd.geometry(), DriveGeometry::new(1, 40));
        assert!(!fdd.is_unreadable());
    }

    #[test]
    fn too_many_cylinders_is_unreadable() {
        let mut fdd = running(DriveGeometry::DS_40, formatted(2, 80));
        assert!(fdd.is_unreadable());
        for cylinder in 0..40 {
            for head in 0..2 {
                fdd.set_head(head);
                for _ in 0..100 {
                    assert_eq!(fdd.read_data(), None, "cylinder {cylinder} head {head}");
                }
            }
            fdd.step(StepDirection::In);
        }
    }

    #[test]
    fn one_revolution_raises_index_once() {
        let mut fdd = running(DriveGeometry::DS_80, formatted(2, 80));
        fdd.wait_index_hole();
        assert!(fdd.index());
        let bpt = fdd.bytes_per_track();
        let mut pulses = 0;
        let mut marks = 0;
        for _ in 0..bpt {
            let b = fdd.read_data().expect("data");
            marks += usize::from(b.clock_mark);
            pulses += usize::from(fdd.index());
        }
        assert_eq!(pulses, 1, "exactly one index per turn");
        assert!(fdd.index(), "the last byte completes the revolution");
        assert_eq!(marks, 16 * 2 * 3, "three A1 syncs per ID and data field");
        assert_eq!(fdd.position(), 0, "back at the index after a full turn");
        fdd.read_data().expect("next turn");
        assert_eq!(fdd.position(), 1);
        assert!(!fdd.index());
    }

    #[test]
    fn protected_write_leaves_track_alone() {
        let mut disk = formatted(1, 40);
        disk.set_write_protect(true);
        let mut fdd = running(DriveGeometry::AUTO, disk);
        fdd.wait_index_hole();
        let before = fdd.disk().expect("disk").track(0, 0).expect("track").raw().0.to_vec();

        for _ in 0..200 {
            assert_eq!(fdd.write_data(TrackByte::data(0x00)), Err(FddError::RdOnly));
        }
        assert_eq!(fdd.position(), 200, "the disk still turns");
        let after = fdd.disk().expect("disk").track(0, 0).expect("track").raw().0.to_vec();
        assert_eq!(before, after);
        assert!(!fdd.disk().expect("disk").is_dirty());
    }

    #[test]
    fn write_lands_on_the_track() {
        let mut fdd = running(DriveGeometry::AUTO, formatted(1, 40));
        fdd.wait_index_hole();
        fdd.write_data(TrackByte::mark(0xA1)).expect("write");
        fdd.write_data(TrackByte::data(0x42)).expect("write");
        let disk = fdd.disk().expect("disk");
        assert!(disk.is_dirty());
        let track = disk.track(0, 0).expect("track");
        assert_eq!(track.byte_at(0), TrackByte::mark(0xA1));
        assert_eq!(track.byte_at(1), TrackByte::data(0x42));
    }

    #[test]
    fn no_disk_reads_no_data() {
        let mut fdd = Fdd::with_seed(DriveGeometry::DS_80, 1).expect("drive");
        fdd.select(true);
        fdd.set_motor(true);
        fdd.set_head_load(true);
        assert_eq!(fdd.read_data(), None);
        assert_eq!(fdd.write_data(TrackByte::data(1)), Ok(()));
    }

    #[test]
    fn stepping_clamps_and_tracks_zero() {
        let mut fdd = running(DriveGeometry::DS_40, formatted(2, 40));
        assert!(fdd.tr00());
        fdd.step(StepDirection::Out);
        assert_eq!(fdd.cylinder(), 0);
        for _ in 0..50 {
            fdd.step(StepDirection::In);
        }
        assert_eq!(fdd.cylinder(), 39);
        assert!(!fdd.tr00());
        assert_eq!(fdd.direction(), StepDirection::In);
    }

    #[test]
    fn upside_down_single_sided_disk() {
        let mut fdd = running(DriveGeometry::DS_80, formatted(1, 40));
        fdd.flip(true);
        assert_eq!(fdd.read_data(), None, "head 0 faces the blank side");
        fdd.set_head(1);
        fdd.wait_index_hole();
        assert!(fdd.read_data().is_some(), "head 1 reads side 0");
    }

    #[test]
    fn single_head_drive_ignores_head_changes() {
        let mut fdd = running(DriveGeometry::SS_80, formatted(2, 80));
        fdd.set_head(1);
        assert_eq!(fdd.head(), 0);
    }

    #[test]
    fn unload_returns_the_disk() {
        let mut fdd = running(DriveGeometry::AUTO, formatted(2, 80));
        for _ in 0..5 {
            fdd.step(StepDirection::In);
        }
        let disk = fdd.unload().expect("disk back");
        assert_eq!(disk.cylinders(), 80);
        assert!(!fdd.is_loaded());
        assert_eq!(fdd.cylinder(), 0);
        assert_eq!(fdd.geometry(), DriveGeometry::AUTO);
        assert!(fdd.unload().is_none());
    }

    #[test]
    fn rotation_passes_the_index() {
        let mut fdd = running(DriveGeometry::AUTO, formatted(1, 40));
        fdd.wait_index_hole();
        assert!(fdd.index_hole());
        fdd.rotate(3000);
        assert!(!fdd.index());
        assert!(!fdd.index_hole());
        fdd.rotate(3300);
        assert!(fdd.index());
        assert_eq!(fdd.position(), 50);
    }

    #[test]
    fn same_seed_same_rotation() {
        let a = running(DriveGeometry::AUTO, formatted(1, 40));
        let b = running(DriveGeometry::AUTO, formatted(1, 40));
        assert_eq!(a.position(), b.position());
        assert!(a.position() < 6250 / LOAD_FACT);
    }

    #[test]
    fn observable_paths() {
        let fdd = running(DriveGeometry::DS_80, formatted(2, 80));
        for path in fdd.query_paths() {
            assert!(fdd.query(path).is_some(), "{path}");
        }
        assert_eq!(fdd.query("cylinders"), Some(Value::U8(80)));
        assert_eq!(fdd.query("bogus"), None);
    }

    #[test]
    fn geometry_serialises() {
        let json = serde_json::to_string(&DriveGeometry::DS_80).expect("json");
        assert_eq!(json, r#"{"heads":2,"cylinders":80}"#);
        let back: DriveGeometry = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, DriveGeometry::DS_80);
    }
}
