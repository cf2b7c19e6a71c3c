//! Owner of every controller in a machine.
//!
//! Controllers live in an arena and are addressed by [`FdcHandle`]. A
//! handle stays valid for the life of the registry no matter how many
//! controllers are added after it.

use emu_core::Tstates;

use crate::Wd1770;

/// Stable reference to a controller in an [`FdcRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdcHandle(usize);

impl FdcHandle {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Default)]
pub struct FdcRegistry {
    fdcs: Vec<Wd1770>,
}

impl FdcRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, fdc: Wd1770) -> FdcHandle {
        self.fdcs.push(fdc);
        log::debug!("fdc registry: {} controllers", self.fdcs.len());
        FdcHandle(self.fdcs.len() - 1)
    }

    #[must_use]
    pub fn get(&self, handle: FdcHandle) -> Option<&Wd1770> {
        self.fdcs.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: FdcHandle) -> Option<&mut Wd1770> {
        self.fdcs.get_mut(handle.0)
    }

    /// Run every controller's events up to `now`, in handle order.
    pub fn run_until(&mut self, now: Tstates) {
        for fdc in &mut self.fdcs {
            fdc.run_until(now);
        }
    }

    /// Earliest time any controller needs to run.
    #[must_use]
    pub fn next_event(&self) -> Option<Tstates> {
        self.fdcs.iter().filter_map(Wd1770::next_event).min()
    }

    pub fn handles(&self) -> impl Iterator<Item = FdcHandle> + use<> {
        (0..self.fdcs.len()).map(FdcHandle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fdcs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fdcs.is_empty()
    }
}
