//! Core timing and inspection types for the floppy subsystem.
//!
//! Time is counted in tstates of the emulated CPU. Components never block:
//! work that must happen later is placed on an [`EventQueue`] keyed on the
//! tstate at which it falls due, and the owning machine fires due events as
//! its clock advances.

mod clock;
mod events;
mod indicator;
mod observable;
mod tstates;

pub use clock::ProcessorClock;
pub use events::{EventQueue, Scheduled};
pub use indicator::{Activity, NullIndicator, StatusIndicator, StatusItem};
pub use observable::{Observable, Value};
pub use tstates::Tstates;
