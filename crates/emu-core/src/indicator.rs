//! Front-end status notifications.
//!
//! Fire-and-forget: a component reports that something started or stopped
//! and carries on regardless of whether anybody listens.

/// Status-bar item a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusItem {
    Disk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Inactive,
}

/// Receiver for status notifications (usually a UI status bar).
pub trait StatusIndicator {
    fn update(&mut self, item: StatusItem, activity: Activity);
}

/// Indicator that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIndicator;

impl StatusIndicator for NullIndicator {
    fn update(&mut self, item: StatusItem, activity: Activity) {
        log::trace!("status {item:?} -> {activity:?}");
    }
}
