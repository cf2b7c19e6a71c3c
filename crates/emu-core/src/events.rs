//! Delayed-callback queue keyed on the emulated clock.
//!
//! The queue only orders and hands back events; the owner decides what an
//! event means when it falls due. Events due at the same tstate come back
//! in the order they were added.

use crate::Tstates;

/// An event waiting on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled<E> {
    pub at: Tstates,
    pub event: E,
}

/// Single-threaded event queue.
#[derive(Debug, Clone)]
pub struct EventQueue<E> {
    /// Sorted by due time, earliest first.
    pending: Vec<Scheduled<E>>,
}

impl<E: Copy + PartialEq> EventQueue<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Schedule `event` to fire at `at`.
    pub fn add(&mut self, at: Tstates, event: E) {
        let slot = self.pending.partition_point(|s| s.at <= at);
        self.pending.insert(slot, Scheduled { at, event });
    }

    /// Cancel every pending event equal to `event`. Returns how many went.
    pub fn remove_type(&mut self, event: E) -> usize {
        let before = self.pending.len();
        self.pending.retain(|s| s.event != event);
        before - self.pending.len()
    }

    /// Due time of the earliest pending event.
    #[must_use]
    pub fn next_due(&self) -> Option<Tstates> {
        self.pending.first().map(|s| s.at)
    }

    /// Take the earliest event if it is due at or before `now`.
    pub fn pop_due(&mut self, now: Tstates) -> Option<Scheduled<E>> {
        if self.pending.first()?.at <= now {
            Some(self.pending.remove(0))
        } else {
            None
        }
    }

    /// Whether an event equal to `event` is waiting.
    #[must_use]
    pub fn contains(&self, event: E) -> bool {
        self.pending.iter().any(|s| s.event == event)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl<E: Copy + PartialEq> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Ev {
        Step,
        Motor,
    }

    #[test]
    fn events_come_back_in_time_order() {
        let mut q = EventQueue::new();
        q.add(Tstates(300), Ev::Motor);
        q.add(Tstates(100), Ev::Step);
        q.add(Tstates(200), Ev::Step);

        assert_eq!(q.next_due(), Some(Tstates(100)));
        assert!(q.pop_due(Tstates(99)).is_none(), "nothing due yet");
        let first = q.pop_due(Tstates(1000)).expect("due");
        assert_eq!(first.at, Tstates(100));
        let second = q.pop_due(Tstates(1000)).expect("due");
        assert_eq!(second.at, Tstates(200));
        let third = q.pop_due(Tstates(1000)).expect("due");
        assert_eq!(third.event, Ev::Motor);
        assert!(q.is_empty());
    }

    #[test]
    fn same_time_keeps_insertion_order() {
        let mut q = EventQueue::new();
        q.add(Tstates(50), Ev::Motor);
        q.add(Tstates(50), Ev::Step);
        assert_eq!(q.pop_due(Tstates(50)).map(|s| s.event), Some(Ev::Motor));
        assert_eq!(q.pop_due(Tstates(50)).map(|s| s.event), Some(Ev::Step));
    }

    #[test]
    fn remove_type_cancels_all_matching() {
        let mut q = EventQueue::new();
        q.add(Tstates(10), Ev::Step);
        q.add(Tstates(20), Ev::Motor);
        q.add(Tstates(30), Ev::Step);
        assert_eq!(q.remove_type(Ev::Step), 2);
        assert_eq!(q.len(), 1);
        assert!(!q.contains(Ev::Step));
        assert!(q.contains(Ev::Motor));
    }
}
