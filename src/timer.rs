//! Wall-clock timers driven by explicit polling.
//!
//! Nothing here sleeps or spawns. The owner asks for the next deadline,
//! waits however it likes, and polls with the current instant.

use std::time::{Duration, Instant};

/// A single-shot timer. Arming replaces any pending deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn arm(&mut self, now: Instant, after: Duration) {
        self.0 = Some(now + after);
    }

    pub fn cancel(&mut self) {
        self.0 = None;
    }

    pub fn is_armed(&self) -> bool {
        self.0.is_some()
    }

    pub fn due_at(&self) -> Option<Instant> {
        self.0
    }

    /// Returns `true` exactly once when the deadline has passed, disarming it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.0 {
            Some(at) if now >= at => {
                self.0 = None;
                true
            }
            _ => false,
        }
    }
}

/// A repeating timer. Ticks are scheduled from the previous deadline, not
/// from when the poll happened, so late polls don't stretch the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    next: Option<Instant>,
    period: Duration,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self { next: None, period }
    }

    pub fn start(&mut self, now: Instant) {
        self.next = Some(now + self.period);
    }

    pub fn stop(&mut self) {
        self.next = None;
    }

    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    pub fn due_at(&self) -> Option<Instant> {
        self.next
    }

    /// Consume one elapsed tick, if any. Call repeatedly to drain a backlog.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.next {
            Some(at) if now >= at => {
                self.next = Some(at + self.period);
                true
            }
            _ => false,
        }
    }
}
