use std::time::{Duration, Instant};

// Pending save state. Nothing here runs on its own: the owner of the store
// calls Store::run_pending from its loop, and a save happens there if one is
// due.
#[derive(Debug, Default)]
pub(super) struct Autosave {
    interval: Option<Duration>,
    deadline: Option<Instant>,
    save_soon: bool,
}

impl Autosave {
    pub(super) fn new(interval: Option<Duration>) -> Self {
        Autosave {
            interval,
            ..Default::default()
        }
    }

    pub(super) fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub(super) fn set_interval(&mut self, interval: Option<Duration>, now: Instant, dirty: bool) {
        self.interval = interval;
        self.deadline = match interval {
            Some(i) if dirty => Some(now + i),
            _ => None,
        };
    }

    // Called when the store goes from clean to dirty.
    pub(super) fn arm(&mut self, now: Instant) {
        if let Some(i) = self.interval {
            self.deadline = Some(now + i);
        }
    }

    // Returns false if a save was already requested.
    pub(super) fn request(&mut self) -> bool {
        !std::mem::replace(&mut self.save_soon, true)
    }

    pub(super) fn is_requested(&self) -> bool {
        self.save_soon
    }

    pub(super) fn due(&self, now: Instant) -> bool {
        self.save_soon || self.deadline.map_or(false, |d| now >= d)
    }

    pub(super) fn saved(&mut self) {
        self.deadline = None;
        self.save_soon = false;
    }

    // Try again a full interval from now.
    pub(super) fn failed(&mut self, now: Instant) {
        self.save_soon = false;
        self.arm(now);
    }

    pub(super) fn reset(&mut self) {
        self.deadline = None;
        self.save_soon = false;
    }
}
