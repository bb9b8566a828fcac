//! In-memory protection state owned by the watch/schedule loop.
//!
//! Disposable by design: it is rebuilt empty on every daemon start and never
//! persisted. Holding it as an explicit value (rather than process globals)
//! lets the throttle and periodic-backup decisions be tested with synthetic
//! instants.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ProtectionState {
    last_check: Option<Instant>,
    last_backup: Option<Instant>,
}

impl ProtectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Throttle gate shared by every trigger source. Returns `false` (and
    /// leaves the state untouched) when less than `throttle` has elapsed
    /// since the previous accepted check.
    pub fn should_check(&mut self, now: Instant, throttle: Duration) -> bool {
        if let Some(prev) = self.last_check {
            if now.duration_since(prev) < throttle {
                return false;
            }
        }
        self.last_check = Some(now);
        true
    }

    /// Whether a periodic backup is owed. True on the first healthy cycle
    /// after startup, then once per `interval`.
    pub fn backup_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_backup {
            None => true,
            Some(prev) => now.duration_since(prev) >= interval,
        }
    }

    pub fn mark_backup(&mut self, now: Instant) {
        self.last_backup = Some(now);
    }
}
