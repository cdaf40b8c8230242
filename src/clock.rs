//! Millisecond wall-clock source.
//!
//! All protocol timing (startup window, recent-write window, dedup window,
//! recovery expiry) reads time through [`Clock`] so simulations and tests can
//! drive it deterministically.

use parking_lot::Mutex;
use std::sync::Arc;

/// Epoch milliseconds.
pub type EpochMs = i64;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> EpochMs;
}

/// Real time via `chrono`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMs {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock shared between simulated tabs.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<EpochMs>>,
}

impl ManualClock {
    pub fn new(start_ms: EpochMs) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: i64) {
        *self.now.lock() += ms;
    }

    pub fn set(&self, ms: EpochMs) {
        *self.now.lock() = ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMs {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance(250);
        assert_eq!(other.now_ms(), 1_250);
        other.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
