//! Identity-provider double-fire suppression.
//!
//! The same event kind for the same user inside the window counts once. The
//! window is anchored at the first accepted event, so a steady stream is
//! still let through once per window.

use crate::auth::{AuthEvent, AuthEventKind};
use crate::clock::EpochMs;
use parking_lot::Mutex;
use std::collections::HashMap;

type DedupKey = (AuthEventKind, Option<String>);

pub struct EventDeduplicator {
    window_ms: u64,
    seen: Mutex<HashMap<DedupKey, EpochMs>>,
}

impl EventDeduplicator {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// `true` if `event` should be processed; records it when so.
    pub fn admit(&self, event: &AuthEvent, now: EpochMs) -> bool {
        let window = self.window_ms as i64;
        let key = (event.kind(), event.user_id().map(str::to_string));
        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.saturating_sub(*at) < window);

        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, now);
        true
    }
}
