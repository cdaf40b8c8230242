//! Shared ring buffer of recent security-relevant auth events.
//!
//! Diagnostics only: correctness never depends on it, and a corrupt buffer
//! is simply restarted.

use crate::clock::EpochMs;
use crate::store::SharedStateStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RecoveryActivated,
    RecoveryCleared,
    RecoveryExpired,
    SignedOut,
    /// A sign-in arrived while this tab was in recovery mode.
    SignInSuppressed,
    /// Token kept during recovery so the password update can succeed.
    TokenPreserved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub tab_id: String,
    pub timestamp: EpochMs,
    #[serde(default)]
    pub detail: String,
}

pub struct SecurityLog {
    store: Arc<SharedStateStore>,
    key: String,
    capacity: usize,
}

impl SecurityLog {
    pub fn new(store: Arc<SharedStateStore>, key: impl Into<String>, capacity: usize) -> Self {
        Self {
            store,
            key: key.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append an event, evicting the oldest beyond capacity.
    pub fn record(&self, kind: SecurityEventKind, detail: impl Into<String>) {
        let mut events = self.entries();
        events.push(SecurityEvent {
            kind,
            tab_id: self.store.tab_id().to_string(),
            timestamp: self.store.now_ms(),
            detail: detail.into(),
        });
        if events.len() > self.capacity {
            let excess = events.len() - self.capacity;
            events.drain(..excess);
        }
        if let Err(e) = self.store.write(&self.key, &events) {
            tracing::warn!(key = %self.key, "Failed to record security event: {e}");
        }
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<SecurityEvent> {
        self.store.read(&self.key).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStorage;
    use crate::tab::TabId;

    fn log(capacity: usize) -> (Arc<MemoryStorage>, ManualClock, SecurityLog) {
        let backend = Arc::new(MemoryStorage::new());
        let clock = ManualClock::new(1_000);
        let store = Arc::new(SharedStateStore::new(
            backend.clone(),
            Arc::new(clock.clone()),
            TabId("tab_a".into()),
        ));
        (backend, clock, SecurityLog::new(store, "auth_security_events", capacity))
    }

    #[test]
    fn keeps_only_most_recent_entries() {
        let (_, clock, log) = log(10);
        for i in 0..13 {
            clock.advance(1);
            log.record(SecurityEventKind::SignedOut, format!("#{i}"));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].detail, "#3");
        assert_eq!(entries[9].detail, "#12");
        assert_eq!(entries[9].tab_id, "tab_a");
        assert_eq!(entries[9].timestamp, 1_013);
    }

    #[test]
    fn corrupt_buffer_restarts() {
        let (backend, _, log) = log(10);
        backend.set_external("auth_security_events", "[{\"broken\"");
        log.record(SecurityEventKind::RecoveryExpired, "");
        assert_eq!(log.entries().len(), 1);
    }
}
