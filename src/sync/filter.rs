//! Suppression filters for storage-change notifications.
//!
//! The platform's "writers don't see their own change" guarantee is
//! best-effort, so every notification passes three independent checks,
//! in order:
//!
//! 1. startup window: nothing is trusted for a short time after the tab starts
//! 2. tab identity: payloads tagged with this tab's id are our own echo
//! 3. recent local write: this tab wrote the same key very recently

use crate::clock::EpochMs;
use crate::store::{SharedStateStore, StorageEvent};
use crate::tab::TabId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    StartupWindow,
    OwnTab,
    RecentLocalWrite,
}

impl FilterVerdict {
    pub fn is_accepted(self) -> bool {
        self == Self::Accept
    }

    /// Suppressed for timing reasons only; the key must be re-read later.
    pub fn needs_reconcile(self) -> bool {
        matches!(self, Self::StartupWindow | Self::RecentLocalWrite)
    }
}

#[derive(Debug, Clone)]
pub struct NotificationFilter {
    tab_id: TabId,
    started_at: EpochMs,
    startup_suppression_ms: u64,
    local_write_window_ms: u64,
}

impl NotificationFilter {
    pub fn new(
        tab_id: TabId,
        started_at: EpochMs,
        startup_suppression_ms: u64,
        local_write_window_ms: u64,
    ) -> Self {
        Self {
            tab_id,
            started_at,
            startup_suppression_ms,
            local_write_window_ms,
        }
    }

    pub fn in_startup_window(&self, now: EpochMs) -> bool {
        now.saturating_sub(self.started_at) < self.startup_suppression_ms as i64
    }

    pub fn evaluate(&self, event: &StorageEvent, store: &SharedStateStore) -> FilterVerdict {
        if self.in_startup_window(store.now_ms()) {
            return FilterVerdict::StartupWindow;
        }
        if event
            .new_value
            .as_deref()
            .and_then(payload_tab_id)
            .is_some_and(|id| id == self.tab_id.as_str())
        {
            return FilterVerdict::OwnTab;
        }
        if store.wrote_recently(&event.key, self.local_write_window_ms) {
            return FilterVerdict::RecentLocalWrite;
        }
        FilterVerdict::Accept
    }

    /// Whether a deferred key may now be re-read.
    pub fn settled(&self, key: &str, store: &SharedStateStore) -> bool {
        !self.in_startup_window(store.now_ms())
            && !store.wrote_recently(key, self.local_write_window_ms)
    }
}

/// `tabId` of a JSON object payload, if it has one.
fn payload_tab_id(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("tabId")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStorage;
    use std::sync::Arc;

    fn setup() -> (ManualClock, SharedStateStore, NotificationFilter) {
        let clock = ManualClock::new(1_000_000);
        let tab = TabId("tab_self".into());
        let store = SharedStateStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(clock.clone()),
            tab.clone(),
        );
        let filter = NotificationFilter::new(tab, 1_000_000, 100, 1_000);
        (clock, store, filter)
    }

    fn event(key: &str, new_value: Option<&str>) -> StorageEvent {
        StorageEvent {
            key: key.into(),
            old_value: None,
            new_value: new_value.map(str::to_string),
        }
    }

    #[test]
    fn startup_window_suppresses_everything() {
        let (clock, store, filter) = setup();
        clock.advance(99);
        let verdict = filter.evaluate(&event("k", Some("1")), &store);
        assert_eq!(verdict, FilterVerdict::StartupWindow);
        assert!(verdict.needs_reconcile());

        clock.advance(1);
        assert_eq!(filter.evaluate(&event("k", Some("1")), &store), FilterVerdict::Accept);
    }

    #[test]
    fn own_tab_tag_is_suppressed() {
        let (clock, store, filter) = setup();
        clock.advance(500);
        let mine = r#"{"active":true,"timestamp":1,"tabId":"tab_self","path":"/"}"#;
        let theirs = r#"{"active":true,"timestamp":1,"tabId":"tab_other","path":"/"}"#;
        let verdict = filter.evaluate(&event("password_recovery_active", Some(mine)), &store);
        assert_eq!(verdict, FilterVerdict::OwnTab);
        assert!(!verdict.needs_reconcile());
        assert_eq!(
            filter.evaluate(&event("password_recovery_active", Some(theirs)), &store),
            FilterVerdict::Accept
        );
    }

    #[test]
    fn untagged_and_malformed_payloads_pass_identity_check() {
        let (clock, store, filter) = setup();
        clock.advance(500);
        for raw in ["\"token\"", "[1,2]", "{oops", "{\"tabId\":7}"] {
            assert_eq!(filter.evaluate(&event("k", Some(raw)), &store), FilterVerdict::Accept);
        }
        assert_eq!(filter.evaluate(&event("k", None), &store), FilterVerdict::Accept);
    }

    #[test]
    fn recent_local_write_suppresses_same_key_only() {
        let (clock, store, filter) = setup();
        clock.advance(500);
        store.write("auth_token", "mine").unwrap();

        clock.advance(400);
        assert_eq!(
            filter.evaluate(&event("auth_token", Some("\"x\"")), &store),
            FilterVerdict::RecentLocalWrite
        );
        assert!(!filter.settled("auth_token", &store));
        assert_eq!(
            filter.evaluate(&event("other", Some("\"x\"")), &store),
            FilterVerdict::Accept
        );

        clock.advance(600);
        assert!(filter.settled("auth_token", &store));
    }
}
