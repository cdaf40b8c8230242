use crate::clock::EpochMs;
use crate::tab::TabId;
use serde::{Deserialize, Serialize};

/// Shared marker that some tab is in a password-recovery flow.
///
/// Stored under a single key; replaced wholesale, never patched. The
/// timestamp is what lets readers expire it without any background timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRecord {
    pub active: bool,
    pub timestamp: EpochMs,
    pub tab_id: String,
    pub path: String,
}

impl RecoveryRecord {
    pub fn new(tab_id: &TabId, now: EpochMs, path: &str) -> Self {
        Self {
            active: true,
            timestamp: now,
            tab_id: tab_id.to_string(),
            path: path.to_string(),
        }
    }

    /// Milliseconds since the record was written (negative under clock skew).
    /// Saturates, since `timestamp` is whatever another tab wrote.
    pub fn age_ms(&self, now: EpochMs) -> i64 {
        now.saturating_sub(self.timestamp)
    }

    pub fn is_expired(&self, now: EpochMs, timeout_ms: u64) -> bool {
        self.age_ms(now) > i64::try_from(timeout_ms).unwrap_or(i64::MAX)
    }
}
