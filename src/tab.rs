//! Per-context tab identity.
//!
//! A `TabId` lives exactly as long as the process/context that created it and
//! is never persisted, so a reloaded tab is a new writer.

use crate::clock::EpochMs;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier tagging this context's shared-store writes.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub String);

impl TabId {
    /// Timestamp plus 64 random bits; no coordination between tabs needed.
    pub fn generate(now_ms: EpochMs) -> Self {
        let suffix: u64 = rand::random();
        Self(format!("tab_{now_ms:x}_{suffix:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
