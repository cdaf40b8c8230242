//! JSON view over the storage primitive, bound to one tab.
//!
//! Reads never fail: missing keys and malformed payloads both come back as
//! `None`. Every write and remove stamps `last_local_write[key]` so the
//! router can recognise late echoes of this tab's own writes.

use super::backend::{StorageBackend, StorageEvent};
use crate::clock::{Clock, EpochMs};
use crate::error::StoreError;
use crate::tab::TabId;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callback for external changes to one key.
pub type ChangeCallback = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

pub struct SharedStateStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    tab_id: TabId,
    last_local_write: Mutex<HashMap<String, EpochMs>>,
    watchers: Mutex<HashMap<String, Vec<ChangeCallback>>>,
}

impl SharedStateStore {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>, tab_id: TabId) -> Self {
        Self {
            backend,
            clock,
            tab_id,
            last_local_write: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    pub fn now_ms(&self) -> EpochMs {
        self.clock.now_ms()
    }

    /// Serialize `value` as JSON and store it under `key`.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.write_raw(key, &raw)
    }

    pub fn write_raw(&self, key: &str, raw: &str) -> Result<(), StoreError> {
        self.stamp(key);
        self.backend.set_item(key, raw, &self.tab_id)
    }

    /// Deserialize the value under `key`; malformed JSON reads as absent.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.backend.get_item(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(key = %key, "Ignoring malformed shared value: {e}");
                None
            }
        }
    }

    pub fn read_raw(&self, key: &str) -> Option<String> {
        self.backend.get_item(key)
    }

    pub fn remove(&self, key: &str) {
        self.stamp(key);
        self.backend.remove_item(key, &self.tab_id);
    }

    pub fn last_local_write(&self, key: &str) -> Option<EpochMs> {
        self.last_local_write.lock().get(key).copied()
    }

    /// Whether this tab wrote `key` within the last `window_ms`.
    pub fn wrote_recently(&self, key: &str, window_ms: u64) -> bool {
        self.last_local_write(key)
            .is_some_and(|at| self.clock.now_ms().saturating_sub(at) < window_ms as i64)
    }

    /// Open this tab's notification channel on the backend.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StorageEvent> {
        self.backend.subscribe(&self.tab_id)
    }

    /// Register `callback` for accepted external changes to `key`.
    pub fn on_external_change<F>(&self, key: &str, callback: F)
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        self.watchers
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Invoke watchers of `event.key`. Returns how many ran.
    pub fn dispatch_external(&self, event: &StorageEvent) -> usize {
        let callbacks: Vec<ChangeCallback> = self
            .watchers
            .lock()
            .get(&event.key)
            .cloned()
            .unwrap_or_default();
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    fn stamp(&self, key: &str) {
        let now = self.clock.now_ms();
        self.last_local_write.lock().insert(key.to_string(), now);
    }
}
