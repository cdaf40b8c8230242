//! Storage primitive shared by all tabs of one origin.
//!
//! Models the browser's synchronous string key-value store and its
//! storage-change notification: every mutation is announced to all *other*
//! subscribed contexts, never to the writer (unless the platform is broken,
//! see [`MemoryStorage::echo_to_writer`]).

use crate::error::StoreError;
use crate::tab::TabId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Change notification delivered to non-writing contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str, writer: &TabId) -> Result<(), StoreError>;

    fn remove_item(&self, key: &str, writer: &TabId);

    /// Register `context` for change notifications.
    fn subscribe(&self, context: &TabId) -> mpsc::UnboundedReceiver<StorageEvent>;
}

struct Subscriber {
    context: TabId,
    tx: mpsc::UnboundedSender<StorageEvent>,
}

#[derive(Default)]
struct Inner {
    items: HashMap<String, String>,
    subscribers: Vec<Subscriber>,
    echo_to_writer: bool,
    /// Max total bytes of keys + values; `None` = unlimited.
    quota_bytes: Option<usize>,
}

impl Inner {
    fn used_bytes(&self) -> usize {
        self.items.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn announce(&mut self, writer: &TabId, event: StorageEvent) {
        let echo = self.echo_to_writer;
        // Closed receivers belong to torn-down contexts.
        self.subscribers.retain(|sub| {
            if sub.context == *writer && !echo {
                return !sub.tx.is_closed();
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }
}

/// In-process storage shared (via `Arc`) by simulated tabs.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage with a byte quota, mirroring the browser's per-origin limit.
    pub fn with_quota(quota_bytes: usize) -> Self {
        let storage = Self::default();
        storage.inner.lock().quota_bytes = Some(quota_bytes);
        storage
    }

    /// Also deliver notifications to the writing context. Simulates
    /// polyfills that do not honour same-context suppression.
    pub fn echo_to_writer(&self, enabled: bool) {
        self.inner.lock().echo_to_writer = enabled;
    }

    /// Write without an owning context; announced to every subscriber.
    pub fn set_external(&self, key: &str, value: &str) {
        let mut inner = self.inner.lock();
        let old_value = inner.items.insert(key.to_string(), value.to_string());
        if old_value.as_deref() == Some(value) {
            return;
        }
        let nobody = TabId(String::new());
        inner.announce(
            &nobody,
            StorageEvent {
                key: key.to_string(),
                old_value,
                new_value: Some(value.to_string()),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.inner.lock().items.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str, writer: &TabId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        if let Some(quota) = inner.quota_bytes {
            let current = inner.items.get(key).map_or(0, |v| key.len() + v.len());
            let projected = inner.used_bytes() - current + key.len() + value.len();
            if projected > quota {
                return Err(StoreError::Rejected {
                    key: key.to_string(),
                    reason: format!("quota of {quota} bytes exceeded"),
                });
            }
        }

        let old_value = inner.items.insert(key.to_string(), value.to_string());
        // Unchanged values raise no notification.
        if old_value.as_deref() != Some(value) {
            inner.announce(
                writer,
                StorageEvent {
                    key: key.to_string(),
                    old_value,
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    fn remove_item(&self, key: &str, writer: &TabId) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.items.remove(key) {
            inner.announce(
                writer,
                StorageEvent {
                    key: key.to_string(),
                    old_value: Some(old),
                    new_value: None,
                },
            );
        }
    }

    fn subscribe(&self, context: &TabId) -> mpsc::UnboundedReceiver<StorageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(Subscriber {
            context: context.clone(),
            tx,
        });
        rx
    }
}
