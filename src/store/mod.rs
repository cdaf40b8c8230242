//! Shared key-value store: the only channel between tabs.
//!
//! - [`backend`]: the raw storage primitive and its change notifications
//! - [`shared`]: per-tab JSON wrapper with local-write bookkeeping

pub mod backend;
pub mod shared;

pub use backend::{MemoryStorage, StorageBackend, StorageEvent};
pub use shared::SharedStateStore;
