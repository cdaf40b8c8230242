//! Cross-tab synchronization of auth and recovery state.
//!
//! The shared store is an eventually consistent, last-write-wins channel with
//! unreliable same-writer suppression. This module adds:
//! - Three-layer notification filtering (startup, tab identity, recent write)
//! - Identity-provider event deduplication
//! - The router that applies accepted inputs to the tab's auth state

pub mod dedup;
pub mod filter;
pub mod router;

pub use dedup::EventDeduplicator;
pub use filter::{FilterVerdict, NotificationFilter};
pub use router::CrossTabEventRouter;
