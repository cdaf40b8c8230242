//! Cross-tab authentication and password-recovery state synchronization.
//!
//! Independent tabs of one origin share nothing but a persistent key-value
//! store that notifies *other* tabs of changes. This crate keeps every tab's
//! view of "signed in?" and "in password recovery?" convergent over that
//! channel:
//!
//! - [`tab`]: per-context identity tagging writes
//! - [`store`]: storage primitive + JSON store view with local-write tracking
//! - [`recovery`]: recovery record and state machine with 30-minute expiry
//! - [`auth`]: auth snapshot, provider events, subscribe/notify
//! - [`sync`]: notification filters, event dedup, the router
//! - [`context`]: per-tab composition root

pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod recovery;
pub mod simulate;
pub mod store;
pub mod sync;
pub mod tab;
pub mod telemetry;

pub use auth::{AuthEvent, AuthNotice, AuthSnapshot, IdentityProvider, Session, UserRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use context::TabContext;
pub use error::{ConfigError, StoreError};
pub use recovery::{RecoveryRecord, RecoveryState, RecoveryStateMachine};
pub use store::{MemoryStorage, SharedStateStore, StorageBackend, StorageEvent};
pub use sync::CrossTabEventRouter;
pub use tab::TabId;
