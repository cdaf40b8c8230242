//! Authentication session state for one tab.
//!
//! Provides:
//! - Closed set of identity-provider events ([`AuthEvent`])
//! - The [`IdentityProvider`] seam and a scripted in-process implementation
//! - [`AuthSessionState`]: snapshot + subscribe/unsubscribe for UI and routing
//!
//! Recovery sessions are never treated as normal authenticated sessions.

pub mod events;
pub mod provider;
pub mod state;

pub use events::{AuthEvent, AuthEventKind, Session, UserRecord};
pub use provider::{IdentityProvider, ScriptedProvider};
pub use state::{AuthNotice, AuthNotification, AuthSessionState, AuthSnapshot, ListenerId};
