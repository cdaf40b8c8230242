//! Identity-provider seam.
//!
//! The provider issues and verifies credentials; this crate only listens to
//! its events and asks for the current session. Provider errors are passed
//! through unchanged.

use super::events::{AuthEvent, Session};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stream of auth events for this tab.
    fn on_auth_event(&self) -> mpsc::UnboundedReceiver<AuthEvent>;

    async fn current_session(&self) -> Result<Option<Session>>;
}

/// In-process provider driven by hand. Used by simulations and tests.
#[derive(Default)]
pub struct ScriptedProvider {
    session: Mutex<Option<Session>>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<AuthEvent>>>,
    offline: AtomicBool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock() = session;
    }

    /// Make `current_session` fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Close every event stream handed out so far.
    pub fn close(&self) {
        self.listeners.lock().clear();
    }

    /// Update the current session to match `event` and deliver it.
    pub fn emit(&self, event: AuthEvent) {
        match &event {
            AuthEvent::SignedOut => self.set_session(None),
            other => self.set_session(other.session().cloned()),
        }
        self.listeners
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    fn on_auth_event(&self) -> mpsc::UnboundedReceiver<AuthEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("identity provider unreachable");
        }
        Ok(self.session.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::events::UserRecord;

    #[tokio::test]
    async fn emit_updates_session_and_notifies() {
        let provider = ScriptedProvider::new();
        let mut rx = provider.on_auth_event();
        let session = Session::new("tok", UserRecord::new("u1"));

        provider.emit(AuthEvent::SignedIn(session.clone()));
        assert_eq!(rx.recv().await, Some(AuthEvent::SignedIn(session.clone())));
        assert_eq!(provider.current_session().await.unwrap(), Some(session));

        provider.emit(AuthEvent::SignedOut);
        assert_eq!(provider.current_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn offline_provider_errors() {
        let provider = ScriptedProvider::new();
        provider.set_offline(true);
        let err = provider.current_session().await.unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }
}
