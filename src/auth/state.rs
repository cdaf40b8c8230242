//! Per-tab authenticated-user view with subscribe/notify.
//!
//! [`AuthSnapshot`] transitions are pure functions returning the next
//! snapshot; [`AuthSessionState`] commits them and fans out notifications.
//! Listeners run after the internal lock is released, so they may call
//! back into `get_state`.

use super::events::{AuthEvent, UserRecord};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub is_authenticated: bool,
    pub user: Option<UserRecord>,
    pub is_password_recovery: bool,
    /// Sticky: distinguishes "never signed in" from "signed out".
    pub has_been_authenticated: bool,
}

/// What happened, delivered alongside the new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthNotice {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    SessionRestored,
    RecoveryStarted,
    RecoveryCleared,
    /// A sign-in or restore arrived during recovery and was not applied.
    StillInRecovery,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthNotification {
    pub notice: AuthNotice,
    pub state: AuthSnapshot,
}

impl AuthSnapshot {
    /// Route/feature gate. Recovery sessions never count as signed in.
    pub fn can_access_protected(&self) -> bool {
        self.is_authenticated && !self.is_password_recovery
    }

    pub fn has_signed_out(&self) -> bool {
        self.has_been_authenticated && !self.is_authenticated
    }

    /// Next snapshot for a provider event, or `None` if nothing changes and
    /// nobody needs telling.
    pub fn apply_event(&self, event: &AuthEvent) -> Option<(AuthSnapshot, AuthNotice)> {
        match event {
            AuthEvent::RecoveryDetected(session) => {
                let next = AuthSnapshot {
                    is_authenticated: false,
                    user: Some(session.user.clone()),
                    is_password_recovery: true,
                    has_been_authenticated: self.has_been_authenticated,
                };
                (next != *self).then_some((next, AuthNotice::RecoveryStarted))
            }
            AuthEvent::SignedOut => {
                if !self.is_authenticated && self.user.is_none() {
                    return None;
                }
                let next = AuthSnapshot {
                    is_authenticated: false,
                    user: None,
                    ..self.clone()
                };
                Some((next, AuthNotice::SignedOut))
            }
            AuthEvent::SignedIn(_) | AuthEvent::SessionRestored(_) if self.is_password_recovery => {
                Some((self.clone(), AuthNotice::StillInRecovery))
            }
            AuthEvent::TokenRefreshed(_) if self.is_password_recovery => None,
            AuthEvent::SignedIn(session)
            | AuthEvent::SessionRestored(session)
            | AuthEvent::TokenRefreshed(session) => {
                let notice = match event {
                    AuthEvent::SignedIn(_) => AuthNotice::SignedIn,
                    AuthEvent::SessionRestored(_) => AuthNotice::SessionRestored,
                    _ => AuthNotice::TokenRefreshed,
                };
                let next = AuthSnapshot {
                    is_authenticated: true,
                    user: Some(session.user.clone()),
                    is_password_recovery: false,
                    has_been_authenticated: true,
                };
                if next == *self && notice == AuthNotice::SessionRestored {
                    return None;
                }
                Some((next, notice))
            }
        }
    }

    /// Next snapshot when the tab's recovery mode flips.
    pub fn with_recovery(&self, active: bool) -> Option<(AuthSnapshot, AuthNotice)> {
        if self.is_password_recovery == active {
            return None;
        }
        if active {
            let next = AuthSnapshot {
                is_authenticated: false,
                is_password_recovery: true,
                ..self.clone()
            };
            Some((next, AuthNotice::RecoveryStarted))
        } else {
            let next = AuthSnapshot {
                is_password_recovery: false,
                ..self.clone()
            };
            Some((next, AuthNotice::RecoveryCleared))
        }
    }
}

pub type Listener = Arc<dyn Fn(&AuthNotification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct AuthSessionState {
    snapshot: Mutex<AuthSnapshot>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl AuthSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_state(&self) -> AuthSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AuthNotification) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn apply_event(&self, event: &AuthEvent) -> Option<AuthNotice> {
        self.commit(|snapshot| snapshot.apply_event(event))
    }

    pub fn set_recovery(&self, active: bool) -> Option<AuthNotice> {
        self.commit(|snapshot| snapshot.with_recovery(active))
    }

    fn commit<F>(&self, reduce: F) -> Option<AuthNotice>
    where
        F: FnOnce(&AuthSnapshot) -> Option<(AuthSnapshot, AuthNotice)>,
    {
        let notification = {
            let mut snapshot = self.snapshot.lock();
            let (next, notice) = reduce(&snapshot)?;
            *snapshot = next.clone();
            AuthNotification {
                notice,
                state: next,
            }
        };

        tracing::debug!(notice = ?notification.notice, "Auth state changed");

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&notification);
        }
        Some(notification.notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::events::Session;

    fn session(user: &str) -> Session {
        Session::new(format!("tok-{user}"), UserRecord::new(user))
    }

    #[test]
    fn sign_in_then_out_keeps_sticky_flag() {
        let state = AuthSessionState::new();
        assert_eq!(
            state.apply_event(&AuthEvent::SignedIn(session("u1"))),
            Some(AuthNotice::SignedIn)
        );
        assert!(state.get_state().can_access_protected());

        assert_eq!(state.apply_event(&AuthEvent::SignedOut), Some(AuthNotice::SignedOut));
        let snap = state.get_state();
        assert!(!snap.is_authenticated);
        assert!(snap.user.is_none());
        assert!(snap.has_been_authenticated);
        assert!(snap.has_signed_out());
    }

    #[test]
    fn sign_out_when_never_signed_in_is_silent() {
        let state = AuthSessionState::new();
        assert_eq!(state.apply_event(&AuthEvent::SignedOut), None);
        assert!(!state.get_state().has_signed_out());
    }

    #[test]
    fn sign_in_during_recovery_is_not_applied() {
        let state = AuthSessionState::new();
        state.apply_event(&AuthEvent::RecoveryDetected(session("u1")));

        let notice = state.apply_event(&AuthEvent::SignedIn(session("u1")));
        assert_eq!(notice, Some(AuthNotice::StillInRecovery));
        let snap = state.get_state();
        assert!(!snap.is_authenticated);
        assert!(snap.is_password_recovery);
        assert!(!snap.can_access_protected());
        assert!(!snap.has_been_authenticated);
    }

    #[test]
    fn recovery_blocks_gate_even_if_previously_signed_in() {
        let state = AuthSessionState::new();
        state.apply_event(&AuthEvent::SignedIn(session("u1")));
        assert_eq!(state.set_recovery(true), Some(AuthNotice::RecoveryStarted));

        let snap = state.get_state();
        assert!(snap.is_password_recovery);
        assert!(!snap.is_authenticated);
        assert!(!snap.can_access_protected());
        assert_eq!(state.set_recovery(true), None);
    }

    #[test]
    fn sign_out_during_recovery_is_processed() {
        let state = AuthSessionState::new();
        state.apply_event(&AuthEvent::RecoveryDetected(session("u1")));
        assert_eq!(state.apply_event(&AuthEvent::SignedOut), Some(AuthNotice::SignedOut));
        let snap = state.get_state();
        assert!(snap.user.is_none());
        assert!(snap.is_password_recovery);
    }

    #[test]
    fn token_refresh_during_recovery_leaves_state() {
        let state = AuthSessionState::new();
        state.apply_event(&AuthEvent::RecoveryDetected(session("u1")));
        let before = state.get_state();
        assert_eq!(state.apply_event(&AuthEvent::TokenRefreshed(session("u1"))), None);
        assert_eq!(state.get_state(), before);
    }

    #[test]
    fn repeated_recovery_detection_is_idempotent() {
        let state = AuthSessionState::new();
        assert!(state.apply_event(&AuthEvent::RecoveryDetected(session("u1"))).is_some());
        assert!(state.apply_event(&AuthEvent::RecoveryDetected(session("u1"))).is_none());
    }

    #[test]
    fn listeners_receive_notifications_until_unsubscribed() {
        let state = AuthSessionState::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = state.subscribe(move |n| sink.lock().push(n.notice));

        state.apply_event(&AuthEvent::SignedIn(session("u1")));
        state.set_recovery(true);
        assert!(state.unsubscribe(id));
        assert!(!state.unsubscribe(id));
        state.set_recovery(false);

        assert_eq!(
            *seen.lock(),
            vec![AuthNotice::SignedIn, AuthNotice::RecoveryStarted]
        );
    }

    #[test]
    fn listener_may_read_state_reentrantly() {
        let state = Arc::new(AuthSessionState::new());
        let inner = state.clone();
        let observed = Arc::new(Mutex::new(None));
        let sink = observed.clone();
        state.subscribe(move |_| {
            *sink.lock() = Some(inner.get_state().is_authenticated);
        });
        state.apply_event(&AuthEvent::SignedIn(session("u1")));
        assert_eq!(*observed.lock(), Some(true));
    }
}
