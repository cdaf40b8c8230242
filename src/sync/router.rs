//! Cross-tab event router.
//!
//! Two inputs feed one tab's auth state:
//!
//! - storage-change notifications from other tabs, passed through the
//!   [`NotificationFilter`] and then re-read from the store (the store, not
//!   the notification payload, is authoritative)
//! - identity-provider callbacks, deduplicated but never filtered
//!
//! Recovery policy while `isPasswordRecovery` is set:
//!
//! | event              | action                                       |
//! |--------------------|----------------------------------------------|
//! | recovery-detected  | (re)activate, idempotent                     |
//! | signed-out         | processed normally                           |
//! | signed-in/restored | not applied; listeners get `StillInRecovery` |
//! | token-refreshed    | token persisted                              |

use super::dedup::EventDeduplicator;
use super::filter::{FilterVerdict, NotificationFilter};
use crate::auth::{AuthEvent, AuthNotice, AuthSessionState, AuthSnapshot, IdentityProvider};
use crate::config::{StorageKeys, SyncConfig};
use crate::recovery::RecoveryStateMachine;
use crate::store::{SharedStateStore, StorageEvent};
use crate::telemetry::{SecurityEventKind, SecurityLog};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct CrossTabEventRouter {
    store: Arc<SharedStateStore>,
    recovery: Arc<RecoveryStateMachine>,
    auth: Arc<AuthSessionState>,
    provider: Arc<dyn IdentityProvider>,
    log: Arc<SecurityLog>,
    filter: NotificationFilter,
    dedup: EventDeduplicator,
    keys: StorageKeys,
    settle_interval: Duration,
    /// Token this tab last acted on.
    known_token: Mutex<Option<String>>,
    /// Keys whose notifications were dropped for timing reasons.
    deferred: Mutex<BTreeSet<String>>,
    storage_events: Mutex<Option<mpsc::UnboundedReceiver<StorageEvent>>>,
    provider_events: Mutex<Option<mpsc::UnboundedReceiver<AuthEvent>>>,
}

impl CrossTabEventRouter {
    /// Subscribes to both inputs immediately; the startup window starts now.
    pub fn new(
        store: Arc<SharedStateStore>,
        recovery: Arc<RecoveryStateMachine>,
        auth: Arc<AuthSessionState>,
        provider: Arc<dyn IdentityProvider>,
        log: Arc<SecurityLog>,
        config: &SyncConfig,
    ) -> Self {
        let filter = NotificationFilter::new(
            store.tab_id().clone(),
            store.now_ms(),
            config.startup_suppression_ms,
            config.local_write_window_ms,
        );
        let storage_events = store.subscribe();
        let provider_events = provider.on_auth_event();

        Self {
            store,
            recovery,
            auth,
            provider,
            log,
            filter,
            dedup: EventDeduplicator::new(config.dedup_window_ms),
            keys: config.keys.clone(),
            settle_interval: Duration::from_millis(
                config
                    .startup_suppression_ms
                    .max(config.local_write_window_ms)
                    .max(1),
            ),
            known_token: Mutex::new(None),
            deferred: Mutex::new(BTreeSet::new()),
            storage_events: Mutex::new(Some(storage_events)),
            provider_events: Mutex::new(Some(provider_events)),
        }
    }

    pub fn state(&self) -> AuthSnapshot {
        self.auth.get_state()
    }

    // ── Startup ─────────────────────────────────────────────────

    /// Adopt persisted recovery state, then ask the provider for an existing
    /// session. Provider errors are returned unchanged.
    pub async fn initialize(&self) -> Result<AuthSnapshot> {
        self.refresh_recovery();
        if let Some(session) = self.provider.current_session().await? {
            self.apply_provider_event(AuthEvent::SessionRestored(session));
        }
        Ok(self.auth.get_state())
    }

    // ── Identity-provider input ─────────────────────────────────

    pub async fn handle_provider_event(&self, event: AuthEvent) -> Option<AuthNotice> {
        if !self.dedup.admit(&event, self.store.now_ms()) {
            tracing::debug!(
                kind = ?event.kind(),
                user = event.user_id().unwrap_or("-"),
                "Dropping duplicate identity-provider event"
            );
            return None;
        }
        self.apply_provider_event(event)
    }

    fn apply_provider_event(&self, event: AuthEvent) -> Option<AuthNotice> {
        match &event {
            AuthEvent::RecoveryDetected(session) => {
                self.recovery.activate(true);
                self.recovery.persist_token_if_recovering(&session.token);
                self.remember_token(Some(session.token.clone()));
                self.auth.apply_event(&event)
            }
            AuthEvent::SignedOut => self.sign_out(),
            AuthEvent::SignedIn(session) | AuthEvent::SessionRestored(session) => {
                // The shared record may be newer than any notification we
                // have processed, so consult it directly.
                if self.refresh_recovery() {
                    tracing::info!(
                        tab_id = %self.store.tab_id(),
                        user = %session.user.id,
                        "Sign-in not applied while password recovery is active"
                    );
                    self.log
                        .record(SecurityEventKind::SignInSuppressed, session.user.id.clone());
                } else {
                    self.recovery.persist_token(&session.token);
                    self.remember_token(Some(session.token.clone()));
                }
                self.auth.apply_event(&event)
            }
            AuthEvent::TokenRefreshed(session) => {
                if self.refresh_recovery() {
                    self.recovery.persist_token_if_recovering(&session.token);
                } else {
                    self.recovery.persist_token(&session.token);
                }
                self.remember_token(Some(session.token.clone()));
                self.auth.apply_event(&event)
            }
        }
    }

    /// Sign out this tab and drop the shared token. Not deduplicated.
    pub fn sign_out(&self) -> Option<AuthNotice> {
        self.recovery.remove_token();
        self.remember_token(None);
        self.log.record(SecurityEventKind::SignedOut, "");
        self.auth.apply_event(&AuthEvent::SignedOut)
    }

    // ── Explicit recovery control ───────────────────────────────

    pub fn activate_recovery(&self, persist: bool) -> Option<AuthNotice> {
        self.recovery.activate(persist);
        self.auth.set_recovery(true)
    }

    /// Password updated: leave recovery everywhere. The user stays signed
    /// out here until the provider reports a new sign-in.
    pub fn complete_recovery(&self) -> Option<AuthNotice> {
        self.recovery.clear(true);
        self.remember_token(None);
        self.auth.set_recovery(false)
    }

    // ── Storage input ───────────────────────────────────────────

    pub async fn handle_storage_event(&self, event: StorageEvent) -> FilterVerdict {
        let verdict = self.filter.evaluate(&event, &self.store);
        if !verdict.is_accepted() {
            tracing::debug!(
                tab_id = %self.store.tab_id(),
                key = %event.key,
                verdict = ?verdict,
                "Suppressed storage notification"
            );
            if verdict.needs_reconcile() && self.is_routed(&event.key) {
                self.deferred.lock().insert(event.key);
            }
            return verdict;
        }

        self.store.dispatch_external(&event);
        self.route_key(&event.key).await;
        verdict
    }

    /// Drain queued notifications and provider events, then retry deferred
    /// keys whose suppression window has passed. Storage notifications are
    /// drained before provider events. Returns how many inputs were handled.
    pub async fn pump(&self) -> usize {
        let storage: Vec<StorageEvent> = drain(&self.storage_events);
        let provider: Vec<AuthEvent> = drain(&self.provider_events);
        let handled = storage.len() + provider.len();

        for event in storage {
            self.handle_storage_event(event).await;
        }
        for event in provider {
            self.handle_provider_event(event).await;
        }
        self.reconcile_deferred().await;
        handled
    }

    /// Re-read deferred keys that are no longer suppressed.
    pub async fn reconcile_deferred(&self) {
        let ready: Vec<String> = {
            let mut deferred = self.deferred.lock();
            let ready: Vec<String> = deferred
                .iter()
                .filter(|key| self.filter.settled(key, &self.store))
                .cloned()
                .collect();
            for key in &ready {
                deferred.remove(key);
            }
            ready
        };

        for key in ready {
            tracing::debug!(key = %key, "Reconciling deferred key");
            self.route_key(&key).await;
        }
    }

    /// Poll: re-read recovery record and token directly, bypassing the
    /// notification filters.
    pub async fn reconcile(&self) {
        self.deferred.lock().clear();
        self.refresh_recovery();
        self.refresh_token().await;
    }

    /// Event loop. Runs until the identity-provider stream closes.
    pub async fn run(&self) {
        let storage = self.storage_events.lock().take();
        let provider = self.provider_events.lock().take();
        let (Some(mut storage), Some(mut provider)) = (storage, provider) else {
            tracing::warn!("Router event loop already running");
            return;
        };

        let mut settle = tokio::time::interval(self.settle_interval);
        let mut storage_open = true;
        loop {
            tokio::select! {
                event = storage.recv(), if storage_open => match event {
                    Some(event) => {
                        self.handle_storage_event(event).await;
                    }
                    None => storage_open = false,
                },
                event = provider.recv() => match event {
                    Some(event) => {
                        self.handle_provider_event(event).await;
                    }
                    None => break,
                },
                _ = settle.tick() => self.reconcile_deferred().await,
            }
        }
        tracing::debug!(tab_id = %self.store.tab_id(), "Router event loop stopped");
    }

    // ── Internals ───────────────────────────────────────────────

    fn is_routed(&self, key: &str) -> bool {
        key == self.keys.recovery || key == self.keys.token
    }

    async fn route_key(&self, key: &str) {
        if key == self.keys.recovery {
            let was_active = self.recovery.is_active();
            let active = self.refresh_recovery();
            if was_active && !active {
                // A session hidden by recovery may now apply.
                self.refresh_token().await;
            }
        } else if key == self.keys.token {
            self.refresh_token().await;
        }
    }

    /// Adopt the shared recovery record. Returns whether recovery is active.
    fn refresh_recovery(&self) -> bool {
        let was_active = self.recovery.is_active();
        let active = self.recovery.sync_from_shared().is_active();
        if was_active && !active {
            self.remember_token(None);
        }
        self.auth.set_recovery(active);
        active
    }

    /// React to the shared token as it is *now*, not as a notification said
    /// it was.
    async fn refresh_token(&self) -> Option<AuthNotice> {
        let current: Option<String> = self.store.read(&self.keys.token);
        let known = self.known_token.lock().clone();
        if known == current {
            return None;
        }

        let Some(token) = current else {
            self.remember_token(None);
            return self.auth.apply_event(&AuthEvent::SignedOut);
        };

        match self.provider.current_session().await {
            Ok(Some(session)) if session.token == token => {
                // Token may have moved on while we awaited the provider.
                let latest: Option<String> = self.store.read(&self.keys.token);
                if latest.as_deref() != Some(token.as_str()) {
                    tracing::debug!("Shared token changed during session lookup");
                    return None;
                }
                self.remember_token(Some(token));
                if self.refresh_recovery() {
                    self.log
                        .record(SecurityEventKind::SignInSuppressed, session.user.id.clone());
                }
                self.auth.apply_event(&AuthEvent::SessionRestored(session))
            }
            Ok(_) => {
                tracing::debug!(
                    tab_id = %self.store.tab_id(),
                    "Provider session does not match shared token yet"
                );
                None
            }
            Err(e) => {
                tracing::warn!(tab_id = %self.store.tab_id(), "Session lookup failed: {e}");
                None
            }
        }
    }

    fn remember_token(&self, token: Option<String>) {
        *self.known_token.lock() = token;
    }
}

fn drain<T>(slot: &Mutex<Option<mpsc::UnboundedReceiver<T>>>) -> Vec<T> {
    let mut guard = slot.lock();
    let mut out = Vec::new();
    if let Some(rx) = guard.as_mut() {
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSessionState, ScriptedProvider, Session, UserRecord};
    use crate::clock::ManualClock;
    use crate::store::{MemoryStorage, StorageBackend};
    use crate::tab::TabId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn router(clock: &ManualClock) -> (Arc<MemoryStorage>, CrossTabEventRouter) {
        let config = SyncConfig::default();
        let backend = Arc::new(MemoryStorage::new());
        let store = Arc::new(SharedStateStore::new(
            backend.clone(),
            Arc::new(clock.clone()),
            TabId("tab_self".into()),
        ));
        let log = Arc::new(SecurityLog::new(
            store.clone(),
            config.keys.security_log.clone(),
            config.security_log_capacity,
        ));
        let recovery = Arc::new(RecoveryStateMachine::new(store.clone(), log.clone(), &config));
        let router = CrossTabEventRouter::new(
            store,
            recovery,
            Arc::new(AuthSessionState::new()),
            Arc::new(ScriptedProvider::new()),
            log,
            &config,
        );
        (backend, router)
    }

    #[tokio::test]
    async fn accepted_changes_reach_key_watchers() {
        let clock = ManualClock::new(0);
        let (backend, router) = router(&clock);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        router.store.on_external_change("theme", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        // Inside the startup window: dropped, and unrouted keys are not deferred.
        backend.set_external("theme", "\"dark\"");
        router.pump().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(router.deferred.lock().is_empty());

        clock.advance(150);
        backend.set_external("theme", "\"light\"");
        router.pump().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn suppressed_routed_key_is_deferred_until_settled() {
        let clock = ManualClock::new(0);
        let (backend, router) = router(&clock);
        backend.set_external(
            "password_recovery_active",
            r#"{"active":true,"timestamp":0,"tabId":"tab_other","path":"/"}"#,
        );

        router.pump().await;
        assert!(router.deferred.lock().contains("password_recovery_active"));
        assert!(!router.state().is_password_recovery);

        clock.advance(100);
        router.pump().await;
        assert!(router.deferred.lock().is_empty());
        assert!(router.state().is_password_recovery);
    }

    #[tokio::test]
    async fn local_only_recovery_blocks_sign_in() {
        let clock = ManualClock::new(0);
        let (backend, router) = router(&clock);
        router.activate_recovery(false);
        assert!(backend.get_item("password_recovery_active").is_none());

        let session = Session::new("t", UserRecord::new("u1"));
        let notice = router
            .handle_provider_event(AuthEvent::SignedIn(session.clone()))
            .await;
        assert_eq!(notice, Some(AuthNotice::StillInRecovery));
        let state = router.state();
        assert!(state.is_password_recovery);
        assert!(!state.is_authenticated);
        assert!(!state.can_access_protected());
        assert!(backend.get_item("auth_token").is_none());

        clock.advance(600);
        router
            .handle_provider_event(AuthEvent::TokenRefreshed(session))
            .await;
        let state = router.state();
        assert!(state.is_password_recovery);
        assert!(!state.is_authenticated);
        assert_eq!(backend.get_item("auth_token").as_deref(), Some("\"t\""));
    }

    #[tokio::test]
    async fn extreme_record_timestamp_is_treated_as_expired() {
        let clock = ManualClock::new(1_700_000_000_000);
        let (backend, router) = router(&clock);
        clock.advance(150);
        backend.set_external(
            "password_recovery_active",
            r#"{"active":true,"timestamp":-9223372036854775808,"tabId":"tab_other","path":"/"}"#,
        );

        router.pump().await;
        assert!(!router.state().is_password_recovery);
        assert!(backend.get_item("password_recovery_active").is_none());
    }

    #[tokio::test]
    async fn second_run_call_returns_immediately() {
        let clock = ManualClock::new(0);
        let (_, router) = router(&clock);
        router.storage_events.lock().take();
        tokio::time::timeout(Duration::from_secs(1), router.run())
            .await
            .unwrap();
    }
}
