//! Per-tab composition root.
//!
//! One `TabContext` per execution context owns the tab identity, store view,
//! recovery machine, auth state and router. Nothing is global; consumers get
//! handles from here.

use crate::auth::{
    AuthNotice, AuthNotification, AuthSessionState, AuthSnapshot, IdentityProvider, ListenerId,
};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::recovery::RecoveryStateMachine;
use crate::store::{SharedStateStore, StorageBackend};
use crate::sync::CrossTabEventRouter;
use crate::tab::TabId;
use crate::telemetry::SecurityLog;
use anyhow::Result;
use std::sync::Arc;

pub struct TabContext {
    store: Arc<SharedStateStore>,
    recovery: Arc<RecoveryStateMachine>,
    auth: Arc<AuthSessionState>,
    router: Arc<CrossTabEventRouter>,
    log: Arc<SecurityLog>,
}

impl TabContext {
    pub fn new(
        config: &SyncConfig,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        let tab_id = TabId::generate(clock.now_ms());
        tracing::debug!(tab_id = %tab_id, "Creating tab context");

        let store = Arc::new(SharedStateStore::new(backend, clock, tab_id));
        let log = Arc::new(SecurityLog::new(
            store.clone(),
            config.keys.security_log.clone(),
            config.security_log_capacity,
        ));
        let recovery = Arc::new(RecoveryStateMachine::new(store.clone(), log.clone(), config));
        let auth = Arc::new(AuthSessionState::new());
        let router = Arc::new(CrossTabEventRouter::new(
            store.clone(),
            recovery.clone(),
            auth.clone(),
            provider,
            log.clone(),
            config,
        ));

        Self {
            store,
            recovery,
            auth,
            router,
            log,
        }
    }

    pub fn tab_id(&self) -> &TabId {
        self.store.tab_id()
    }

    pub fn store(&self) -> &Arc<SharedStateStore> {
        &self.store
    }

    pub fn recovery(&self) -> &Arc<RecoveryStateMachine> {
        &self.recovery
    }

    pub fn router(&self) -> &Arc<CrossTabEventRouter> {
        &self.router
    }

    pub fn security_log(&self) -> &Arc<SecurityLog> {
        &self.log
    }

    pub async fn initialize(&self) -> Result<AuthSnapshot> {
        self.router.initialize().await
    }

    pub fn get_state(&self) -> AuthSnapshot {
        self.auth.get_state()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AuthNotification) + Send + Sync + 'static,
    {
        self.auth.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.auth.unsubscribe(id)
    }

    /// Record the page path stamped into recovery records.
    pub fn navigate(&self, path: &str) {
        self.recovery.set_current_path(path);
    }

    pub fn sign_out(&self) -> Option<AuthNotice> {
        self.router.sign_out()
    }

    pub fn complete_recovery(&self) -> Option<AuthNotice> {
        self.router.complete_recovery()
    }

    pub async fn pump(&self) -> usize {
        self.router.pump().await
    }
}
