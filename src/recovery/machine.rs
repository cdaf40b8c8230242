//! Password-recovery state machine.
//!
//! Transitions are pure: [`RecoveryState::transition`] returns the next state
//! plus the shared-store effects it requires, and [`RecoveryStateMachine`]
//! is the only place those effects are applied.

use super::record::RecoveryRecord;
use crate::clock::EpochMs;
use crate::config::SyncConfig;
use crate::store::SharedStateStore;
use crate::tab::TabId;
use crate::telemetry::{SecurityEventKind, SecurityLog};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ── Pure transitions ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryState {
    #[default]
    Normal,
    RecoveryActive,
}

impl RecoveryState {
    pub fn is_active(self) -> bool {
        self == Self::RecoveryActive
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryInput {
    /// Enter recovery; `persist` also publishes the record and drops the
    /// shared session token.
    Activate { persist: bool },
    /// Leave recovery; `persist` also deletes the shared record.
    Clear { persist: bool },
    /// Adopt whatever the shared store currently says.
    Observe(Option<RecoveryRecord>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEffect {
    WriteRecord(RecoveryRecord),
    RemoveRecord,
    RemoveToken,
}

/// Environment a transition is evaluated in.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    pub tab_id: &'a TabId,
    pub now: EpochMs,
    pub path: &'a str,
    pub timeout_ms: u64,
    /// This tab entered recovery without a shared record to back it
    /// (local-only activation, or the publish failed). Observations of the
    /// shared store cannot end such a recovery; only `Clear` can.
    pub held_locally: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: RecoveryState,
    pub effects: Vec<StoreEffect>,
    /// An observed record was past its timeout.
    pub expired: bool,
}

impl RecoveryState {
    pub fn transition(self, input: RecoveryInput, ctx: TransitionContext<'_>) -> Transition {
        match input {
            RecoveryInput::Activate { persist } => Transition {
                state: Self::RecoveryActive,
                effects: if persist {
                    vec![
                        StoreEffect::WriteRecord(RecoveryRecord::new(ctx.tab_id, ctx.now, ctx.path)),
                        StoreEffect::RemoveToken,
                    ]
                } else {
                    Vec::new()
                },
                expired: false,
            },
            RecoveryInput::Clear { persist } => Transition {
                state: Self::Normal,
                effects: if persist {
                    vec![StoreEffect::RemoveRecord]
                } else {
                    Vec::new()
                },
                expired: false,
            },
            RecoveryInput::Observe(record) => {
                let (observed, effects, expired) = match record {
                    None => (Self::Normal, Vec::new(), false),
                    Some(record) if record.is_expired(ctx.now, ctx.timeout_ms) => {
                        (Self::Normal, vec![StoreEffect::RemoveRecord], true)
                    }
                    Some(record) if record.active => (Self::RecoveryActive, Vec::new(), false),
                    Some(_) => (Self::Normal, Vec::new(), false),
                };
                let state = if self.is_active() && ctx.held_locally {
                    Self::RecoveryActive
                } else {
                    observed
                };
                Transition {
                    state,
                    effects,
                    expired,
                }
            }
        }
    }
}

// ── Stateful machine ────────────────────────────────────────────

/// This tab's recovery mode plus the shared record and token policy.
pub struct RecoveryStateMachine {
    store: Arc<SharedStateStore>,
    log: Arc<SecurityLog>,
    recovery_key: String,
    token_key: String,
    timeout_ms: u64,
    state: Mutex<RecoveryState>,
    /// Set while the local recovery has no published record behind it.
    held_locally: AtomicBool,
    current_path: Mutex<String>,
}

impl RecoveryStateMachine {
    pub fn new(store: Arc<SharedStateStore>, log: Arc<SecurityLog>, config: &SyncConfig) -> Self {
        Self {
            store,
            log,
            recovery_key: config.keys.recovery.clone(),
            token_key: config.keys.token.clone(),
            timeout_ms: config.recovery_timeout_ms,
            state: Mutex::new(RecoveryState::Normal),
            held_locally: AtomicBool::new(false),
            current_path: Mutex::new("/".into()),
        }
    }

    pub fn state(&self) -> RecoveryState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn set_current_path(&self, path: &str) {
        *self.current_path.lock() = path.to_string();
    }

    pub fn current_path(&self) -> String {
        self.current_path.lock().clone()
    }

    pub fn activate(&self, persist: bool) -> RecoveryState {
        self.held_locally.store(!persist, Ordering::SeqCst);
        self.step(RecoveryInput::Activate { persist })
    }

    pub fn clear(&self, persist: bool) -> RecoveryState {
        self.held_locally.store(false, Ordering::SeqCst);
        self.step(RecoveryInput::Clear { persist })
    }

    /// Whether the local recovery is not backed by a shared record.
    pub fn is_held_locally(&self) -> bool {
        self.is_active() && self.held_locally.load(Ordering::SeqCst)
    }

    /// Adopt an externally observed record (expiring it if stale).
    pub fn observe(&self, record: Option<RecoveryRecord>) -> RecoveryState {
        self.step(RecoveryInput::Observe(record))
    }

    /// Re-read the shared record and adopt it.
    pub fn sync_from_shared(&self) -> RecoveryState {
        let record = self.store.read::<RecoveryRecord>(&self.recovery_key);
        self.observe(record)
    }

    /// Read the shared record without touching local state. Expired records
    /// are removed from the store and reported as absent.
    pub fn check_shared(&self) -> Option<RecoveryRecord> {
        let record = self.store.read::<RecoveryRecord>(&self.recovery_key)?;
        if record.is_expired(self.store.now_ms(), self.timeout_ms) {
            tracing::info!(
                owner = %record.tab_id,
                age_ms = record.age_ms(self.store.now_ms()),
                "Clearing expired recovery record"
            );
            self.store.remove(&self.recovery_key);
            self.log
                .record(SecurityEventKind::RecoveryExpired, record.tab_id.clone());
            return None;
        }
        Some(record)
    }

    /// Persist a session token (normal mode).
    pub fn persist_token(&self, token: &str) {
        if let Err(e) = self.store.write(&self.token_key, token) {
            tracing::warn!(key = %self.token_key, "Failed to persist session token: {e}");
        }
    }

    /// Keep a fresh token that arrived while this tab is mid-recovery, so
    /// the password update call can authenticate. Returns whether it was kept.
    pub fn persist_token_if_recovering(&self, token: &str) -> bool {
        if !self.is_active() {
            return false;
        }
        self.persist_token(token);
        self.log
            .record(SecurityEventKind::TokenPreserved, self.current_path());
        true
    }

    pub fn remove_token(&self) {
        self.store.remove(&self.token_key);
    }

    fn step(&self, input: RecoveryInput) -> RecoveryState {
        let path = self.current_path();
        let now = self.store.now_ms();
        let (previous, transition) = {
            let mut state = self.state.lock();
            let previous = *state;
            let transition = previous.transition(
                input,
                TransitionContext {
                    tab_id: self.store.tab_id(),
                    now,
                    path: &path,
                    timeout_ms: self.timeout_ms,
                    held_locally: self.held_locally.load(Ordering::SeqCst),
                },
            );
            *state = transition.state;
            (previous, transition)
        };

        if previous != transition.state {
            tracing::info!(
                tab_id = %self.store.tab_id(),
                from = ?previous,
                to = ?transition.state,
                "Recovery state changed"
            );
        }

        for effect in &transition.effects {
            self.apply(effect);
        }

        if transition.expired {
            self.log
                .record(SecurityEventKind::RecoveryExpired, "observed stale record");
        } else if transition.effects.contains(&StoreEffect::RemoveRecord) {
            self.log.record(SecurityEventKind::RecoveryCleared, path);
        }

        transition.state
    }

    fn apply(&self, effect: &StoreEffect) {
        match effect {
            StoreEffect::WriteRecord(record) => {
                if let Err(e) = self.store.write(&self.recovery_key, record) {
                    tracing::warn!(key = %self.recovery_key, "Failed to publish recovery record: {e}");
                    self.held_locally.store(true, Ordering::SeqCst);
                }
                self.log
                    .record(SecurityEventKind::RecoveryActivated, record.path.clone());
            }
            StoreEffect::RemoveRecord => self.store.remove(&self.recovery_key),
            StoreEffect::RemoveToken => self.remove_token(),
        }
    }
}
