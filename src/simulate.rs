//! Scripted multi-tab runs over in-process storage and a manual clock.
//!
//! Drives two [`TabContext`]s through a fixed sequence and reports where
//! they ended up. Used by the `tabsync simulate` command.

use crate::auth::{AuthEvent, AuthSnapshot, ScriptedProvider, Session, UserRecord};
use crate::clock::ManualClock;
use crate::config::SyncConfig;
use crate::context::TabContext;
use crate::store::{MemoryStorage, StorageBackend};
use crate::telemetry::SecurityEvent;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const START_MS: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Tab A opens a reset link while tab B receives a sign-in.
    Recovery,
    /// Tab A writes two tokens back to back; tab B must settle on the last.
    TokenRace,
    /// A recovery record outlives its timeout and is cleared by a reader.
    Expiry,
}

#[derive(Debug, Serialize)]
pub struct TabReport {
    pub label: String,
    pub tab_id: String,
    pub state: AuthSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub scenario: Scenario,
    pub tabs: Vec<TabReport>,
    pub shared: BTreeMap<String, Option<String>>,
    pub security_events: Vec<SecurityEvent>,
}

struct Harness {
    config: SyncConfig,
    backend: Arc<MemoryStorage>,
    clock: ManualClock,
}

struct SimTab {
    label: &'static str,
    provider: Arc<ScriptedProvider>,
    context: TabContext,
}

impl Harness {
    fn new(config: SyncConfig) -> Self {
        Self {
            config,
            backend: Arc::new(MemoryStorage::new()),
            clock: ManualClock::new(START_MS),
        }
    }

    fn open_tab(&self, label: &'static str) -> SimTab {
        let provider = Arc::new(ScriptedProvider::new());
        let context = TabContext::new(
            &self.config,
            self.backend.clone(),
            Arc::new(self.clock.clone()),
            provider.clone(),
        );
        SimTab {
            label,
            provider,
            context,
        }
    }

    fn report(&self, scenario: Scenario, tabs: &[&SimTab]) -> SimulationReport {
        let keys = &self.config.keys;
        let shared = [&keys.token, &keys.recovery]
            .into_iter()
            .map(|k| (k.clone(), self.backend.get_item(k)))
            .collect();
        let security_events = tabs
            .first()
            .map(|t| t.context.security_log().entries())
            .unwrap_or_default();

        SimulationReport {
            scenario,
            tabs: tabs
                .iter()
                .map(|t| TabReport {
                    label: t.label.to_string(),
                    tab_id: t.context.tab_id().to_string(),
                    state: t.context.get_state(),
                })
                .collect(),
            shared,
            security_events,
        }
    }
}

fn session(token: &str) -> Session {
    Session::new(token, UserRecord::new("user-1").with_email("user@example.com"))
}

pub async fn run(scenario: Scenario, config: SyncConfig) -> Result<SimulationReport> {
    let harness = Harness::new(config);
    let a = harness.open_tab("A");
    let b = harness.open_tab("B");

    a.context.initialize().await?;
    b.context.initialize().await?;
    // Past the startup window for both tabs.
    harness
        .clock
        .advance(harness.config.startup_suppression_ms as i64 + 1);

    match scenario {
        Scenario::Recovery => {
            b.provider.set_session(Some(session("tok-b")));
            a.context.navigate("/reset-password");
            a.context
                .router()
                .handle_provider_event(AuthEvent::RecoveryDetected(session("tok-recovery")))
                .await;

            harness.clock.advance(10);
            b.context
                .router()
                .handle_provider_event(AuthEvent::SignedIn(session("tok-b")))
                .await;

            harness.clock.advance(40);
            b.context.pump().await;
        }
        Scenario::TokenRace => {
            let router = a.context.router();
            router
                .handle_provider_event(AuthEvent::SignedIn(session("tok-x")))
                .await;
            router
                .handle_provider_event(AuthEvent::TokenRefreshed(session("tok-y")))
                .await;
            b.provider.set_session(Some(session("tok-y")));

            harness.clock.advance(5);
            b.context.pump().await;
        }
        Scenario::Expiry => {
            a.context.navigate("/reset-password");
            a.context.router().activate_recovery(true);
            b.context.pump().await;

            harness.clock.advance(harness.config.recovery_timeout_ms as i64 + 60_000);
            b.context.router().reconcile().await;
        }
    }

    Ok(harness.report(scenario, &[&a, &b]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recovery_scenario_blocks_sign_in_on_second_tab() {
        let report = run(Scenario::Recovery, SyncConfig::default()).await.unwrap();
        let b = &report.tabs[1].state;
        assert!(b.is_password_recovery);
        assert!(!b.is_authenticated);
        assert!(report.shared["password_recovery_active"].is_some());
    }

    #[tokio::test]
    async fn token_race_settles_on_last_token() {
        let report = run(Scenario::TokenRace, SyncConfig::default()).await.unwrap();
        assert_eq!(
            report.shared["auth_token"].as_deref(),
            Some("\"tok-y\"")
        );
        assert!(report.tabs[1].state.is_authenticated);
    }

    #[tokio::test]
    async fn expiry_scenario_clears_record() {
        let report = run(Scenario::Expiry, SyncConfig::default()).await.unwrap();
        assert!(report.shared["password_recovery_active"].is_none());
        assert!(!report.tabs[1].state.is_password_recovery);
    }
}
