//! Configuration for the cross-tab sync subsystem.
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields the stock timings. Environment variables prefixed with
//! `TABSYNC_` override file values.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ignore storage notifications for this long after a tab starts.
const DEFAULT_STARTUP_SUPPRESSION_MS: u64 = 100;

/// Ignore notifications for keys this tab wrote within this window.
const DEFAULT_LOCAL_WRITE_WINDOW_MS: u64 = 1_000;

/// Identity-provider double-fire window.
const DEFAULT_DEDUP_WINDOW_MS: u64 = 500;

/// Recovery records older than this are expired (30 minutes).
const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 30 * 60 * 1_000;

/// Security ring buffer size.
const DEFAULT_SECURITY_LOG_CAPACITY: usize = 10;

/// Well-known shared-store keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    /// Opaque bearer token.
    pub token: String,
    /// `RecoveryRecord` JSON.
    pub recovery: String,
    /// Diagnostics ring buffer.
    pub security_log: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            token: "auth_token".into(),
            recovery: "password_recovery_active".into(),
            security_log: "auth_security_events".into(),
        }
    }
}

/// Timing and key configuration shared by every tab of one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub startup_suppression_ms: u64,
    pub local_write_window_ms: u64,
    pub dedup_window_ms: u64,
    pub recovery_timeout_ms: u64,
    pub security_log_capacity: usize,
    pub keys: StorageKeys,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            startup_suppression_ms: DEFAULT_STARTUP_SUPPRESSION_MS,
            local_write_window_ms: DEFAULT_LOCAL_WRITE_WINDOW_MS,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            recovery_timeout_ms: DEFAULT_RECOVERY_TIMEOUT_MS,
            security_log_capacity: DEFAULT_SECURITY_LOG_CAPACITY,
            keys: StorageKeys::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("invalid tabsync config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Load from `path`, or the default location if present, or defaults.
    /// Environment overrides are applied last.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::load(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `TABSYNC_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        fn env_num<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok()?.trim().parse().ok()
        }

        if let Some(v) = env_num("TABSYNC_STARTUP_SUPPRESSION_MS") {
            self.startup_suppression_ms = v;
        }
        if let Some(v) = env_num("TABSYNC_LOCAL_WRITE_WINDOW_MS") {
            self.local_write_window_ms = v;
        }
        if let Some(v) = env_num("TABSYNC_DEDUP_WINDOW_MS") {
            self.dedup_window_ms = v;
        }
        if let Some(v) = env_num("TABSYNC_RECOVERY_TIMEOUT_MS") {
            self.recovery_timeout_ms = v;
        }
        if let Some(v) = env_num("TABSYNC_SECURITY_LOG_CAPACITY") {
            self.security_log_capacity = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recovery_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "recovery_timeout_ms",
            });
        }
        if self.security_log_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "security_log_capacity",
            });
        }

        let keys = [
            ("keys.token", &self.keys.token),
            ("keys.recovery", &self.keys.recovery),
            ("keys.security_log", &self.keys.security_log),
        ];
        for (field, key) in keys {
            if key.trim().is_empty() {
                return Err(ConfigError::EmptyKey { field });
            }
        }
        if self.keys.token == self.keys.recovery || self.keys.token == self.keys.security_log {
            return Err(ConfigError::DuplicateKey(self.keys.token.clone()));
        }
        if self.keys.recovery == self.keys.security_log {
            return Err(ConfigError::DuplicateKey(self.keys.recovery.clone()));
        }
        Ok(())
    }
}

/// `<config dir>/tabsync/config.toml` for the current platform.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tabsync")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_protocol_timings() {
        let config = SyncConfig::default();
        assert_eq!(config.startup_suppression_ms, 100);
        assert_eq!(config.local_write_window_ms, 1_000);
        assert_eq!(config.dedup_window_ms, 500);
        assert_eq!(config.recovery_timeout_ms, 1_800_000);
        assert_eq!(config.security_log_capacity, 10);
        assert_eq!(config.keys.token, "auth_token");
        assert_eq!(config.keys.recovery, "password_recovery_active");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            dedup_window_ms = 250

            [keys]
            token = "sb_token"
            "#,
        )
        .unwrap();
        assert_eq!(config.dedup_window_ms, 250);
        assert_eq!(config.keys.token, "sb_token");
        assert_eq!(config.keys.recovery, "password_recovery_active");
        assert_eq!(config.startup_suppression_ms, 100);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = SyncConfig::from_toml_str("recovery_timeout_ms = 0").unwrap_err();
        assert!(err.to_string().contains("recovery_timeout_ms"));
    }

    #[test]
    fn rejects_colliding_keys() {
        let mut config = SyncConfig::default();
        config.keys.recovery = config.keys.token.clone();
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateKey("auth_token".into()))
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "security_log_capacity = 4").unwrap();
        let config = SyncConfig::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.security_log_capacity, 4);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SyncConfig::load(&dir.path().join("nope.toml"));
        assert!(result.is_err());
    }
}
