//! Global configuration parsing and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Remote orchestration server connectivity.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MaestroConfig {
    /// Whether the sync channel, mirror, and reaper run at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Server base URL (scheme + authority).
    #[serde(default = "default_maestro_url")]
    pub base_url: String,
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_maestro_url(),
        }
    }
}

/// Agent activity detection thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ActivityConfig {
    /// Idle fallback (ms) for sessions whose effect id is unknown.
    #[serde(default = "default_idle_ms")]
    pub default_idle_ms: u64,
    /// Output-suppression window (ms) after a terminal resize.
    #[serde(default = "default_resize_suppress_ms")]
    pub resize_suppress_ms: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            default_idle_ms: default_idle_ms(),
            resize_suppress_ms: default_resize_suppress_ms(),
        }
    }
}

/// Persistence debounce timings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PersistenceConfig {
    /// Debounce (ms) for full-state saves.
    #[serde(default = "default_save_debounce_ms")]
    pub debounce_ms: u64,
    /// Debounce (ms) for workspace-layout saves.
    #[serde(default = "default_layout_debounce_ms")]
    pub layout_debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_save_debounce_ms(),
            layout_debounce_ms: default_layout_debounce_ms(),
        }
    }
}

/// Event-stream reconnect behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// First-retry delay (ms).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling (ms).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Orphan reaper sweep interval (seconds).
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_maestro_url() -> String {
    "http://127.0.0.1:7870".into()
}

fn default_idle_ms() -> u64 {
    1500
}

fn default_resize_suppress_ms() -> u64 {
    900
}

fn default_save_debounce_ms() -> u64 {
    400
}

fn default_layout_debounce_ms() -> u64 {
    500
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_reap_interval_secs() -> u64 {
    30
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding persisted state files; created when missing.
    pub data_dir: PathBuf,
    /// Leave sessions running at shutdown (dev hot-reload).
    #[serde(default)]
    pub keep_sessions_on_exit: bool,
    /// Orchestration server settings.
    #[serde(default)]
    pub maestro: MaestroConfig,
    /// Activity detection settings.
    #[serde(default)]
    pub activity: ActivityConfig,
    /// Persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Sync channel settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Idle fallback as a `Duration`.
    #[must_use]
    pub fn default_idle(&self) -> Duration {
        Duration::from_millis(self.activity.default_idle_ms)
    }

    /// Resize suppression window as a `Duration`.
    #[must_use]
    pub fn resize_suppress(&self) -> Duration {
        Duration::from_millis(self.activity.resize_suppress_ms)
    }

    /// Full-state save debounce as a `Duration`.
    #[must_use]
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.persistence.debounce_ms)
    }

    /// Layout save debounce as a `Duration`.
    #[must_use]
    pub fn layout_debounce(&self) -> Duration {
        Duration::from_millis(self.persistence.layout_debounce_ms)
    }

    /// Initial reconnect backoff as a `Duration`.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.initial_backoff_ms)
    }

    /// Reconnect backoff ceiling as a `Duration`.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.max_backoff_ms)
    }

    /// Reaper sweep interval as a `Duration`.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.sync.reap_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(AppError::Config("data_dir must not be empty".into()));
        }
        if self.persistence.debounce_ms == 0 {
            return Err(AppError::Config(
                "persistence.debounce_ms must be greater than zero".into(),
            ));
        }
        if self.sync.initial_backoff_ms == 0 {
            return Err(AppError::Config(
                "sync.initial_backoff_ms must be greater than zero".into(),
            ));
        }
        if self.sync.max_backoff_ms < self.sync.initial_backoff_ms {
            return Err(AppError::Config(
                "sync.max_backoff_ms must be at least sync.initial_backoff_ms".into(),
            ));
        }
        if self.maestro.enabled && self.maestro.base_url.trim().is_empty() {
            return Err(AppError::Config(
                "maestro.base_url must not be empty when maestro is enabled".into(),
            ));
        }
        Ok(())
    }
}
