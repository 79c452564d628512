// src/config.rs
//! Configuration file parsing for dnfdaemon
//!
//! Supports a TOML configuration file with the following sections:
//! - [daemon] - Socket, lock file and package catalogue
//! - [watchdog] - Idle termination
//! - [auth] - Authorization broker settings
//! - [packages] - Package listing settings
//!
//! Every key is optional; missing keys take the built-in defaults.

use crate::daemon::{DaemonConfig, DEFAULT_ACTION_ID, DEFAULT_SOCKET_PATH, InstanceLock};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dnfdaemon/dnfdaemon.toml";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnfDaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,

    #[serde(default)]
    pub watchdog: WatchdogSection,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub packages: PackagesSection,
}

/// Daemon process settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket file mode, e.g. `0o660`
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Group owning the socket file
    #[serde(default)]
    pub socket_group: Option<String>,

    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    /// JSON catalogue served by the engine
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            socket_group: None,
            lock_path: default_lock_path(),
            catalog_path: None,
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_socket_mode() -> u32 {
    0o660
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(InstanceLock::DEFAULT_PATH)
}

/// Idle watchdog settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ticks")]
    pub idle_timeout_ticks: u64,

    #[serde(default = "default_locked_timeout_ticks")]
    pub locked_timeout_ticks: u64,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval_ms(),
            idle_timeout_ticks: default_idle_timeout_ticks(),
            locked_timeout_ticks: default_locked_timeout_ticks(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_idle_timeout_ticks() -> u64 {
    20
}

fn default_locked_timeout_ticks() -> u64 {
    600
}

/// Authorization settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    /// Ask PolicyKit about callers outside the trusted groups
    #[serde(default = "default_true")]
    pub require_polkit: bool,

    #[serde(default = "default_trusted_gids")]
    pub trusted_gids: Vec<u32>,

    /// Bounded wait for the authorization broker
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,

    #[serde(default = "default_action_id")]
    pub action_id: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            require_polkit: true,
            trusted_gids: default_trusted_gids(),
            auth_timeout_secs: default_auth_timeout_secs(),
            action_id: default_action_id(),
        }
    }
}

fn default_trusted_gids() -> Vec<u32> {
    vec![0]
}

fn default_auth_timeout_secs() -> u64 {
    600
}

fn default_action_id() -> String {
    DEFAULT_ACTION_ID.to_string()
}

/// Package listing settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackagesSection {
    /// Window for the `recent` filter, in days
    #[serde(default = "default_recent_days")]
    pub recent_days: u32,
}

impl Default for PackagesSection {
    fn default() -> Self {
        Self {
            recent_days: default_recent_days(),
        }
    }
}

fn default_recent_days() -> u32 {
    7
}

impl DnfDaemonConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DnfDaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.daemon.socket_mode > 0o777 {
            anyhow::bail!(
                "daemon.socket_mode must be a permission mode (<= 0o777), got {:o}",
                self.daemon.socket_mode
            );
        }
        if self.watchdog.tick_interval_ms == 0 {
            anyhow::bail!("watchdog.tick_interval_ms must be greater than zero");
        }
        if self.watchdog.idle_timeout_ticks == 0 || self.watchdog.locked_timeout_ticks == 0 {
            anyhow::bail!("watchdog timeouts must be at least one tick");
        }
        if self.auth.action_id.trim().is_empty() {
            anyhow::bail!("auth.action_id must not be empty");
        }
        Ok(())
    }

    /// Convert to the daemon's runtime configuration
    pub fn to_daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            socket_path: self.daemon.socket_path.clone(),
            socket_mode: self.daemon.socket_mode,
            socket_group: self.daemon.socket_group.clone(),
            lock_path: self.daemon.lock_path.clone(),
            catalog_path: self.daemon.catalog_path.clone(),
            tick_interval: Duration::from_millis(self.watchdog.tick_interval_ms),
            idle_timeout_ticks: self.watchdog.idle_timeout_ticks,
            locked_timeout_ticks: self.watchdog.locked_timeout_ticks,
            watchdog: self.watchdog.enabled,
            require_polkit: self.auth.require_polkit,
            trusted_gids: self.auth.trusted_gids.clone(),
            auth_timeout: Duration::from_secs(self.auth.auth_timeout_secs),
            action_id: self.auth.action_id.clone(),
            recent_days: self.packages.recent_days,
        }
    }
}
