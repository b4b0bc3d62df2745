//! Store configuration.
//!
//! The store carries no ambient global state: a [`StoreConfig`] is built
//! (from a TOML file or from defaults) and injected into
//! [`crate::store::DurableStore`] / [`crate::manager::SessionManager`], so
//! tests can run isolated fixtures in parallel.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// What to do when a session file exists but cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptSessionPolicy {
    /// Log a warning and start the tenant over with a fresh session.
    #[default]
    Reset,
    /// Fail the operation and refuse to serve the tenant.
    Fail,
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one `<tenant>.json` file per tenant. `~` is expanded.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Daily credit allowance for standard-tier tenants (default: 5)
    #[serde(default = "default_daily_limit_standard")]
    pub daily_limit_standard: i64,

    /// Daily credit allowance for VIP-tier tenants (default: 20)
    #[serde(default = "default_daily_limit_vip")]
    pub daily_limit_vip: i64,

    /// Maximum messages retained per context; oldest evicted first (default: 100)
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Attempts to acquire the per-file advisory lock before giving up (default: 5)
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,

    /// Delay between lock attempts in milliseconds (default: 100)
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,

    /// Recovery policy for unparseable session files (default: reset)
    #[serde(default)]
    pub on_corrupt: CorruptSessionPolicy,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_daily_limit_standard() -> i64 {
    5
}

fn default_daily_limit_vip() -> i64 {
    20
}

fn default_max_history() -> usize {
    100
}

fn default_lock_retries() -> u32 {
    5
}

fn default_lock_retry_delay_ms() -> u64 {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            daily_limit_standard: default_daily_limit_standard(),
            daily_limit_vip: default_daily_limit_vip(),
            max_history: default_max_history(),
            lock_retries: default_lock_retries(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            on_corrupt: CorruptSessionPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| StoreError::io("reading config file", path, source))?;
        toml::from_str(&contents).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Data directory with `~` expanded.
    pub fn resolved_data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.data_dir, "data");
        assert_eq!(config.daily_limit_standard, 5);
        assert_eq!(config.daily_limit_vip, 20);
        assert_eq!(config.max_history, 100);
        assert_eq!(config.lock_retries, 5);
        assert_eq!(config.lock_retry_delay_ms, 100);
        assert_eq!(config.on_corrupt, CorruptSessionPolicy::Reset);
    }

    #[test]
    fn test_load_partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "data_dir = \"/var/lib/bot\"").unwrap();
        writeln!(file, "daily_limit_vip = 50").unwrap();
        writeln!(file, "on_corrupt = \"fail\"").unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, "/var/lib/bot");
        assert_eq!(config.daily_limit_vip, 50);
        assert_eq!(config.daily_limit_standard, 5);
        assert_eq!(config.on_corrupt, CorruptSessionPolicy::Fail);
    }

    #[test]
    fn test_load_missing_file_is_storage_error() {
        let err = StoreConfig::load("/nonexistent/store.toml").unwrap_err();
        assert!(matches!(err, StoreError::StorageIo { .. }));
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "daily_limit_vip = \"lots\"").unwrap();
        let err = StoreConfig::load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_tilde_expansion() {
        let config = StoreConfig {
            data_dir: "~/bot-data".to_string(),
            ..StoreConfig::default()
        };
        let resolved = config.resolved_data_dir();
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert!(resolved.to_string_lossy().ends_with("bot-data"));
    }
}
