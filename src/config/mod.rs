//! Configuration module for blobdrain
//!
//! [`DrainerConfig`] collects every knob the drainer used to read from
//! process-wide flags: whether residual data is collected at all, whether the
//! deadlock watchdog runs and how long it waits, and where best-effort
//! statistics dumps are written.
//!
//! # Files
//!
//! Configs can be stored as TOML (`.toml`) or JSON (any other extension).
//!
//! ```toml
//! collect_drain_data = true
//! deadlock_handler = true
//! deadlock_timeout_ms = 6000
//! statistics_dir = "/var/tmp/fmradio"
//! app_name = "fmradio"
//! ```
//!
//! # Example
//!
//! ```ignore
//! use blobdrain::config::DrainerConfig;
//!
//! let config = DrainerConfig::load("drainer.toml")?;
//! let drainer = Drainer::new(graph, strategy, config)?;
//! ```

use crate::error::{DrainError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default watchdog delay in milliseconds
pub const DEFAULT_DEADLOCK_TIMEOUT_MS: u64 = 6000;

/// Default application name used as a prefix for dump files
pub const DEFAULT_APP_NAME: &str = "stream";

/// Extension that selects the TOML format
pub const TOML_EXTENSION: &str = "toml";

/// Drainer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainerConfig {
    /// Collect residual data from every blob. When off, blobs are asked to
    /// discard their leftovers and the drain-data gate opens immediately.
    #[serde(default = "default_true")]
    pub collect_drain_data: bool,

    /// Run the deadlock watchdog
    #[serde(default = "default_true")]
    pub deadlock_handler: bool,

    /// How long a blob may sit in `DrainRequested` before the watchdog forces it forward
    #[serde(default = "default_deadlock_timeout_ms")]
    pub deadlock_timeout_ms: u64,

    /// Directory for statistics dumps; dumps are skipped when unset
    #[serde(default)]
    pub statistics_dir: Option<PathBuf>,

    /// Prefix for dump file names
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

fn default_true() -> bool {
    true
}

fn default_deadlock_timeout_ms() -> u64 {
    DEFAULT_DEADLOCK_TIMEOUT_MS
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            collect_drain_data: true,
            deadlock_handler: true,
            deadlock_timeout_ms: DEFAULT_DEADLOCK_TIMEOUT_MS,
            statistics_dir: None,
            app_name: DEFAULT_APP_NAME.to_string(),
        }
    }
}

impl DrainerConfig {
    /// Create a config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Watchdog delay as a `Duration`
    pub fn deadlock_timeout(&self) -> Duration {
        Duration::from_millis(self.deadlock_timeout_ms)
    }

    pub fn with_drain_data(mut self, collect: bool) -> Self {
        self.collect_drain_data = collect;
        self
    }

    pub fn with_deadlock_handler(mut self, enabled: bool) -> Self {
        self.deadlock_handler = enabled;
        self
    }

    pub fn with_deadlock_timeout(mut self, timeout: Duration) -> Self {
        self.deadlock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_statistics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.statistics_dir = Some(dir.into());
        self
    }

    /// Reject settings the drainer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.deadlock_handler && self.deadlock_timeout_ms == 0 {
            return Err(DrainError::Config(
                "deadlock_timeout_ms must be positive when the deadlock handler is enabled"
                    .to_string(),
            ));
        }
        if self.app_name.is_empty() {
            return Err(DrainError::Config("app_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DrainError::Config(format!("Failed to parse drainer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| DrainError::Config(format!("Failed to parse drainer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; `.toml` files are TOML, everything else JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DrainError::Config(format!("Failed to read drainer config {:?}: {}", path, e))
        })?;

        let parsed = if is_toml(path) {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        };
        parsed.with_context(|| format!("Invalid drainer config {:?}", path))
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load drainer config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config; the format follows the file extension as in [`load`](Self::load)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DrainError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| DrainError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| DrainError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            DrainError::Config(format!("Failed to write drainer config {:?}: {}", path, e))
        })
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(TOML_EXTENSION))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DrainerConfig::default();
        assert!(config.collect_drain_data);
        assert!(config.deadlock_handler);
        assert_eq!(config.deadlock_timeout(), Duration::from_millis(6000));
        assert!(config.statistics_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = DrainerConfig::from_toml_str("deadlock_timeout_ms = 250\n").unwrap();
        assert_eq!(config.deadlock_timeout_ms, 250);
        assert!(config.collect_drain_data);
        assert_eq!(config.app_name, DEFAULT_APP_NAME);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = DrainerConfig::from_toml_str("deadlock_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, DrainError::Config(_)));

        // Fine when the watchdog is off.
        let config =
            DrainerConfig::from_toml_str("deadlock_handler = false\ndeadlock_timeout_ms = 0\n")
                .unwrap();
        assert!(!config.deadlock_handler);
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            DrainerConfig::from_toml_str("collect_drain_data = \"maybe\""),
            Err(DrainError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let config = DrainerConfig::new()
            .with_drain_data(false)
            .with_deadlock_timeout(Duration::from_millis(1500))
            .with_statistics_dir(dir.path());

        for name in ["drainer.toml", "drainer.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            let loaded = DrainerConfig::load(&path).unwrap();
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn test_load_names_the_rejected_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drainer.toml");
        std::fs::write(&path, "deadlock_timeout_ms = 0").unwrap();

        let err = DrainerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("drainer.toml"));
        match err {
            DrainError::WithContext { source, .. } => {
                assert!(matches!(*source, DrainError::Config(_)))
            }
            other => panic!("expected context, got {:?}", other),
        }
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DrainerConfig::load_or_default(dir.path().join("absent.toml"));
        assert_eq!(config, DrainerConfig::default());
    }
}
