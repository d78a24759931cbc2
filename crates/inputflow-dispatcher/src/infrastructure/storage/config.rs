//! TOML-based configuration persistence for the dispatcher daemon.
//!
//! The default location is `$XDG_CONFIG_HOME/inputflow/config.toml`, falling
//! back to `~/.config/inputflow/config.toml`.  Example file:
//!
//! ```toml
//! app_switch_timeout_ms = 500
//! dispatching_timeout_ms = 5000
//! key_repeat_enabled = false
//! log_level = "debug"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a partial file (or
//! no file at all) yields the built-in values for whatever is missing.  Older
//! files keep working when new fields are added.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::dispatcher::{
    DispatcherSettings, DEFAULT_APP_SWITCH_TIMEOUT, DEFAULT_DISPATCHING_TIMEOUT,
    DEFAULT_KEY_REPEAT_DELAY, DEFAULT_KEY_REPEAT_TIMEOUT, DEFAULT_SLOW_EVENT_WARNING,
    DEFAULT_STALE_EVENT_TIMEOUT, DEFAULT_STREAM_AHEAD_TIMEOUT,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Dispatcher configuration stored on disk.  Durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatcherConfig {
    #[serde(default = "default_app_switch_timeout_ms")]
    pub app_switch_timeout_ms: u64,
    #[serde(default = "default_stale_event_timeout_ms")]
    pub stale_event_timeout_ms: u64,
    /// How long a target may stay unresponsive before the policy is told.
    #[serde(default = "default_dispatching_timeout_ms")]
    pub dispatching_timeout_ms: u64,
    #[serde(default = "default_stream_ahead_timeout_ms")]
    pub stream_ahead_timeout_ms: u64,
    /// Acknowledgements slower than this are logged.
    #[serde(default = "default_slow_event_warning_ms")]
    pub slow_event_warning_ms: u64,
    #[serde(default = "default_true")]
    pub key_repeat_enabled: bool,
    #[serde(default = "default_key_repeat_timeout_ms")]
    pub key_repeat_timeout_ms: u64,
    #[serde(default = "default_key_repeat_delay_ms")]
    pub key_repeat_delay_ms: u64,
    /// Buffer size of each loopback channel the daemon opens.
    #[serde(default = "default_channel_capacity_bytes")]
    pub channel_capacity_bytes: usize,
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn millis_of(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_app_switch_timeout_ms() -> u64 {
    millis_of(DEFAULT_APP_SWITCH_TIMEOUT)
}
fn default_stale_event_timeout_ms() -> u64 {
    millis_of(DEFAULT_STALE_EVENT_TIMEOUT)
}
fn default_dispatching_timeout_ms() -> u64 {
    millis_of(DEFAULT_DISPATCHING_TIMEOUT)
}
fn default_stream_ahead_timeout_ms() -> u64 {
    millis_of(DEFAULT_STREAM_AHEAD_TIMEOUT)
}
fn default_slow_event_warning_ms() -> u64 {
    millis_of(DEFAULT_SLOW_EVENT_WARNING)
}
fn default_true() -> bool {
    true
}
fn default_key_repeat_timeout_ms() -> u64 {
    millis_of(DEFAULT_KEY_REPEAT_TIMEOUT)
}
fn default_key_repeat_delay_ms() -> u64 {
    millis_of(DEFAULT_KEY_REPEAT_DELAY)
}
fn default_channel_capacity_bytes() -> usize {
    32 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            app_switch_timeout_ms: default_app_switch_timeout_ms(),
            stale_event_timeout_ms: default_stale_event_timeout_ms(),
            dispatching_timeout_ms: default_dispatching_timeout_ms(),
            stream_ahead_timeout_ms: default_stream_ahead_timeout_ms(),
            slow_event_warning_ms: default_slow_event_warning_ms(),
            key_repeat_enabled: default_true(),
            key_repeat_timeout_ms: default_key_repeat_timeout_ms(),
            key_repeat_delay_ms: default_key_repeat_delay_ms(),
            channel_capacity_bytes: default_channel_capacity_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl DispatcherConfig {
    /// The runtime settings this configuration describes.
    pub fn to_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            app_switch_timeout: Duration::from_millis(self.app_switch_timeout_ms),
            stale_event_timeout: Duration::from_millis(self.stale_event_timeout_ms),
            dispatching_timeout: Duration::from_millis(self.dispatching_timeout_ms),
            stream_ahead_timeout: Duration::from_millis(self.stream_ahead_timeout_ms),
            slow_event_warning: Duration::from_millis(self.slow_event_warning_ms),
            key_repeat_enabled: self.key_repeat_enabled,
            key_repeat_timeout: Duration::from_millis(self.key_repeat_timeout_ms),
            key_repeat_delay: Duration::from_millis(self.key_repeat_delay_ms),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default path of the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if neither `XDG_CONFIG_HOME`
/// nor `HOME` is set.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the configuration at `path`, returning defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DispatcherConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &DispatcherConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("inputflow"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("inputflow_test_{}_{}", tag, std::process::id()))
    }

    #[test]
    fn test_default_config_matches_default_settings() {
        // Arrange / Act
        let settings = DispatcherConfig::default().to_settings();

        // Assert
        assert_eq!(settings, DispatcherSettings::default());
    }

    #[test]
    fn test_default_config_values() {
        let cfg = DispatcherConfig::default();

        assert_eq!(cfg.app_switch_timeout_ms, 500);
        assert_eq!(cfg.stale_event_timeout_ms, 10_000);
        assert_eq!(cfg.dispatching_timeout_ms, 5_000);
        assert_eq!(cfg.channel_capacity_bytes, 32 * 1024);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.key_repeat_enabled);
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: DispatcherConfig = toml::from_str("").expect("deserialize empty");

        assert_eq!(cfg, DispatcherConfig::default());
    }

    #[test]
    fn test_deserialize_partial_toml_overrides_defaults() {
        // Arrange
        let toml_str = r#"
dispatching_timeout_ms = 250
key_repeat_enabled = false
"#;

        // Act
        let cfg: DispatcherConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.dispatching_timeout_ms, 250);
        assert!(!cfg.key_repeat_enabled);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.app_switch_timeout_ms, 500);
        assert_eq!(
            cfg.to_settings().dispatching_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<DispatcherConfig, toml::de::Error> =
            toml::from_str("[[[ not valid toml");

        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");

        let cfg = load_config(&path).expect("defaults");

        assert_eq!(cfg, DispatcherConfig::default());
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        // Arrange
        let dir = temp_dir("parse");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("config.toml");
        std::fs::write(&path, "dispatching_timeout_ms = \"soon\"").expect("write");

        // Act
        let result = load_config(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_and_load_round_trip_creates_directories() {
        // Arrange
        let dir = temp_dir("roundtrip");
        let path = dir.join("nested").join("config.toml");
        let cfg = DispatcherConfig {
            stream_ahead_timeout_ms: 123,
            log_level: "debug".to_string(),
            ..DispatcherConfig::default()
        };

        // Act
        save_config(&cfg, &path).expect("save");
        let loaded = load_config(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("inputflow/config.toml"),
                "unexpected config path {path:?}"
            );
        }
        // NoPlatformConfigDir in a stripped environment is also acceptable.
    }
}
