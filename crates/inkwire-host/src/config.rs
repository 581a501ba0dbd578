//! TOML-based driver configuration.
//!
//! Every field has a serde default so a partial (or absent) file works: on
//! first run `load_config` simply returns [`DriverConfig::default`].  The
//! file lives in the platform config directory:
//! - Linux:   `~/.config/inkwire/config.toml`
//! - macOS:   `~/Library/Application Support/Inkwire/config.toml`
//! - Windows: `%APPDATA%\Inkwire\config.toml`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

/// Driver configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverConfig {
    /// Delay between the transport coming up and the version query, in
    /// milliseconds.  The pen drops writes issued before its notification
    /// pipeline settles.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Delay before retrying a failed link write, in milliseconds.
    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,
    /// App version string advertised in the version handshake.
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_settle_delay_ms() -> u64 {
    500
}
fn default_write_retry_delay_ms() -> u64 {
    500
}
fn default_app_version() -> String {
    "0.0.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            write_retry_delay_ms: default_write_retry_delay_ms(),
            app_version: default_app_version(),
            log_level: default_log_level(),
        }
    }
}

impl DriverConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from disk, returning defaults if the file is absent.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<DriverConfig, ConfigError> {
    let path = config_file_path()?;
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DriverConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists the config, creating the directory on first save.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &DriverConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Inkwire"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("inkwire"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Inkwire")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.settle_delay_ms, 500);
        assert_eq!(cfg.write_retry_delay_ms, 500);
        assert_eq!(cfg.app_version, "0.0.0.0");
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = DriverConfig::default();
        cfg.settle_delay_ms = 250;
        cfg.log_level = "debug".to_string();

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: DriverConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: DriverConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, DriverConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides_only_named_fields() {
        let cfg: DriverConfig = toml::from_str("settle_delay_ms = 100").unwrap();
        assert_eq!(cfg.settle_delay_ms, 100);
        assert_eq!(cfg.write_retry_delay_ms, 500);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let result: Result<DriverConfig, toml::de::Error> = toml::from_str("[[[ nope");
        assert!(result.is_err());
    }

    #[test]
    fn test_durations_derive_from_millis() {
        let cfg = DriverConfig {
            settle_delay_ms: 40,
            write_retry_delay_ms: 7,
            ..DriverConfig::default()
        };
        assert_eq!(cfg.settle_delay(), Duration::from_millis(40));
        assert_eq!(cfg.write_retry_delay(), Duration::from_millis(7));
    }
}
