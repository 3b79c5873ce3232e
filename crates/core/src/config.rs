//! Service configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file
//! (or no file at all) yields a runnable configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default port for the upload API
pub const DEFAULT_PORT: u16 = 11021;

/// Default token time-to-live in seconds
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Upper bound for token TTL and job intervals (one year)
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "sensorlog.toml";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the API server binds to
    pub bind: String,
    /// Port the API server listens on
    pub port: u16,
    pub storage: StorageConfig,
    pub tokens: TokenConfig,
    pub weather: WeatherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            storage: StorageConfig::default(),
            tokens: TokenConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

/// Storage backend connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub file: PathBuf,
    /// Pragmas applied to the connection at open (e.g. `journal_mode = "WAL"`)
    pub pragmas: BTreeMap<String, String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("sensorlog.db"),
            pragmas: BTreeMap::new(),
        }
    }
}

/// Session token settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Token lifetime in seconds; also the purge sweep period
    pub ttl_secs: u64,
}

impl TokenConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

/// Background weather fetch settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl WeatherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3600,
        }
    }
}

impl Config {
    /// Parse config from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load config from `path` if given, otherwise from the first file found
    /// in the search path. Falls back to defaults when nothing is found.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            info!(path = %path.display(), "Loading config");
            return Self::load_from(path);
        }

        for candidate in Self::search_paths() {
            if candidate.is_file() {
                info!(path = %candidate.display(), "Loading config");
                return Self::load_from(&candidate);
            }
        }

        warn!("Config file not found, using defaults");
        Ok(Self::default())
    }

    /// Locations checked for a config file, in order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dirs) = ProjectDirs::from("dev", "sensorlog", "sensorlog") {
            paths.push(dirs.config_dir().join("config.toml"));
        }
        paths
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.ttl_secs == 0 {
            return Err(ConfigError::Invalid("tokens.ttl_secs must be positive".into()));
        }
        if self.tokens.ttl_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "tokens.ttl_secs must be at most {}",
                MAX_INTERVAL_SECS
            )));
        }
        if self.weather.enabled && self.weather.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "weather.interval_secs must be positive".into(),
            ));
        }
        if self.weather.interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "weather.interval_secs must be at most {}",
                MAX_INTERVAL_SECS
            )));
        }
        Ok(())
    }
}
