//! Configuration loading.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bouncer identity.
    #[serde(default)]
    pub bouncer: BouncerConfig,
    /// Relational database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Connection-state store configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Secret-at-rest configuration.
    pub secrets: SecretsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Bouncer identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BouncerConfig {
    /// Name clients see status messages from (default: "*bnc").
    #[serde(default = "default_status_nick")]
    pub status_nick: String,
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            status_nick: default_status_nick(),
        }
    }
}

/// Relational database configuration (users, networks).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Connection-state store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Path to the redb connection-state store.
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Secret-at-rest configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Key material for the reversible secret-field transform.
    /// Stored SASL passwords become unreadable if this changes.
    pub key: String,
}

fn default_status_nick() -> String {
    "*bnc".to_string()
}

fn default_db_path() -> String {
    "slbnc.db".to_string()
}

fn default_state_path() -> String {
    "slbnc-state.redb".to_string()
}
