//! Pool configuration
//!
//! Loaded from a TOML file, from environment variables, or both:
//!
//! ```toml
//! database_url = "postgres://localhost/app"
//! max_connections = 10
//! acquire_timeout_secs = 5
//! ```
//!
//! Environment variables:
//!   DATABASE_URL                   # Connection string
//!   DBACTION_MAX_CONNECTIONS       # Pool ceiling (default: 5)
//!   DBACTION_MIN_CONNECTIONS       # Idle connections kept open (default: 0)
//!   DBACTION_ACQUIRE_TIMEOUT_SECS  # Wait for a free connection (default: 30)

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/postgres";

/// Kept low; most callers hold one connection per request.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_MAX_CONNECTIONS: &str = "DBACTION_MAX_CONNECTIONS";
const ENV_MIN_CONNECTIONS: &str = "DBACTION_MIN_CONNECTIONS";
const ENV_ACQUIRE_TIMEOUT: &str = "DBACTION_ACQUIRE_TIMEOUT_SECS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error("min_connections ({min}) exceeds max_connections ({max})")]
    PoolBounds { min: u32, max: u32 },
}

/// PostgreSQL pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PgConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PgConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|var| std::env::var(var).ok())
    }

    /// Read a TOML config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()
    }

    /// Apply environment overrides read through `lookup`.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(value) = lookup(ENV_MAX_CONNECTIONS) {
            self.max_connections = parse_var(ENV_MAX_CONNECTIONS, value)?;
        }
        if let Some(value) = lookup(ENV_MIN_CONNECTIONS) {
            self.min_connections = parse_var(ENV_MIN_CONNECTIONS, value)?;
        }
        if let Some(value) = lookup(ENV_ACQUIRE_TIMEOUT) {
            self.acquire_timeout_secs = parse_var(ENV_ACQUIRE_TIMEOUT, value)?;
        }
        self.validate()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.min_connections > self.max_connections {
            return Err(ConfigError::PoolBounds {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        Ok(self)
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}
