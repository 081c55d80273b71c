//! Daemon configuration.
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. Environment (`PORT`, `RELAY_BIND`)
//! 4. Command-line flags (applied by the binary)

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable holding the listening port.
pub const PORT_ENV: &str = "PORT";

/// Environment variable holding the bind address.
pub const BIND_ENV: &str = "RELAY_BIND";

/// Default listening port
pub const DEFAULT_PORT: u16 = 5000;

/// Default WebSocket endpoint path
pub const DEFAULT_PATH: &str = "/send";

/// Relay daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address to listen on
    pub bind_address: IpAddr,

    /// Port to listen on
    pub port: u16,

    /// Path of the WebSocket endpoint
    pub path: String,

    /// Largest accepted inbound message, in bytes
    pub max_message_size: usize,

    /// Per-frame write timeout
    pub write_timeout_secs: u64,

    /// Interval between sweeps for closed sessions
    pub prune_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            max_message_size: 64 * 1024,
            write_timeout_secs: 10,
            prune_interval_secs: 30,
        }
    }
}

impl RelayConfig {
    /// Parses settings from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads settings from `path`, or from the default location if it exists.
    ///
    /// An explicitly given path must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Applies overrides using a custom variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: PORT_ENV,
                value: port,
            })?;
        }

        if let Some(bind) = lookup(BIND_ENV) {
            self.bind_address = bind.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: BIND_ENV,
                value: bind,
            })?;
        }

        Ok(())
    }

    /// Checks the settings for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        if self.path.contains([':', '*', '{', '}']) {
            return Err(ConfigError::Invalid(format!(
                "path must be a literal route: {}",
                self.path
            )));
        }
        if self.write_timeout_secs == 0 || self.prune_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts and intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    /// Routes that address the endpoint: the path with and without a
    /// trailing slash.
    pub fn endpoint_paths(&self) -> Vec<String> {
        let base = self.path.trim_end_matches('/');
        if base.is_empty() {
            vec!["/".to_string()]
        } else {
            vec![base.to_string(), format!("{base}/")]
        }
    }
}

/// Returns `<config_dir>/chatrelay/relayd.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chatrelay").join("relayd.toml"))
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}
