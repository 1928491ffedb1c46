//! Server configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, a TOML
//! file, the `PALABRE_LISTEN` environment variable, then CLI flags (applied
//! by the binary).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default listen address (the historical port of the relay).
pub const DEFAULT_LISTEN: &str = "0.0.0.0:1234";

/// Environment variable overriding the listen address.
pub const LISTEN_ENV: &str = "PALABRE_LISTEN";

const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid listen address '{value}': {reason}")]
    InvalidListen { value: String, reason: String },
}

/// Runtime configuration of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub listen: SocketAddr,

    /// Upper bound for writing one line to one client
    pub write_timeout_ms: u64,

    /// How long shutdown waits for connected clients to finish
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 1234)),
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Loads configuration from `path`, or from the user config file when
    /// `path` is `None` and that file exists.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file is not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&contents, &path)
    }

    /// Location of the user config file (`$XDG_CONFIG_HOME/palabre/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("palabre").join("config.toml"))
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// Takes a lookup function rather than reading the process environment
    /// directly so callers and tests control the source.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(LISTEN_ENV) {
            self.listen = parse_listen(&value)?;
        }
        Ok(self)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Parses a listen address such as `127.0.0.1:1234`.
pub fn parse_listen(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e: std::net::AddrParseError| ConfigError::InvalidListen {
            value: value.to_string(),
            reason: e.to_string(),
        })
}
