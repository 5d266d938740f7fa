//! Server and agent configuration.
//!
//! Both structs load from an optional TOML file; the CLI layers env vars
//! and flags on top and then calls `validate()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid address {0:?}: expected host:port")]
    Address(String),

    #[error("invalid port in {0:?}: must be between 1 and 65535")]
    Port(String),

    #[error("{0} must be greater than 0")]
    Interval(&'static str),
}

/// How the file-snapshot backend persists state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush after every successful write request.
    OnWrite,
    /// Flush on a fixed timer.
    Periodic(Duration),
}

/// Storage backend selected once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    File(PathBuf),
    Relational(String),
}

/// Collector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    pub address: String,
    /// Seconds between snapshot flushes; 0 flushes on every write.
    pub store_interval_secs: u64,
    /// Snapshot file; empty disables file persistence.
    pub file_storage_path: Option<PathBuf>,
    /// Restore the snapshot file at startup.
    pub restore: bool,
    /// Postgres DSN; when set the relational backend is used.
    pub database_dsn: Option<String>,
    /// Shared HMAC key.
    pub key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            store_interval_secs: 300,
            file_storage_path: Some(PathBuf::from("server-data.json")),
            restore: true,
            database_dsn: None,
            key: None,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(&self.address)
    }

    pub fn flush_mode(&self) -> FlushMode {
        match self.store_interval_secs {
            0 => FlushMode::OnWrite,
            secs => FlushMode::Periodic(Duration::from_secs(secs)),
        }
    }

    pub fn backend(&self) -> BackendKind {
        if let Some(dsn) = self.database_dsn.as_deref().filter(|d| !d.is_empty()) {
            return BackendKind::Relational(dsn.to_string());
        }
        match &self.file_storage_path {
            Some(path) if !path.as_os_str().is_empty() => BackendKind::File(path.clone()),
            _ => BackendKind::Memory,
        }
    }

    pub fn signing_key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector address, `host:port`.
    pub address: String,
    pub poll_interval_secs: u64,
    pub report_interval_secs: u64,
    /// Shared HMAC key.
    pub key: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            poll_interval_secs: 2,
            report_interval_secs: 10,
            key: None,
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Interval("poll interval"));
        }
        if self.report_interval_secs == 0 {
            return Err(ConfigError::Interval("report interval"));
        }
        validate_address(&self.address)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn signing_key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_address(address: &str) -> Result<(), ConfigError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::Address(address.to_string()))?;
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(ConfigError::Address(address.to_string()));
    }
    match port.parse::<u16>() {
        Ok(p) if p >= 1 => Ok(()),
        _ => Err(ConfigError::Port(address.to_string())),
    }
}
