//! Configuration management
//!
//! Reads and writes the broker configuration (`~/.switchyard/config.json`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::paths;
use crate::runner::RunnerOptions;

/// Error types for configuration handling
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine home directory")]
    NoHome,

    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write config {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What to do when a name resolves to no manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedNamePolicy {
    /// Create the instance with permissive capabilities and let the launch
    /// step fail if nothing can back it.
    #[default]
    Permissive,
    /// Complete the connect with `INVALID_ARGUMENT`.
    Reject,
}

/// Native runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub kill_on_shutdown: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            kill_on_shutdown: true,
        }
    }
}

impl RunnerConfig {
    pub fn options(&self) -> RunnerOptions {
        RunnerOptions {
            env: self.env.clone(),
            kill_on_shutdown: self.kill_on_shutdown,
        }
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Defaults to `~/.switchyard/manifests`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_dir: Option<PathBuf>,
    /// Defaults to `~/.switchyard/switchyard.sock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub unresolved_names: UnresolvedNamePolicy,
    #[serde(default)]
    pub start_sandboxed: bool,
    #[serde(default = "default_true")]
    pub watch_manifests: bool,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Services connected when the daemon starts.
    #[serde(default)]
    pub startup: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            manifest_dir: None,
            socket_path: None,
            unresolved_names: UnresolvedNamePolicy::default(),
            start_sandboxed: false,
            watch_manifests: true,
            runner: RunnerConfig::default(),
            startup: Vec::new(),
        }
    }
}

impl ShellConfig {
    /// Configured manifest directory, or the default one
    pub fn manifest_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.manifest_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::manifest_dir().map_err(|_| ConfigError::NoHome),
        }
    }

    /// Configured socket path, or the default one
    pub fn socket_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.socket_path {
            Some(path) => Ok(path.clone()),
            None => paths::socket_path().map_err(|_| ConfigError::NoHome),
        }
    }
}

/// Load the configuration from the default location
pub fn load_config() -> Result<ShellConfig, ConfigError> {
    let path = paths::config_path().map_err(|_| ConfigError::NoHome)?;
    load_config_from(&path)
}

/// Load the configuration from `path`; a missing file yields defaults
pub fn load_config_from(path: &Path) -> Result<ShellConfig, ConfigError> {
    if !path.exists() {
        debug!("No config at {:?}, using defaults", path);
        return Ok(ShellConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Write the configuration to `path`, backing up any existing file
pub fn save_config(config: &ShellConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    // Backup existing config
    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        std::fs::copy(path, &backup_path).map_err(|source| ConfigError::Write {
            path: backup_path.clone(),
            source,
        })?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
