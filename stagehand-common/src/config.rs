//! Configuration loading
//!
//! # Settings Sources Priority
//!
//! 1. Command-line argument (`--config <path>`)
//! 2. Environment variable (`STAGEHAND_CONFIG`)
//! 3. `~/.config/stagehand/config.toml`
//! 4. Built-in defaults (code constants)
//!
//! A missing or malformed file never aborts startup: a warning is logged and
//! the built-in defaults are used.

use crate::params::{EngineParams, TaskOverride};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "STAGEHAND_CONFIG";

/// Complete TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub engine: EngineParams,
    /// Per-task retry overrides, keyed by task name
    pub tasks: HashMap<String, TaskOverride>,
    pub metadata: MetadataConfig,
    pub staging: StagingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Remote metadata endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/metadata".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Persistent staging store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// SQLite database path; `None` keeps staging in memory
    pub database: Option<PathBuf>,
    /// Origin the staged keys are scoped to
    pub origin: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            database: None,
            origin: "default".to_string(),
        }
    }
}

impl TomlConfig {
    /// Retry override for one task, if configured
    pub fn task_override(&self, task: &str) -> Option<&TaskOverride> {
        self.tasks.get(task)
    }
}

/// Default config file location (`~/.config/stagehand/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stagehand").join("config.toml"))
}

/// Resolve which config file to read
///
/// Returns `None` when neither the CLI nor the environment names a file and
/// the platform has no config directory.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path()
}

/// Read and parse a TOML config file, failing on any error
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    if let Err(errors) = config.engine.validate() {
        return Err(Error::Config(format!(
            "Invalid [engine] section in {}: {}",
            path.display(),
            errors.join("; ")
        )));
    }

    Ok(config)
}

/// Load configuration with graceful degradation
///
/// Missing, unreadable, malformed or out-of-range files produce a warning
/// and built-in defaults; this never fails.
pub fn load_config(cli_arg: Option<&Path>) -> TomlConfig {
    let Some(path) = resolve_config_path(cli_arg) else {
        warn!("No config directory available; using built-in defaults");
        return TomlConfig::default();
    };

    if !path.exists() {
        info!("Config file {} not found; using built-in defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(&path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{}; using built-in defaults", e);
            TomlConfig::default()
        }
    }
}

/// Write a config file (creating parent directories)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
