//! Configuration types for Flowerbase

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowerbaseConfig {
    /// Application layout
    pub app: AppConfig,
    /// Rule engine configuration
    pub rules: RulesConfig,
    /// Function runtime configuration
    pub functions: FunctionsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl FlowerbaseConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::ConfigError(e.to_string()))
    }
}

/// Application layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application name
    pub name: String,
    /// Database holding the guarded collections
    pub database: String,
    /// Directory with one `<collection>/rules.json` per collection
    pub rules_path: PathBuf,
    /// Directory with `config.json` and one `<function>.js` per function
    pub functions_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "flowerbase".to_string(),
            database: "flowerbase".to_string(),
            rules_path: PathBuf::from("./data_sources/mongodb-atlas"),
            functions_path: PathBuf::from("./functions"),
        }
    }
}

/// Rule engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Emit per-step traces from the authorization state machine
    pub enable_log: bool,
}

/// Function runtime selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Functions registered in-process
    #[default]
    Native,
    /// Functions executed by an external command
    Subprocess,
}

/// Function runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionsConfig {
    /// Which runtime executes user functions
    pub runtime: RuntimeKind,
    /// Command line for the subprocess runtime
    pub command: Vec<String>,
    /// Default timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Native,
            command: vec!["node".to_string(), "runner.js".to_string()],
            timeout_seconds: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
