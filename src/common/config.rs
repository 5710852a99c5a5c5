//! Configuration file handling
//!
//! The bridge consumes a plain [`Config`]; loading it from disk lives here so
//! the CLI and scenario runner share one format. TOML is the native format,
//! JSON is accepted by extension for launch files written by other tools.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Debug adapter process settings
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Default launch settings
    #[serde(default)]
    pub launch: LaunchConfig,

    /// Directories searched for relative source paths
    #[serde(default)]
    pub source_dirs: Vec<PathBuf>,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Output buffer settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Configuration for the debug adapter process
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdapterConfig {
    /// Path to the adapter executable; bare names are looked up on PATH
    #[serde(default = "default_adapter_path")]
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,

    /// Value sent as `adapterID` in the initialize request
    #[serde(default = "default_adapter_id")]
    pub adapter_id: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            path: default_adapter_path(),
            args: Vec::new(),
            adapter_id: default_adapter_id(),
        }
    }
}

fn default_adapter_path() -> PathBuf {
    PathBuf::from("python3")
}

fn default_adapter_id() -> String {
    "debugpy".to_string()
}

impl AdapterConfig {
    /// Resolve the adapter executable
    ///
    /// Paths with a directory component are used as given; bare names are
    /// searched on PATH.
    pub fn resolve_path(&self) -> Result<PathBuf> {
        if self.path.components().count() > 1 {
            if self.path.exists() {
                return Ok(self.path.clone());
            }
            return Err(Error::AdapterStartFailed(format!(
                "adapter executable '{}' does not exist",
                self.path.display()
            )));
        }

        which::which(&self.path).map_err(|e| {
            Error::AdapterStartFailed(format!(
                "'{}' not found on PATH: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Default arguments for the `launch` request
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LaunchConfig {
    /// Program to debug
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the debuggee
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variable overrides
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Stop at the program entry point
    #[serde(default)]
    pub stop_on_entry: bool,

    /// Adapter-specific launch keys merged verbatim into the request
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Timeout settings in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timeouts {
    /// Timeout for the initialize request
    #[serde(default = "default_initialize")]
    pub initialize_secs: u64,

    /// Timeout for general DAP requests
    #[serde(default = "default_request")]
    pub request_secs: u64,

    /// Default timeout when waiting for the program to stop
    #[serde(default = "default_await")]
    pub await_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            initialize_secs: default_initialize(),
            request_secs: default_request(),
            await_secs: default_await(),
        }
    }
}

fn default_initialize() -> u64 {
    10
}
fn default_request() -> u64 {
    30
}
fn default_await() -> u64 {
    300
}

/// Output buffer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Maximum number of output events to buffer
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Maximum total bytes to buffer
    #[serde(default = "default_max_bytes")]
    pub max_bytes_mb: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            max_bytes_mb: default_max_bytes(),
        }
    }
}

fn default_max_events() -> usize {
    10_000
}
fn default_max_bytes() -> usize {
    10
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the platform config file is
    /// used when present and defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Parse a config file, choosing the format by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let config: Config = if is_json {
            serde_json::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.output.max_events == 0 {
            return Err(Error::Config("output.max_events must be at least 1".into()));
        }
        if self.timeouts.request_secs == 0 {
            return Err(Error::Config("timeouts.request_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Byte cap for the output log
    pub fn max_output_bytes(&self) -> usize {
        self.output.max_bytes_mb.saturating_mul(1024 * 1024)
    }
}
