//! Export Configuration
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Environment variables: `RELAY_OUTPUT_DIR`, `RELAY_START_FRAME`,
//!    `RELAY_PROFILE`, `RELAY_RUN_AFTER_EXPORT`, `RELAY_TRANSPORT`
//! 2. Config file: `relay.toml` in the working directory, or an explicit path
//! 3. Built-in defaults
//!
//! # Example Config File
//!
//! ```toml
//! [export]
//! output_dir = "export"
//! artifact = "data.bin"
//!
//! [runtime]
//! source_dir = "runtime"
//! files = ["relay_runner"]
//! executable = "relay_runner"
//! run_after_export = true
//! start_frame = 0
//! profile = false
//! profile_file = "profile.json"
//! transport = "pipe"  # pipe, file
//! shutdown_timeout_ms = 2000
//! ```

use relay_format::{SyncMode, DEFAULT_ARTIFACT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file name
pub const CONFIG_FILE: &str = "relay.toml";

/// How streams reach a running runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Framed messages over the runtime's stdin/stdout
    Pipe,
    /// Artifact and update files in the output directory
    File,
}

impl Default for TransportMode {
    fn default() -> Self {
        Self::Pipe
    }
}

impl TransportMode {
    /// Mode announced to the runtime
    pub fn sync_mode(&self) -> SyncMode {
        match self {
            Self::Pipe => SyncMode::Stdin,
            Self::File => SyncMode::File,
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipe => write!(f, "pipe"),
            Self::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pipe" | "stdin" => Ok(Self::Pipe),
            "file" | "files" => Ok(Self::File),
            _ => Err(format!("Unknown transport: {}", s)),
        }
    }
}

/// Where the export goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    /// Output directory; created on export
    pub output_dir: PathBuf,
    /// Manifest file name inside the output directory
    pub artifact: String,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("export"),
            artifact: DEFAULT_ARTIFACT.to_string(),
        }
    }
}

/// Runtime deployment and launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Directory the runtime files are copied from
    pub source_dir: PathBuf,
    /// Files copied into the output directory
    pub files: Vec<String>,
    /// Executable to launch; relative paths resolve against the output directory
    pub executable: PathBuf,
    /// Start the runtime after a successful export
    pub run_after_export: bool,
    pub start_frame: u32,
    /// Pass `--profile` to the runtime
    pub profile: bool,
    pub profile_file: String,
    pub transport: TransportMode,
    /// Grace period between asking the runtime to stop and killing it
    pub shutdown_timeout_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("runtime"),
            files: vec![runtime_binary_name()],
            executable: PathBuf::from(runtime_binary_name()),
            run_after_export: true,
            start_frame: 0,
            profile: false,
            profile_file: "profile.json".to_string(),
            transport: TransportMode::Pipe,
            shutdown_timeout_ms: 2000,
        }
    }
}

fn runtime_binary_name() -> String {
    format!("relay_runner{}", std::env::consts::EXE_SUFFIX)
}

/// Complete export configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub export: ExportSection,
    pub runtime: RuntimeSection,
    /// File this config was loaded from
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Invalid config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

impl ExportConfig {
    /// Load configuration from all sources, falling back to defaults
    pub fn load() -> Self {
        let mut config = if Path::new(CONFIG_FILE).exists() {
            match Self::load_from_file(Path::new(CONFIG_FILE)) {
                Ok(config) => {
                    log::info!("Loaded export config from {}", CONFIG_FILE);
                    config
                }
                Err(e) => {
                    log::warn!("{}; using defaults", e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    /// Load an explicit config file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a config file without environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Override fields from `RELAY_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from any key/value lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("RELAY_OUTPUT_DIR").filter(|v| !v.is_empty()) {
            self.export.output_dir = PathBuf::from(dir);
            log::info!("Output directory from env: {:?}", self.export.output_dir);
        }

        if let Some(value) = lookup("RELAY_START_FRAME") {
            match value.parse() {
                Ok(frame) => self.runtime.start_frame = frame,
                Err(_) => log::warn!("Ignoring RELAY_START_FRAME={:?}: not a frame number", value),
            }
        }

        if let Some(value) = lookup("RELAY_PROFILE") {
            match parse_flag(&value) {
                Some(flag) => self.runtime.profile = flag,
                None => log::warn!("Ignoring RELAY_PROFILE={:?}", value),
            }
        }

        if let Some(value) = lookup("RELAY_RUN_AFTER_EXPORT") {
            match parse_flag(&value) {
                Some(flag) => self.runtime.run_after_export = flag,
                None => log::warn!("Ignoring RELAY_RUN_AFTER_EXPORT={:?}", value),
            }
        }

        if let Some(value) = lookup("RELAY_TRANSPORT") {
            match value.parse() {
                Ok(mode) => self.runtime.transport = mode,
                Err(e) => log::warn!("Ignoring RELAY_TRANSPORT: {}", e),
            }
        }
    }

    /// Path of the manifest artifact
    pub fn artifact_path(&self) -> PathBuf {
        self.export.output_dir.join(&self.export.artifact)
    }

    /// Grace period for runtime shutdown
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.shutdown_timeout_ms)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
