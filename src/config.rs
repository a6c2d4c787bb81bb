//! pyslice configuration from `pyslice.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PysliceError, Result};
use crate::sandbox::{DEFAULT_PYTHON, DEFAULT_TIMEOUT_SECONDS};

pub const CONFIG_FILE: &str = "pyslice.toml";

/// Sandbox backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Abstract execution in-process
    #[default]
    Static,
    /// Real interpreter in a subprocess
    Process,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct PysliceConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SandboxConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Interpreter used by the process backend
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Top-level packages the static backend treats as installed
    #[serde(default)]
    pub known_modules: Vec<String>,
}

fn default_python() -> String {
    DEFAULT_PYTHON.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            python: default_python(),
            timeout_secs: default_timeout_secs(),
            known_modules: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ScanConfig {
    /// Extra ignore globs on top of .gitignore
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub parallel_workers: Option<usize>,
}

/// Load configuration. An explicit path must exist; otherwise `pyslice.toml`
/// in `dir` is used when present. Parse failures fall back to defaults.
pub fn load_config(explicit: Option<&Path>, dir: &Path) -> Result<PysliceConfig> {
    let config_path = match explicit {
        Some(path) if !path.exists() => {
            return Err(PysliceError::Config(format!(
                "config file not found: {}",
                path.display()
            )))
        }
        Some(path) => path.to_path_buf(),
        None => dir.join(CONFIG_FILE),
    };
    if !config_path.exists() {
        return Ok(PysliceConfig::default());
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => Ok(toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", config_path.display(), e);
            PysliceConfig::default()
        })),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", config_path.display(), e);
            Ok(PysliceConfig::default())
        }
    }
}

/// Write the default configuration to `dir/pyslice.toml`, refusing to overwrite.
pub fn init_config(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() {
        return Err(PysliceError::Config(format!(
            "{} already exists",
            path.display()
        )));
    }
    std::fs::write(&path, render_config(&PysliceConfig::default())?)?;
    Ok(path)
}

pub fn render_config(config: &PysliceConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| PysliceError::Config(e.to_string()))
}
