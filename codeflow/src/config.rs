//! Configuration loading
//!
//! Engine settings come from `.codeflow.toml`, found by walking up the
//! directory tree from the working directory, with a global fallback
//! under the platform config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Find a config file by walking up the directory tree, then checking
/// the global config directory
///
/// Returns the path if found, None otherwise.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("codeflow").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Top-level configuration (from `.codeflow.toml`)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub project: ProjectSection,
}

/// Engine configuration section
#[derive(Debug, Default, Deserialize)]
pub struct EngineSection {
    /// Default per-invocation timeout in seconds; absent means none
    #[serde(default)]
    pub invocation_timeout_secs: Option<u64>,

    /// Directory for custom workflow TOML files
    #[serde(default)]
    pub workflows_dir: Option<PathBuf>,
}

/// Project configuration section
#[derive(Debug, Default, Deserialize)]
pub struct ProjectSection {
    /// Project root scanned for `.codeflow/agents`; defaults to the
    /// working directory
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl FileConfig {
    /// Load configuration, falling back to defaults when no file exists
    pub fn load() -> Result<Self> {
        match find_config_file(".codeflow.toml") {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                Self::load_from_path(&path)
            }
            None => {
                tracing::debug!("No .codeflow.toml found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// The configured invocation timeout, if any
    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.engine.invocation_timeout_secs.map(Duration::from_secs)
    }
}
