//! Project configuration stored in `.reprun.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = ".reprun.toml";

/// Project configuration (TOML).
///
/// Every field is optional in the file; missing fields default to
/// `results/`, `.reproducible` and `.pipeline` in the working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory holding one subdirectory per run.
    pub results_dir: PathBuf,

    /// File listing the paths that must be committed for a trusted run.
    pub reproducible_list: PathBuf,

    /// Pipeline specification (`<script> <step-name>` per line).
    pub pipeline_file: PathBuf,

    /// chrono format string for default run names.
    pub run_name_format: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            reproducible_list: PathBuf::from(".reproducible"),
            pipeline_file: PathBuf::from(".pipeline"),
            run_name_format: "%Y-%m-%d_%H-%M-%S%.6f".to_string(),
        }
    }
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.results_dir.as_os_str().is_empty() {
            return Err(anyhow!("results_dir must not be empty"));
        }
        if self.reproducible_list.as_os_str().is_empty() {
            return Err(anyhow!("reproducible_list must not be empty"));
        }
        if self.pipeline_file.as_os_str().is_empty() {
            return Err(anyhow!("pipeline_file must not be empty"));
        }
        if self.run_name_format.trim().is_empty() {
            return Err(anyhow!("run_name_format must not be empty"));
        }
        if self.run_name_format.contains('/') {
            return Err(anyhow!("run_name_format must not produce path separators"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ProjectConfig::default()`.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = ProjectConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProjectConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
