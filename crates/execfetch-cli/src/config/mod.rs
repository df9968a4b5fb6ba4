//! Configuration loading and resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use execfetch::SourceSpec;

use crate::types::{CliError, CliResult};

/// Environment variable naming the batch config file.
pub const CONFIG_ENV: &str = "EXECFETCH_CONFIG";

/// Output directory used when the config names none.
pub const DEFAULT_OUTPUT_DIR: &str = "target/execfetch";

/// Resolve the batch config path.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(env_path);
    }

    let cwd_config = PathBuf::from(".execfetch/batch.json");
    if cwd_config.exists() {
        return cwd_config;
    }

    PathBuf::from("execfetch.json")
}

/// A batch of sources to fetch, read from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub fail_on_error: bool,
    #[serde(default)]
    pub merge: bool,
    /// Defaults to `merged.exec` inside the output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    pub sources: Vec<SourceSpec>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

impl BatchConfig {
    /// A config with default settings for the given sources.
    pub fn new(sources: Vec<SourceSpec>) -> Self {
        Self {
            output_dir: default_output_dir(),
            fail_on_error: false,
            merge: false,
            merge_file: None,
            connect_timeout_ms: None,
            read_timeout_ms: None,
            sources,
        }
    }

    pub fn load(path: &Path) -> CliResult<Self> {
        tracing::debug!("Loading batch config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Output path of the source at 1-based `index`.
    pub fn output_for(&self, index: usize, source: &SourceSpec) -> PathBuf {
        source
            .output_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join(format!("jacoco{index}.exec")))
    }

    pub fn merge_path(&self) -> PathBuf {
        self.merge_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join("merged.exec"))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}
