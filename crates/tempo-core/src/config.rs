//! Scheduler configuration.
//!
//! TOML で読み込みます。省略したフィールドはデフォルト値になります。
//!
//! ```toml
//! completed_task_retention_secs = 86400
//! max_sleep_ms = 5000
//! allowed_task_types = ["backup", "export"]
//! backing_file = "/var/lib/tempo/tasks.jsonl"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::TaskType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long completed tasks are kept before they are dropped.
    #[serde(default = "default_retention_secs")]
    pub completed_task_retention_secs: u64,

    /// Upper bound on the control loop's sleep between passes.
    #[serde(default = "default_max_sleep_ms")]
    pub max_sleep_ms: u64,

    /// Task types that may be instantiated. Empty means none.
    #[serde(default)]
    pub allowed_task_types: Vec<String>,

    #[serde(default = "default_backing_file")]
    pub backing_file: PathBuf,
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_sleep_ms() -> u64 {
    5_000
}

fn default_backing_file() -> PathBuf {
    PathBuf::from("tasks.jsonl")
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            completed_task_retention_secs: default_retention_secs(),
            max_sleep_ms: default_max_sleep_ms(),
            allowed_task_types: Vec::new(),
            backing_file: default_backing_file(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "loaded scheduler configuration");
        Ok(config)
    }

    pub fn allow(mut self, task_type: impl Into<String>) -> Self {
        self.allowed_task_types.push(task_type.into());
        self
    }

    pub fn is_allowed(&self, task_type: &TaskType) -> bool {
        self.allowed_task_types
            .iter()
            .any(|allowed| allowed == task_type.as_str())
    }

    pub fn retention(&self) -> chrono::Duration {
        i64::try_from(self.completed_task_retention_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }
}
