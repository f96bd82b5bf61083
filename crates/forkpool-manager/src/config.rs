//! Pool configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use forkpool_core::WorkerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Smallest pool a manager will start.
pub const MIN_FORK_COUNT: usize = 1;

/// Largest pool a manager will start.
pub const MAX_FORK_COUNT: usize = 100;

/// Shortest accepted startup timeout in milliseconds.
pub const MIN_STARTUP_TIMEOUT_MS: u64 = 100;

/// Configuration errors. Raised before any process is spawned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("fork_count must be between 1 and 100, got {0}")]
    ForkCountOutOfRange(usize),

    #[error("worker.path is required")]
    MissingWorkerPath,

    #[error("worker.startup_timeout_ms must be at least 100, got {0}")]
    StartupTimeoutTooShort(u64),

    #[error("cwd is required")]
    MissingCwd,

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
}

/// Pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Number of worker processes.
    pub fork_count: usize,

    /// How each worker process is spawned.
    pub worker: WorkerConfig,

    /// Base directory; `worker.cwd` and `worker.path` resolve against it.
    pub cwd: PathBuf,

    /// Log level forwarded to workers in `init`.
    pub log_level: String,
}

/// Worker process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Worker executable.
    pub path: PathBuf,

    /// Working directory of the worker. Defaults to the pool `cwd`.
    pub cwd: Option<PathBuf>,

    /// Time allowed between spawn and `online`.
    pub startup_timeout_ms: u64,

    /// Extra arguments for the worker process.
    pub args: Vec<String>,

    /// Extra environment variables for the worker process.
    pub env: HashMap<String, String>,

    /// Opaque data forwarded to every worker in `init`.
    pub init_data: Value,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fork_count: std::thread::available_parallelism()
                .map(|n| n.get().min(MAX_FORK_COUNT))
                .unwrap_or(MIN_FORK_COUNT),
            worker: WorkerConfig::default(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            log_level: "info".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            cwd: None,
            startup_timeout_ms: 5000,
            args: Vec::new(),
            env: HashMap::new(),
            init_data: Value::Null,
        }
    }
}

impl PoolConfig {
    /// Create a configuration for `fork_count` workers running `path`.
    pub fn new(fork_count: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            fork_count,
            worker: WorkerConfig {
                path: path.into(),
                ..WorkerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Set the base directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Set the worker startup timeout.
    pub fn with_startup_timeout_ms(mut self, ms: u64) -> Self {
        self.worker.startup_timeout_ms = ms;
        self
    }

    /// Set the log level forwarded to workers.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Add an environment variable for worker processes.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.worker.env.insert(key.into(), value.into());
        self
    }

    /// Add an argument for worker processes.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.worker.args.push(arg.into());
        self
    }

    /// Set the data forwarded in `init`.
    pub fn with_init_data(mut self, init_data: Value) -> Self {
        self.worker.init_data = init_data;
        self
    }

    /// Check the configuration without touching the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_FORK_COUNT..=MAX_FORK_COUNT).contains(&self.fork_count) {
            return Err(ConfigError::ForkCountOutOfRange(self.fork_count));
        }
        if self.worker.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingWorkerPath);
        }
        if self.worker.startup_timeout_ms < MIN_STARTUP_TIMEOUT_MS {
            return Err(ConfigError::StartupTimeoutTooShort(
                self.worker.startup_timeout_ms,
            ));
        }
        if self.cwd.as_os_str().is_empty() {
            return Err(ConfigError::MissingCwd);
        }
        if tracing::Level::from_str(&self.log_level).is_err() {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        Ok(())
    }

    /// Validate, then resolve `worker.cwd` and `worker.path` against `cwd`.
    pub fn resolve(mut self) -> Result<Self, ConfigError> {
        self.validate()?;
        let worker_cwd = match self.worker.cwd.take() {
            Some(dir) => self.cwd.join(dir),
            None => self.cwd.clone(),
        };
        self.worker.path = resolve_path(&worker_cwd, &self.worker.path);
        self.worker.cwd = Some(worker_cwd);
        Ok(self)
    }

    /// Per-worker configuration for the worker at `id`.
    pub fn for_worker(&self, id: WorkerId) -> WorkerSettings {
        let cwd = self
            .worker
            .cwd
            .clone()
            .unwrap_or_else(|| self.cwd.clone());
        WorkerSettings {
            id,
            path: resolve_path(&cwd, &self.worker.path),
            cwd,
            args: self.worker.args.clone(),
            env: self.worker.env.clone(),
            startup_timeout: Duration::from_millis(self.worker.startup_timeout_ms),
            log_level: self.log_level.clone(),
            init_data: self.worker.init_data.clone(),
        }
    }
}

/// Everything one worker handle needs to spawn and initialize its process.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub id: WorkerId,
    pub path: PathBuf,
    pub cwd: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub startup_timeout: Duration,
    pub log_level: String,
    pub init_data: Value,
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate() {
        let config = PoolConfig::new(4, "/bin/worker");
        assert!(config.validate().is_ok());

        assert_eq!(
            PoolConfig::new(0, "/bin/worker").validate(),
            Err(ConfigError::ForkCountOutOfRange(0))
        );
        assert_eq!(
            PoolConfig::new(101, "/bin/worker").validate(),
            Err(ConfigError::ForkCountOutOfRange(101))
        );
        assert_eq!(
            PoolConfig::new(1, "").validate(),
            Err(ConfigError::MissingWorkerPath)
        );
        assert_eq!(
            PoolConfig::new(1, "w").with_startup_timeout_ms(99).validate(),
            Err(ConfigError::StartupTimeoutTooShort(99))
        );
        assert_eq!(
            PoolConfig::new(1, "w").with_cwd("").validate(),
            Err(ConfigError::MissingCwd)
        );
        assert!(matches!(
            PoolConfig::new(1, "w").with_log_level("loud").validate(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_resolve_paths() {
        let config = PoolConfig::new(2, "bin/worker")
            .with_cwd("/srv/app")
            .resolve()
            .unwrap();
        assert_eq!(config.worker.cwd.as_deref(), Some(Path::new("/srv/app")));
        assert_eq!(config.worker.path, PathBuf::from("/srv/app/bin/worker"));

        let mut config = PoolConfig::new(2, "/opt/worker").with_cwd("/srv/app");
        config.worker.cwd = Some(PathBuf::from("jobs"));
        let config = config.resolve().unwrap();
        assert_eq!(config.worker.cwd.as_deref(), Some(Path::new("/srv/app/jobs")));
        assert_eq!(config.worker.path, PathBuf::from("/opt/worker"));
    }

    #[test]
    fn test_for_worker_carries_index() {
        let config = PoolConfig::new(3, "/bin/worker")
            .with_cwd("/tmp")
            .with_log_level("debug")
            .with_init_data(json!({"db": "x"}))
            .with_env("A", "1");

        let settings = config.for_worker(WorkerId::new(2));
        assert_eq!(settings.id, WorkerId::new(2));
        assert_eq!(settings.cwd, PathBuf::from("/tmp"));
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.init_data["db"], "x");
        assert_eq!(settings.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(settings.startup_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: PoolConfig = serde_json::from_value(json!({
            "forkCount": 2,
            "worker": {"path": "/bin/worker", "startupTimeoutMs": 250},
            "cwd": "/tmp"
        }))
        .unwrap();
        assert_eq!(config.fork_count, 2);
        assert_eq!(config.worker.startup_timeout_ms, 250);
        assert_eq!(config.log_level, "info");
        assert!(config.worker.args.is_empty());
        assert!(config.validate().is_ok());
    }
}
