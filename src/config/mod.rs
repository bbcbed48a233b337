//! # Loanflow Configuration
//!
//! Typed configuration for the worker process. A single YAML file holds one section
//! per environment (`development`, `test`, `production`, ...) plus an optional
//! `default` section used when the active environment has none. Selected values can
//! be overridden through environment variables (see [`loader`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use loanflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/loanflow.yaml", None)?;
//! let poll_interval = manager.config().worker.poll_interval();
//! let engine_url = &manager.config().engine.base_url;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration for one worker process
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoanflowConfig {
    /// Name of the environment section this config was resolved from
    pub environment: String,
    pub worker: WorkerConfig,
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for LoanflowConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            worker: WorkerConfig::default(),
            engine: EngineConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl LoanflowConfig {
    /// Simulation mode runs state updates without a repository connection
    pub fn is_simulation(&self) -> bool {
        self.database.url.is_none()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.base_url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "engine.base_url",
                "",
                "engine base URL must not be empty",
            ));
        }
        reqwest::Url::parse(&self.engine.base_url).map_err(|e| {
            ConfigurationError::invalid_value("engine.base_url", &self.engine.base_url, e.to_string())
        })?;

        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.poll_interval_ms",
                "0",
                "poll interval must be greater than zero",
            ));
        }
        if self.worker.handler_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.handler_timeout_ms",
                "0",
                "handler timeout must be greater than zero",
            ));
        }
        if let Some(worker_id) = &self.worker.worker_id {
            if worker_id.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "worker.worker_id",
                    worker_id,
                    "worker id must not be blank when set",
                ));
            }
        }
        if self.circuit_breaker.enabled {
            if self.circuit_breaker.failure_threshold == 0 {
                return Err(ConfigurationError::invalid_value(
                    "circuit_breaker.failure_threshold",
                    "0",
                    "failure threshold must be greater than zero",
                ));
            }
            if self.circuit_breaker.success_threshold == 0 {
                return Err(ConfigurationError::invalid_value(
                    "circuit_breaker.success_threshold",
                    "0",
                    "success threshold must be greater than zero",
                ));
            }
        }
        if let Some(url) = &self.database.url {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(ConfigurationError::invalid_value(
                    "database.url",
                    "[MASKED]",
                    "only postgres:// URLs are supported",
                ));
            }
        }
        Ok(())
    }
}

/// Polling loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Identifier sent as `workerid` on poll requests; generated when absent
    pub worker_id: Option<String>,
    pub poll_interval_ms: u64,
    /// Long-poll wait passed to the engine
    pub poll_timeout_seconds: u64,
    /// Upper bound on a single handler invocation
    pub handler_timeout_ms: u64,
    /// Enable the running-workflow scan before the standard poll
    pub scan_running_workflows: bool,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            poll_timeout_seconds: defaults::POLL_TIMEOUT_SECONDS,
            handler_timeout_ms: defaults::HANDLER_TIMEOUT_MS,
            scan_running_workflows: true,
        }
    }
}

/// Which task-update endpoint shape the engine version expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTaskPathStyle {
    /// `POST /api/tasks` with the task id in the body
    Body,
    /// `POST /api/tasks/{taskId}`
    PathId,
}

impl Default for UpdateTaskPathStyle {
    fn default() -> Self {
        Self::Body
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub update_task_path_style: UpdateTaskPathStyle,
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::ENGINE_BASE_URL.to_string(),
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            update_task_path_style: UpdateTaskPathStyle::default(),
        }
    }
}

/// Repository connection; no URL means the worker runs in simulation mode
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            connect_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit filter directive; falls back to the environment default
    pub level: Option<String>,
    pub file_output: bool,
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            file_output: false,
            directory: "log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time spent open before a half-open trial call
    pub timeout_seconds: u64,
    /// Successful trial calls required to close again
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            timeout_seconds: 30,
            success_threshold: 2,
        }
    }
}
