//! Configuration Loader
//!
//! Environment-aware loading of the worker configuration. The YAML file carries one
//! mapping per environment name; a `default` mapping, when present, is the base that
//! the active environment's mapping is merged over. Environment variables are applied
//! last so deployments can override the engine URL, database URL, poll interval and
//! worker id without editing the file.

use super::error::{ConfigResult, ConfigurationError};
use super::LoanflowConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_SECTION: &str = "default";

/// Environment variables that override file values
pub mod env_vars {
    pub const ENVIRONMENT: &str = "LOANFLOW_ENV";
    pub const ENGINE_URL: &str = "LOANFLOW_ENGINE_URL";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const POLL_INTERVAL_MS: &str = "LOANFLOW_POLL_INTERVAL_MS";
    pub const WORKER_ID: &str = "LOANFLOW_WORKER_ID";
}

/// Loaded and validated configuration for one environment
#[derive(Debug)]
pub struct ConfigManager {
    config: LoanflowConfig,
    environment: String,
}

impl ConfigManager {
    /// Load configuration from a YAML file.
    ///
    /// `environment` defaults to [`ConfigManager::detect_environment`] when `None`.
    pub fn load_from_file(
        path: impl AsRef<Path>,
        environment: Option<&str>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        let environment = environment
            .map(str::to_lowercase)
            .unwrap_or_else(Self::detect_environment);

        debug!(
            "Loading configuration for environment '{}' from {}",
            environment,
            path.display()
        );

        let yaml_content = Self::read_config_file_safely(path)?;
        let mut config = Self::parse_environment_section(
            &yaml_content,
            &environment,
            &path.display().to_string(),
        )?;

        Self::apply_env_overrides_with(&mut config, |name| env::var(name).ok())?;
        Self::from_config(config)
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: LoanflowConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;

        let sanitized_config = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&sanitized_config)
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %config.environment,
            engine_url = %config.engine.base_url,
            simulation = config.is_simulation(),
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
        }))
    }

    pub fn config(&self) -> &LoanflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Configuration as JSON with sensitive fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// LOANFLOW_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var(env_vars::ENVIRONMENT)
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Resolve the configuration for `environment` out of raw YAML text.
    ///
    /// The `default` mapping is the base; the environment mapping is merged over it.
    /// At least one of them must exist.
    pub fn parse_environment_section(
        yaml_content: &str,
        environment: &str,
        source: &str,
    ) -> ConfigResult<LoanflowConfig> {
        let yaml_data: YamlValue = serde_yaml::from_str(yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(source, e))?;

        let base = yaml_data
            .get(YamlValue::String(DEFAULT_SECTION.to_string()))
            .cloned();
        let env_section = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned();

        let merged = match (base, env_section) {
            (Some(mut base), Some(overrides)) => {
                debug!("Applying environment-specific overrides for: {}", environment);
                Self::merge_yaml_values(&mut base, overrides);
                base
            }
            (Some(base), None) => {
                debug!(
                    "No section for environment '{}', using default section",
                    environment
                );
                base
            }
            (None, Some(section)) => section,
            (None, None) => {
                return Err(ConfigurationError::MissingEnvironment {
                    environment: environment.to_string(),
                })
            }
        };

        let mut config: LoanflowConfig = serde_yaml::from_value(merged).map_err(|e| {
            ConfigurationError::invalid_yaml(
                source,
                format!("Failed to deserialize configuration: {e}"),
            )
        })?;
        config.environment = environment.to_string();
        Ok(config)
    }

    /// Apply environment-variable overrides using `lookup` to resolve variables
    pub fn apply_env_overrides_with<F>(config: &mut LoanflowConfig, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(env_vars::ENGINE_URL) {
            debug!("Overriding engine.base_url from {}", env_vars::ENGINE_URL);
            config.engine.base_url = url;
        }
        if let Some(url) = lookup(env_vars::DATABASE_URL) {
            debug!("Overriding database.url from {}", env_vars::DATABASE_URL);
            config.database.url = Some(url);
        }
        if let Some(raw) = lookup(env_vars::POLL_INTERVAL_MS) {
            config.worker.poll_interval_ms =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigurationError::EnvironmentVariableError {
                        variable: env_vars::POLL_INTERVAL_MS.to_string(),
                        context: format!("'{raw}' is not a whole number of milliseconds"),
                    })?;
        }
        if let Some(worker_id) = lookup(env_vars::WORKER_ID) {
            config.worker.worker_id = Some(worker_id);
        }
        Ok(())
    }

    /// Safely read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024; // 1MB limit

        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigurationError::ConfigFileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigurationError::file_read_error(path.display().to_string(), e)
            }
        })?;

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({} bytes > {} bytes limit)",
                    metadata.len(),
                    MAX_CONFIG_FILE_SIZE
                ),
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }

    fn sanitize_config_for_logging(config: &LoanflowConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "token", "credential", "url"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    // engine base_url is not a secret; database url carries credentials
                    if is_sensitive && key_lower != "base_url" {
                        if let serde_json::Value::String(s) = val {
                            *val = serde_json::Value::String(Self::mask(s));
                        } else if !val.is_null() {
                            *val = serde_json::Value::String("[MASKED]".to_string());
                        }
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }

    fn mask(s: &str) -> String {
        if s.is_empty() {
            return "[EMPTY]".to_string();
        }
        let chars: Vec<char> = s.chars().collect();
        if chars.len() > 4 {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[chars.len() - 2..].iter().collect();
            format!("[MASKED: {head}***{tail}]")
        } else {
            "[MASKED: ***]".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdateTaskPathStyle;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
default:
  worker:
    poll_interval_ms: 5000
  engine:
    base_url: "http://conductor:8080"
development:
  worker:
    scan_running_workflows: false
production:
  engine:
    base_url: "https://conductor.internal"
    update_task_path_style: path_id
  database:
    url: "postgres://loan:secret@db/loans"
"#;

    #[test]
    fn test_environment_section_merges_over_default() {
        let config =
            ConfigManager::parse_environment_section(SAMPLE, "production", "sample").unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.engine.base_url, "https://conductor.internal");
        assert_eq!(config.engine.update_task_path_style, UpdateTaskPathStyle::PathId);
        assert_eq!(config.worker.poll_interval_ms, 5000);
        assert!(!config.is_simulation());
    }

    #[test]
    fn test_missing_environment_falls_back_to_default() {
        let config = ConfigManager::parse_environment_section(SAMPLE, "staging", "sample").unwrap();
        assert_eq!(config.engine.base_url, "http://conductor:8080");
        assert!(config.worker.scan_running_workflows);
        assert!(config.is_simulation());
    }

    #[test]
    fn test_no_matching_section_is_an_error() {
        let yaml = "production:\n  worker:\n    poll_interval_ms: 100\n";
        let err = ConfigManager::parse_environment_section(yaml, "test", "sample").unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingEnvironment { .. }));
    }

    #[test]
    fn test_invalid_yaml_reports_source() {
        let err =
            ConfigManager::parse_environment_section("default: [unclosed", "test", "broken.yaml")
                .unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = LoanflowConfig::default();
        let vars: HashMap<&str, &str> = HashMap::from([
            (env_vars::ENGINE_URL, "http://engine:9090"),
            (env_vars::POLL_INTERVAL_MS, "250"),
            (env_vars::WORKER_ID, "worker_fixed"),
        ]);
        ConfigManager::apply_env_overrides_with(&mut config, |name| {
            vars.get(name).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.engine.base_url, "http://engine:9090");
        assert_eq!(config.worker.poll_interval_ms, 250);
        assert_eq!(config.worker.worker_id.as_deref(), Some("worker_fixed"));
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_bad_poll_interval_override_rejected() {
        let mut config = LoanflowConfig::default();
        let err = ConfigManager::apply_env_overrides_with(&mut config, |name| {
            (name == env_vars::POLL_INTERVAL_MS).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::EnvironmentVariableError { .. }
        ));
    }

    #[test]
    fn test_database_url_masked_for_logging() {
        let mut config = LoanflowConfig::default();
        config.database.url = Some("postgres://loan:secret@db/loans".to_string());
        let manager = ConfigManager::from_config(config).unwrap();
        let debug = manager.debug_config();
        let masked = debug["database"]["url"].as_str().unwrap();
        assert!(masked.starts_with("[MASKED"));
        assert!(!masked.contains("secret"));
        assert_eq!(debug["engine"]["base_url"], "http://localhost:8080");
    }

    #[test]
    fn test_load_from_file_reads_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"test:\n  worker:\n    handler_timeout_ms: 1500\n")
            .unwrap();

        let manager = ConfigManager::load_from_file(file.path(), Some("TEST")).unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().worker.handler_timeout_ms, 1500);
    }

    #[test]
    fn test_missing_file_reported() {
        let err = ConfigManager::load_from_file("/nonexistent/loanflow.yaml", Some("test"))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }
}
