//! The shipped example configuration resolves for every environment.

use std::path::PathBuf;
use std::time::Duration;

use loanflow_core::config::{ConfigManager, UpdateTaskPathStyle};

fn example_yaml() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/loanflow.example.yaml");
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn test_example_environments_are_valid() {
    let yaml = example_yaml();
    for environment in ["development", "test", "production", "staging"] {
        let config =
            ConfigManager::parse_environment_section(&yaml, environment, "example").unwrap();
        assert_eq!(config.environment, environment);
        config.validate().unwrap();
    }
}

#[test]
fn test_environment_sections_merge_over_default() {
    let yaml = example_yaml();

    let test = ConfigManager::parse_environment_section(&yaml, "test", "example").unwrap();
    assert_eq!(test.worker.poll_interval(), Duration::from_millis(100));
    assert_eq!(test.worker.poll_timeout_seconds, 30);
    assert!(!test.circuit_breaker.enabled);
    assert_eq!(test.engine.update_task_path_style, UpdateTaskPathStyle::Body);
    assert!(test.is_simulation());

    let production =
        ConfigManager::parse_environment_section(&yaml, "production", "example").unwrap();
    assert_eq!(production.engine.base_url, "http://conductor-server:8080");
    assert_eq!(production.database.max_connections, 20);
    assert_eq!(production.database.connect_timeout_seconds, 5);
    assert!(production.logging.file_output);
    assert!(production.is_production());
}

#[test]
fn test_env_overrides_apply_on_top_of_file() {
    let yaml = example_yaml();
    let mut config = ConfigManager::parse_environment_section(&yaml, "test", "example").unwrap();

    ConfigManager::apply_env_overrides_with(&mut config, |name| match name {
        "LOANFLOW_ENGINE_URL" => Some("http://engine.internal:9090".to_string()),
        "DATABASE_URL" => Some("postgres://localhost/loans".to_string()),
        _ => None,
    })
    .unwrap();

    assert_eq!(config.engine.base_url, "http://engine.internal:9090");
    assert!(!config.is_simulation());
}
