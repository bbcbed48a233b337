//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, optionally, to a JSON
//! log file for following a task across poll, dispatch and report.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize structured logging from environment variables only
pub fn init_structured_logging() {
    init_structured_logging_with(&LoggingConfig::default(), &get_environment());
}

/// Initialize structured logging with explicit settings.
///
/// Only the first call has any effect. `RUST_LOG` takes precedence over
/// `config.level`, which takes precedence over the environment default.
pub fn init_structured_logging_with(config: &LoggingConfig, environment: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let log_level = std::env::var("RUST_LOG")
            .ok()
            .or_else(|| config.level.clone())
            .unwrap_or_else(|| get_log_level(environment).to_string());

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(&log_level));

        let pid = process::id();
        let file_layer = if config.file_output {
            let log_dir = PathBuf::from(&config.directory);
            match fs::create_dir_all(&log_dir) {
                Ok(()) => {
                    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
                    let file_appender = tracing_appender::rolling::never(
                        &log_dir,
                        format!("{environment}.{pid}.{timestamp}.log"),
                    );
                    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                    let _ = FILE_GUARD.set(guard);
                    Some(
                        fmt::layer()
                            .with_writer(file_writer)
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_level(true)
                            .with_ansi(false)
                            .json()
                            .with_filter(EnvFilter::new(&log_level)),
                    )
                }
                Err(e) => {
                    eprintln!(
                        "Failed to create log directory {}: {e}; logging to console only",
                        log_dir.display()
                    );
                    None
                }
            }
        } else {
            None
        };

        let file_enabled = file_layer.is_some();
        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_level = %log_level,
            file_output = file_enabled,
            "Structured logging initialized"
        );
    });
}

/// LOANFLOW_ENV || APP_ENV || 'development'
fn get_environment() -> String {
    std::env::var("LOANFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    task_id: &str,
    reference_task_name: Option<&str>,
    workflow_instance_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        reference_task_name = reference_task_name,
        workflow_instance_id = workflow_instance_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "TASK_OPERATION"
    );
}

/// Log an applied or short-circuited application state transition
pub fn log_transition(
    application_id: &str,
    from_state: &str,
    to_state: &str,
    idempotent: bool,
    simulated: bool,
) {
    tracing::info!(
        application_id = %application_id,
        from_state = %from_state,
        to_state = %to_state,
        idempotent = idempotent,
        simulated = simulated,
        timestamp = %Utc::now().to_rfc3339(),
        "STATE_TRANSITION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_repeatable() {
        init_structured_logging_with(&LoggingConfig::default(), "test");
        init_structured_logging_with(&LoggingConfig::default(), "test");
        log_task_operation("poll", "t-1", Some("validate_application_ref"), None, "ok", None);
    }
}
