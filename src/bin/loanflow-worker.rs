//! # Loanflow Worker
//!
//! Standalone worker process: polls the workflow engine for loan-origination
//! tasks and executes them until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Development config, simulated state updates
//! loanflow-worker --config config/loanflow.yaml --simulate
//!
//! # Production section of the config file
//! LOANFLOW_ENV=production loanflow-worker --config /etc/loanflow/loanflow.yaml
//!
//! # Run a single tick and exit
//! loanflow-worker --config config/loanflow.yaml --once
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use loanflow_core::client::{ConductorHttpClient, WorkflowEngineClient};
use loanflow_core::config::{ConfigManager, LoanflowConfig};
use loanflow_core::logging;
use loanflow_core::orchestration::OrchestratorPoller;
use loanflow_core::registry::TaskHandlerRegistry;
use loanflow_core::repository::{LoanRepository, PgLoanRepository};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "loanflow-worker", version, about = "Loan origination task worker")]
struct Args {
    /// YAML configuration file; built-in defaults are used when omitted
    #[arg(short, long, env = "LOANFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Environment section to load (defaults to LOANFLOW_ENV, then development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Run a single polling tick and exit
    #[arg(long)]
    once: bool,

    /// Skip the database and simulate state updates
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let manager = match &args.config {
        Some(path) => ConfigManager::load_from_file(path, args.environment.as_deref())
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => {
            let mut config = LoanflowConfig::default();
            config.environment = args
                .environment
                .clone()
                .unwrap_or_else(ConfigManager::detect_environment);
            ConfigManager::from_config(config).context("invalid default configuration")?
        }
    };
    let config = manager.config();

    logging::init_structured_logging_with(&config.logging, manager.environment());

    info!("Starting Loanflow Worker");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", manager.environment());
    info!("   Engine: {}", config.engine.base_url);

    let repository: Option<Arc<dyn LoanRepository>> = if args.simulate || config.is_simulation() {
        warn!("No repository configured, state updates run in simulation mode");
        None
    } else {
        let repository = PgLoanRepository::connect(&config.database)
            .await
            .context("failed to connect to the loan application database")?;
        Some(Arc::new(repository))
    };

    let client: Arc<dyn WorkflowEngineClient> = Arc::new(
        ConductorHttpClient::new(&config.engine).context("failed to build engine client")?,
    );
    let registry = Arc::new(TaskHandlerRegistry::with_standard_handlers(repository));
    info!("   Handlers: {:?}", registry.stats().handlers);

    let poller = Arc::new(OrchestratorPoller::new(
        config.worker.clone(),
        &config.circuit_breaker,
        client,
        registry,
    ));
    info!("   Worker id: {}", poller.worker_id());

    if args.once {
        let outcome = poller.run_once(&CancellationToken::new()).await;
        info!(outcome = ?outcome, "Single tick finished");
        return Ok(());
    }

    let handle = poller.spawn();
    info!("   Press Ctrl+C to shutdown gracefully");

    shutdown_signal().await;
    info!("Shutdown signal received, stopping poller");

    let stats = handle.poller().stats();
    if let Err(e) = handle.shutdown_with_timeout(SHUTDOWN_GRACE).await {
        error!("Failed to stop poller cleanly: {}", e);
    }
    info!(stats = ?stats.snapshot(), "Loanflow Worker shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
