#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Loanflow Core
//!
//! Worker-side orchestration core for loan-origination workflows run by an
//! external, Conductor-style workflow engine.
//!
//! ## Overview
//!
//! The engine owns workflow definitions and sequencing. This crate owns the
//! business work behind each task:
//!
//! - the loan application lifecycle as a validated state machine with an audit trail
//! - prequalification, identity verification, loan-processing and underwriting task handlers
//! - a polling worker that discovers tasks, dispatches them by reference name and
//!   reports their status back to the engine
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Application states, the transition table and the state machine
//! - [`repository`] - Persistence boundary (in-memory and PostgreSQL)
//! - [`handlers`] - Task handlers and the handler contract
//! - [`registry`] - Reference-name to handler bindings
//! - [`orchestration`] - Poller, dispatcher and status reporter
//! - [`client`] - HTTP client for the workflow engine
//! - [`resilience`] - Circuit breaker around engine calls
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - Structured logging set-up and helpers
//! - [`error`] - Crate error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loanflow_core::client::ConductorHttpClient;
//! use loanflow_core::config::LoanflowConfig;
//! use loanflow_core::orchestration::OrchestratorPoller;
//! use loanflow_core::registry::TaskHandlerRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoanflowConfig::default();
//! let client = Arc::new(ConductorHttpClient::new(&config.engine)?);
//! let registry = Arc::new(TaskHandlerRegistry::with_standard_handlers(None));
//!
//! let poller = Arc::new(OrchestratorPoller::new(
//!     config.worker.clone(),
//!     &config.circuit_breaker,
//!     client,
//!     registry,
//! ));
//! let handle = poller.spawn();
//! // ...
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests (no engine or database needed)
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod repository;
pub mod resilience;
pub mod state_machine;
pub mod types;

pub use client::{ConductorHttpClient, WorkflowEngineClient};
pub use config::{ConfigManager, LoanflowConfig};
pub use constants::TaskStatus;
pub use error::{LoanflowError, Result};
pub use handlers::{HandlerContext, TaskHandler};
pub use models::{LoanApplication, StateTransition, Task};
pub use orchestration::{OrchestratorPoller, PollerHandle, TaskDispatcher, TickOutcome};
pub use registry::TaskHandlerRegistry;
pub use repository::{InMemoryLoanRepository, LoanRepository, PgLoanRepository};
pub use state_machine::{
    ApplicationState, ApplicationStateMachine, ApplicationStatus, TransitionRequest,
    TransitionResult,
};
pub use types::TaskPayload;
