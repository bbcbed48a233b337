//! # Resilience Module
//!
//! Circuit breaker guarding calls to the workflow engine. When discovery keeps
//! failing the poller stops hammering the engine and tries again after a timeout.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use loanflow_core::config::CircuitBreakerConfig;
//! use loanflow_core::resilience::CircuitBreaker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new("engine_discovery", &CircuitBreakerConfig::default());
//!
//! let result = breaker.call(|| async {
//!     Ok::<&str, std::io::Error>("polled")
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, CircuitState};
