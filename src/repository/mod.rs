//! # Loan Repository
//!
//! Persistence boundary for loan applications and their transition audit trail.
//! The state machine only depends on [`LoanRepository`]; two implementations ship
//! with the crate:
//!
//! - [`InMemoryLoanRepository`] for tests and local runs
//! - [`PgLoanRepository`] backed by PostgreSQL through `sqlx`
//!
//! No transaction spans the record update and the audit append. Callers treat the
//! audit write as a separate, best-effort step.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{LoanApplication, StateTransition};
use crate::state_machine::ApplicationState;

pub use in_memory::InMemoryLoanRepository;
pub use postgres::PgLoanRepository;

#[async_trait]
pub trait LoanRepository: Send + Sync {
    /// Fetch an application, failing with `NotFound` when absent
    async fn get_application_by_id(&self, id: &str) -> Result<LoanApplication>;

    async fn create_application(&self, application: &LoanApplication) -> Result<()>;

    /// Unconditional write of the full record
    async fn update_application(&self, application: &LoanApplication) -> Result<()>;

    /// Write the record only if the stored `current_state` still equals `expected_state`.
    ///
    /// Returns `Ok(false)` when another writer moved the record first.
    async fn update_application_if_state(
        &self,
        application: &LoanApplication,
        expected_state: ApplicationState,
    ) -> Result<bool>;

    async fn create_state_transition(&self, transition: &StateTransition) -> Result<()>;

    /// Audit rows for one application, oldest first
    async fn list_state_transitions(&self, application_id: &str) -> Result<Vec<StateTransition>>;
}
