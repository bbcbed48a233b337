//! # Models
//!
//! Domain records persisted through the repository and the wire models exchanged
//! with the workflow engine.

pub mod loan_application;
pub mod state_transition;
pub mod task;

pub use loan_application::LoanApplication;
pub use state_transition::StateTransition;
pub use task::{Task, TaskResultUpdate, WorkflowDetail, WorkflowSearchResult, WorkflowSummary};
