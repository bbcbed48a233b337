//! # Constants
//!
//! Wire-level names shared with the workflow engine: task statuses, payload keys
//! and the reference names this worker knows how to execute.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a task as reported by (and to) the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    InProgress,
    Completed,
    Failed,
    /// Any status this worker does not act on (CANCELED, TIMED_OUT, SKIPPED, ...)
    #[serde(other)]
    Other,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Other => "OTHER",
        }
    }

    /// Ready to run but not yet claimed by any worker.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Scheduled)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys the dispatcher and handlers read from or write into task payloads
pub mod payload_keys {
    pub const TASK_TYPE: &str = "taskType";
    pub const REFERENCE_TASK_NAME: &str = "referenceTaskName";
    pub const TASK_NAME: &str = "taskName";
    pub const APPLICATION_ID: &str = "applicationId";
    pub const USER_ID: &str = "userId";
    pub const FROM_STATE: &str = "fromState";
    pub const TO_STATE: &str = "toState";
    pub const REASON: &str = "reason";
    pub const AUTOMATED: &str = "automated";
    pub const CURRENT_STATE: &str = "currentState";
    pub const ERROR: &str = "error";
    pub const TIMESTAMP: &str = "timestamp";
}

/// Task types understood by the loan-processing handler
pub mod task_types {
    pub const VALIDATE_APPLICATION: &str = "validate_application";
    pub const UPDATE_APPLICATION_STATE: &str = "update_application_state";
    pub const DOCUMENT_COLLECTION: &str = "document_collection";
    pub const IDENTITY_VERIFICATION: &str = "identity_verification";
    pub const FINALIZE_LOAN_DECISION: &str = "finalize_loan_decision";
    pub const CREDIT_CHECK: &str = "credit_check";
    pub const INCOME_VERIFICATION: &str = "income_verification";
    pub const RISK_ASSESSMENT: &str = "risk_assessment";
    pub const UNDERWRITING_DECISION: &str = "underwriting_decision";
}

/// Reference names registered at worker start-up
pub mod reference_names {
    pub const VALIDATE_PREQUALIFY_INPUT: &str = "validate_prequalify_input";
    pub const CALCULATE_DTI_RATIO: &str = "calculate_dti_ratio";
    pub const ASSESS_PREQUALIFY_RISK: &str = "assess_prequalify_risk";
    pub const GENERATE_PREQUALIFY_TERMS: &str = "generate_prequalify_terms";
    pub const FINALIZE_PREQUALIFICATION: &str = "finalize_prequalification";

    pub const PREQUALIFICATION: &[&str] = &[
        VALIDATE_PREQUALIFY_INPUT,
        CALCULATE_DTI_RATIO,
        ASSESS_PREQUALIFY_RISK,
        GENERATE_PREQUALIFY_TERMS,
        FINALIZE_PREQUALIFICATION,
    ];

    pub const LOAN_PROCESSING: &[&str] = &[
        "validate_application_ref",
        "update_state_to_prequalified_ref",
        "document_collection_ref",
        "update_state_to_documents_submitted_ref",
        "identity_verification_ref",
        "update_state_to_identity_verified_ref",
        "update_state_to_underwriting_ref",
        "update_state_to_approved_ref",
        "update_state_to_denied_ref",
        "update_state_to_manual_review_ref",
        "update_state_manual_approved_ref",
        "update_state_manual_denied_ref",
        "update_state_default_denied_ref",
        "finalize_loan_decision_ref",
    ];

    /// Underwriting workflow slots, plus the bare task names
    pub const UNDERWRITING: &[&str] = &[
        "credit_check_task",
        "income_verification_task",
        "risk_assessment_task",
        "underwriting_decision_task",
        "update_state_task",
        "credit_check",
        "income_verification",
        "risk_assessment",
        "underwriting_decision",
    ];

    pub const UPDATE_APPLICATION_STATE: &str = "update_application_state";
}

/// Worker defaults
pub mod defaults {
    pub const POLL_INTERVAL_MS: u64 = 5_000;
    pub const POLL_TIMEOUT_SECONDS: u64 = 30;
    pub const REQUEST_TIMEOUT_MS: u64 = 35_000;
    pub const HANDLER_TIMEOUT_MS: u64 = 30_000;
    pub const ENGINE_BASE_URL: &str = "http://localhost:8080";
    pub const RUNNING_WORKFLOW_QUERY: &str = "status:RUNNING";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_wire_format() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");

        let parsed: TaskStatus = serde_json::from_str("\"SCHEDULED\"").unwrap();
        assert_eq!(parsed, TaskStatus::Scheduled);

        let unknown: TaskStatus = serde_json::from_str("\"TIMED_OUT\"").unwrap();
        assert_eq!(unknown, TaskStatus::Other);
        assert!(!unknown.is_schedulable());
    }
}
