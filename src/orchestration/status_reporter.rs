//! # Status Reporter
//!
//! Best-effort task status updates to the engine. A failed report is logged and
//! surfaced as [`ReportOutcome::Failed`]; it never turns into a task failure and
//! is not retried here.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use crate::client::WorkflowEngineClient;
use crate::constants::{payload_keys, TaskStatus};
use crate::error::LoanflowError;
use crate::logging::{log_error, log_task_operation};
use crate::models::{Task, TaskResultUpdate};
use crate::types::TaskPayload;

#[derive(Clone)]
pub struct StatusReporter {
    client: Arc<dyn WorkflowEngineClient>,
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter").finish_non_exhaustive()
    }
}

/// Outcome of one report attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered,
    /// Task carries no workflow instance id
    Skipped,
    Failed,
}

impl ReportOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl StatusReporter {
    pub fn new(client: Arc<dyn WorkflowEngineClient>) -> Self {
        Self { client }
    }

    pub async fn mark_in_progress(&self, task: &Task) -> ReportOutcome {
        self.report(task, TaskStatus::InProgress, TaskPayload::new())
            .await
    }

    pub async fn mark_completed(&self, task: &Task, output: TaskPayload) -> ReportOutcome {
        self.report(task, TaskStatus::Completed, output).await
    }

    pub async fn mark_failed(&self, task: &Task, error: &LoanflowError) -> ReportOutcome {
        self.report(task, TaskStatus::Failed, failure_payload(task, error))
            .await
    }

    async fn report(&self, task: &Task, status: TaskStatus, output: TaskPayload) -> ReportOutcome {
        if !task.has_workflow_instance() {
            warn!(
                task_id = %task.task_id,
                status = %status,
                "Task has no workflow instance id, skipping status report"
            );
            return ReportOutcome::Skipped;
        }

        let update = TaskResultUpdate::for_task(task, status, output);
        match self.client.update_task(&update).await {
            Ok(()) => {
                log_task_operation(
                    "report_status",
                    &task.task_id,
                    Some(&task.reference_task_name),
                    Some(&task.workflow_instance_id),
                    status.as_str(),
                    None,
                );
                ReportOutcome::Delivered
            }
            Err(e) => {
                log_error(
                    "status_reporter",
                    status.as_str(),
                    &e.to_string(),
                    Some(&task.task_id),
                );
                ReportOutcome::Failed
            }
        }
    }
}

/// FAILED output sent to the engine
pub fn failure_payload(task: &Task, error: &LoanflowError) -> TaskPayload {
    TaskPayload::new()
        .with(payload_keys::ERROR, error.to_string())
        .with("errorKind", error.error_kind())
        .with("retryable", error.is_retryable())
        .with(payload_keys::TASK_TYPE, task.task_type.as_str())
        .with(payload_keys::REFERENCE_TASK_NAME, task.reference_task_name.as_str())
        .with(payload_keys::TIMESTAMP, Utc::now().to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_payload_shape() {
        let task = Task {
            task_id: "t-1".to_string(),
            task_type: "update_application_state".to_string(),
            reference_task_name: "update_state_to_funded_ref".to_string(),
            ..Default::default()
        };
        let err = LoanflowError::InvalidTransition {
            from: "underwriting".to_string(),
            to: "funded".to_string(),
        };
        let payload = failure_payload(&task, &err);
        assert_eq!(payload.require_str("errorKind").unwrap(), err.error_kind());
        assert!(!payload.require_bool("retryable").unwrap());
        assert_eq!(
            payload.require_str("referenceTaskName").unwrap(),
            "update_state_to_funded_ref"
        );
        assert!(payload.require_str("error").unwrap().contains("funded"));
    }
}
