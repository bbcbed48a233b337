//! State-update task: moves a loan application along its lifecycle through the
//! [`ApplicationStateMachine`] and reports the outcome in the engine's payload shape.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{HandlerContext, TaskHandler};
use crate::constants::{payload_keys, task_types};
use crate::error::Result;
use crate::state_machine::{ApplicationStateMachine, TransitionRequest, TransitionResult};
use crate::types::TaskPayload;

#[derive(Debug, Clone)]
pub struct UpdateApplicationStateHandler {
    state_machine: ApplicationStateMachine,
}

impl UpdateApplicationStateHandler {
    pub fn new(state_machine: ApplicationStateMachine) -> Self {
        Self { state_machine }
    }

    pub fn state_machine(&self) -> &ApplicationStateMachine {
        &self.state_machine
    }
}

#[async_trait]
impl TaskHandler for UpdateApplicationStateHandler {
    async fn execute(
        &self,
        _ctx: &HandlerContext,
        input: &TaskPayload,
    ) -> Result<Option<TaskPayload>> {
        update_application_state(&self.state_machine, input)
            .await
            .map(Some)
    }

    fn name(&self) -> &str {
        task_types::UPDATE_APPLICATION_STATE
    }
}

/// Build a [`TransitionRequest`] from a task payload.
///
/// `applicationId` and `toState` are required; `fromState`, `reason`, `userId`
/// and `automated` are optional.
pub fn transition_request_from_payload(input: &TaskPayload) -> Result<TransitionRequest> {
    let application_id = input.require_str(payload_keys::APPLICATION_ID)?;
    let to_state = input.require_str(payload_keys::TO_STATE)?;

    let reason = match input.optional_str(payload_keys::REASON)? {
        Some(reason) if !reason.trim().is_empty() => reason.to_string(),
        _ => format!("Workflow transition to {to_state}"),
    };

    let mut request = TransitionRequest::new(application_id, to_state)
        .reason(reason)
        .automated(input.optional_bool(payload_keys::AUTOMATED)?.unwrap_or(true));

    if let Some(hint) = input.optional_str(payload_keys::FROM_STATE)? {
        request = request.from_state(hint);
    }
    if let Some(user) = input.optional_str(payload_keys::USER_ID)? {
        if !user.trim().is_empty() {
            request = request.user(user);
        }
    }
    Ok(request)
}

/// Apply the requested transition and render the task output
pub async fn update_application_state(
    state_machine: &ApplicationStateMachine,
    input: &TaskPayload,
) -> Result<TaskPayload> {
    let request = transition_request_from_payload(input)?;
    let result = state_machine.transition_state(&request).await?;

    info!(
        application_id = %result.application_id,
        previous_state = %result.previous_state,
        new_state = %result.new_state,
        idempotent = result.idempotent,
        simulated = result.simulated,
        "Application state update handled"
    );

    Ok(render_transition_output(&result))
}

pub fn render_transition_output(result: &TransitionResult) -> TaskPayload {
    let mut output = TaskPayload::new()
        .with("success", true)
        .with("applicationId", result.application_id.as_str())
        .with("previousState", result.previous_state.as_str())
        .with("newState", result.new_state.as_str())
        .with(
            "newStatus",
            result
                .new_status
                .map(|status| Value::from(status.as_str()))
                .unwrap_or(Value::Null),
        )
        .with("idempotent", result.idempotent)
        .with("simulated", result.simulated)
        .with("updatedAt", result.updated_at.to_rfc3339());

    if result.idempotent {
        output.insert("message", "Application already in target state");
    }
    if !result.audit_recorded {
        output.insert("auditRecorded", false);
    }
    if let Some(transition) = &result.transition {
        output.insert(
            "transition",
            json!({
                "id": transition.id.to_string(),
                "fromState": transition.from_state.map(|s| s.as_str()),
                "toState": transition.to_state.as_str(),
                "reason": transition.transition_reason,
                "automated": transition.automated,
                "userId": transition.user_id,
                "timestamp": transition.created_at.to_rfc3339(),
            }),
        );
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoanflowError;
    use crate::models::LoanApplication;
    use crate::repository::{InMemoryLoanRepository, LoanRepository};
    use crate::state_machine::{ApplicationState, ApplicationStatus};
    use std::sync::Arc;

    fn seeded(state: ApplicationState) -> Arc<InMemoryLoanRepository> {
        let repo = Arc::new(InMemoryLoanRepository::new());
        repo.insert(LoanApplication::new("A1", "U1").with_state(state, ApplicationStatus::Submitted));
        repo
    }

    #[tokio::test]
    async fn test_effective_transition_output() {
        let repo = seeded(ApplicationState::DocumentsSubmitted);
        let handler = UpdateApplicationStateHandler::new(ApplicationStateMachine::new(repo.clone()));
        let input = TaskPayload::new()
            .with("applicationId", "A1")
            .with("fromState", "documents_submitted")
            .with("toState", "identity_verified")
            .with("reason", "id verified");

        let output = handler
            .execute(&HandlerContext::default(), &input)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(output.get("success"), Some(&json!(true)));
        assert_eq!(output.get("previousState"), Some(&json!("documents_submitted")));
        assert_eq!(output.get("newState"), Some(&json!("identity_verified")));
        assert_eq!(output.get("newStatus"), Some(&json!("under_review")));
        assert_eq!(output.get("idempotent"), Some(&json!(false)));
        let transition = output.get("transition").unwrap();
        assert_eq!(transition["fromState"], json!("documents_submitted"));
        assert_eq!(transition["reason"], json!("id verified"));
        assert_eq!(repo.transition_count(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_output_has_message_and_no_transition() {
        let repo = seeded(ApplicationState::DocumentsSubmitted);
        let machine = ApplicationStateMachine::new(repo.clone());
        let input = TaskPayload::new()
            .with("applicationId", "A1")
            .with("fromState", "pre_qualified")
            .with("toState", "documents_submitted");

        let output = update_application_state(&machine, &input).await.unwrap();
        assert_eq!(output.get("idempotent"), Some(&json!(true)));
        assert_eq!(
            output.get("message"),
            Some(&json!("Application already in target state"))
        );
        assert!(!output.contains_key("transition"));
        assert_eq!(repo.transition_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_to_state_is_validation_error() {
        let machine = ApplicationStateMachine::simulation();
        let input = TaskPayload::new().with("applicationId", "A1");
        let err = update_application_state(&machine, &input).await.unwrap_err();
        assert!(matches!(err, LoanflowError::Validation(_)));
    }

    #[test]
    fn test_request_defaults() {
        let input = TaskPayload::new()
            .with("applicationId", "A1")
            .with("toState", "underwriting");
        let request = transition_request_from_payload(&input).unwrap();
        assert!(request.automated);
        assert!(request.from_state_hint.is_none());
        assert!(request.user_id.is_none());
        assert_eq!(request.reason, "Workflow transition to underwriting");
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_record() {
        let repo = seeded(ApplicationState::Underwriting);
        let machine = ApplicationStateMachine::new(repo.clone());
        let input = TaskPayload::new()
            .with("applicationId", "A1")
            .with("toState", "funded");
        let err = update_application_state(&machine, &input).await.unwrap_err();
        assert!(matches!(err, LoanflowError::InvalidTransition { .. }));
        let stored = repo.get_application_by_id("A1").await.unwrap();
        assert_eq!(stored.current_state, ApplicationState::Underwriting);
    }
}
