//! Application state machine against the in-memory repository.

use std::sync::Arc;

use loanflow_core::error::LoanflowError;
use loanflow_core::models::LoanApplication;
use loanflow_core::repository::{InMemoryLoanRepository, LoanRepository};
use loanflow_core::state_machine::{
    ApplicationState, ApplicationStateMachine, ApplicationStatus, StateTransitionTable,
    TransitionRequest,
};

fn seeded(state: ApplicationState, status: ApplicationStatus) -> Arc<InMemoryLoanRepository> {
    let repository = Arc::new(InMemoryLoanRepository::new());
    repository.insert(LoanApplication::new("A1", "U1").with_state(state, status));
    repository
}

#[tokio::test]
async fn test_duplicate_delivery_then_forward_transition() {
    let repository = seeded(
        ApplicationState::DocumentsSubmitted,
        ApplicationStatus::UnderReview,
    );
    let machine = ApplicationStateMachine::new(repository.clone());

    let duplicate = machine
        .transition_state(
            &TransitionRequest::new("A1", "documents_submitted")
                .from_state("pre_qualified")
                .reason("dup delivery"),
        )
        .await
        .unwrap();
    assert!(duplicate.idempotent);
    assert!(duplicate.transition.is_none());
    assert_eq!(repository.transition_count(), 0);
    assert_eq!(repository.update_count(), 0);

    let forward = machine
        .transition_state(
            &TransitionRequest::new("A1", "identity_verified")
                .from_state("documents_submitted")
                .reason("id verified"),
        )
        .await
        .unwrap();
    assert!(!forward.idempotent);
    assert_eq!(forward.previous_state, ApplicationState::DocumentsSubmitted);
    assert_eq!(forward.new_state, ApplicationState::IdentityVerified);

    let stored = repository.get_application_by_id("A1").await.unwrap();
    assert_eq!(stored.current_state, ApplicationState::IdentityVerified);

    let rows = repository.list_state_transitions("A1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].from_state, Some(ApplicationState::DocumentsSubmitted));
    assert_eq!(rows[0].to_state, ApplicationState::IdentityVerified);
    assert_eq!(rows[0].transition_reason, "id verified");
    assert!(rows[0].automated);
}

#[tokio::test]
async fn test_chain_to_active_writes_ordered_audit_rows() {
    use ApplicationState::*;

    let repository = seeded(Initiated, ApplicationStatus::Draft);
    let machine = ApplicationStateMachine::new(repository.clone());

    let chain = [
        Initiated,
        PreQualified,
        DocumentsSubmitted,
        IdentityVerified,
        Underwriting,
        Approved,
        DocumentsSigned,
        Funded,
        Active,
    ];
    for to_state in &chain[1..] {
        machine
            .transition_state(&TransitionRequest::new("A1", to_state.as_str()))
            .await
            .unwrap();
    }

    let stored = repository.get_application_by_id("A1").await.unwrap();
    assert_eq!(stored.current_state, Active);
    assert_eq!(stored.status, ApplicationStatus::Active);

    let rows = repository.list_state_transitions("A1").await.unwrap();
    assert_eq!(rows.len(), 8);
    for (row, pair) in rows.iter().zip(chain.windows(2)) {
        assert_eq!(row.from_state, Some(pair[0]));
        assert_eq!(row.to_state, pair[1]);
    }
}

#[tokio::test]
async fn test_full_approval_path_records_every_step() {
    let repository = seeded(ApplicationState::Initiated, ApplicationStatus::Draft);
    let machine = ApplicationStateMachine::new(repository.clone());

    let path = [
        "pre_qualified",
        "documents_submitted",
        "identity_verified",
        "underwriting",
        "approved",
        "documents_signed",
        "funded",
        "active",
        "closed",
    ];
    for to_state in path {
        let result = machine
            .transition_state(&TransitionRequest::new("A1", to_state))
            .await
            .unwrap();
        assert_eq!(result.new_state.as_str(), to_state);
        assert!(result.audit_recorded);
    }

    let stored = repository.get_application_by_id("A1").await.unwrap();
    assert_eq!(stored.current_state, ApplicationState::Closed);
    assert_eq!(stored.status, ApplicationStatus::Closed);
    assert_eq!(repository.transition_count(), path.len());

    let err = machine
        .transition_state(&TransitionRequest::new("A1", "active"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoanflowError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_underwriting_decision_is_exclusive() {
    let repository = seeded(
        ApplicationState::Underwriting,
        ApplicationStatus::UnderReview,
    );
    let machine = ApplicationStateMachine::new(repository.clone());

    machine
        .transition_state(&TransitionRequest::new("A1", "denied"))
        .await
        .unwrap();

    for other in ["approved", "manual_review"] {
        let err = machine
            .transition_state(&TransitionRequest::new("A1", other))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LoanflowError::InvalidTransition {
                from: "denied".to_string(),
                to: other.to_string(),
            }
        );
    }

    let stored = repository.get_application_by_id("A1").await.unwrap();
    assert_eq!(stored.status, ApplicationStatus::Denied);
    assert_eq!(repository.transition_count(), 1);
}

#[tokio::test]
async fn test_manual_review_merges_into_decision() {
    let repository = seeded(
        ApplicationState::Underwriting,
        ApplicationStatus::UnderReview,
    );
    let machine = ApplicationStateMachine::new(repository.clone());

    for to_state in ["manual_review", "approved"] {
        machine
            .transition_state(&TransitionRequest::new("A1", to_state).user("underwriter-7").automated(false))
            .await
            .unwrap();
    }

    let rows = repository.list_state_transitions("A1").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].from_state, Some(ApplicationState::ManualReview));
    assert_eq!(rows[1].user_id.as_deref(), Some("underwriter-7"));
    assert!(!rows[1].automated);
}

#[tokio::test]
async fn test_skipping_a_stage_is_rejected_without_writes() {
    let repository = seeded(ApplicationState::PreQualified, ApplicationStatus::Submitted);
    let machine = ApplicationStateMachine::new(repository.clone());

    let err = machine
        .transition_state(&TransitionRequest::new("A1", "underwriting"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoanflowError::InvalidTransition { .. }));
    assert_eq!(repository.update_count(), 0);
    assert_eq!(repository.transition_count(), 0);
}

#[tokio::test]
async fn test_missing_application_is_not_found() {
    let machine = ApplicationStateMachine::new(Arc::new(InMemoryLoanRepository::new()));
    let err = machine
        .transition_state(&TransitionRequest::new("missing", "pre_qualified"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoanflowError::NotFound { .. }));
}

#[tokio::test]
async fn test_simulation_trusts_hint_and_persists_nothing() {
    let machine = ApplicationStateMachine::simulation();
    assert!(machine.is_simulation());

    let result = machine
        .transition_state(&TransitionRequest::new("A9", "funded").from_state("documents_signed"))
        .await
        .unwrap();
    assert!(result.simulated);
    assert_eq!(result.previous_state, ApplicationState::DocumentsSigned);
    assert!(result.new_status.is_none());

    // Without a hint the application is assumed to be freshly initiated
    let err = machine
        .transition_state(&TransitionRequest::new("A9", "funded"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoanflowError::InvalidTransition { .. }));
}

#[test]
fn test_terminal_states_have_no_successors() {
    for state in ApplicationState::ALL {
        assert_eq!(
            state.is_terminal(),
            StateTransitionTable::allowed_next(state).is_empty(),
            "{state}"
        );
    }
}
