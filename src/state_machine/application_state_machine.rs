//! # Application State Machine
//!
//! Applies one lifecycle transition to a loan application.
//!
//! Redelivered "advance to X" instructions are expected: when the stored record
//! already holds the requested state the call succeeds with `idempotent = true`,
//! writes nothing and appends no audit row. Otherwise the edge is checked against
//! [`StateTransitionTable`] using the *stored* state (the caller's hint is only a
//! hint), the record is written with a conditional update, and an audit row is
//! appended as a separate best-effort step.
//!
//! Without a repository the machine runs in simulation mode: the caller's hint
//! (or `initiated`) stands in for the stored state and nothing is persisted.
//!
//! ```rust
//! use std::sync::Arc;
//! use loanflow_core::models::LoanApplication;
//! use loanflow_core::repository::InMemoryLoanRepository;
//! use loanflow_core::state_machine::{ApplicationState, ApplicationStateMachine, TransitionRequest};
//!
//! # tokio_test::block_on(async {
//! let repository = Arc::new(InMemoryLoanRepository::new());
//! repository.insert(LoanApplication::new("A1", "U1"));
//! let machine = ApplicationStateMachine::new(repository);
//!
//! let result = machine
//!     .transition_state(&TransitionRequest::new("A1", "pre_qualified").reason("Pre-qualified"))
//!     .await
//!     .unwrap();
//! assert_eq!(result.new_state, ApplicationState::PreQualified);
//! assert!(!result.idempotent);
//! # });
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::states::{ApplicationState, ApplicationStatus};
use super::transitions::StateTransitionTable;
use crate::error::{LoanflowError, Result};
use crate::logging::{log_error, log_transition};
use crate::models::StateTransition;
use crate::repository::LoanRepository;

/// Input to [`ApplicationStateMachine::transition_state`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionRequest {
    pub application_id: String,
    /// Caller's belief about the current state
    pub from_state_hint: Option<String>,
    pub to_state: String,
    pub reason: String,
    pub user_id: Option<String>,
    pub automated: bool,
}

impl TransitionRequest {
    pub fn new(application_id: impl Into<String>, to_state: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            to_state: to_state.into(),
            automated: true,
            ..Default::default()
        }
    }

    pub fn from_state(mut self, hint: impl Into<String>) -> Self {
        self.from_state_hint = Some(hint.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn automated(mut self, automated: bool) -> Self {
        self.automated = automated;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionResult {
    pub application_id: String,
    pub previous_state: ApplicationState,
    pub new_state: ApplicationState,
    /// `None` in simulation mode, where no status is known
    pub new_status: Option<ApplicationStatus>,
    pub idempotent: bool,
    pub simulated: bool,
    /// Audit record for an effective transition
    pub transition: Option<StateTransition>,
    /// False when the audit append failed after the state write succeeded
    pub audit_recorded: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ApplicationStateMachine {
    repository: Option<Arc<dyn LoanRepository>>,
}

impl std::fmt::Debug for ApplicationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationStateMachine")
            .field("simulation", &self.is_simulation())
            .finish()
    }
}

impl ApplicationStateMachine {
    pub fn new(repository: Arc<dyn LoanRepository>) -> Self {
        Self {
            repository: Some(repository),
        }
    }

    /// Stateless validator that persists nothing
    pub fn simulation() -> Self {
        Self { repository: None }
    }

    pub fn with_optional_repository(repository: Option<Arc<dyn LoanRepository>>) -> Self {
        Self { repository }
    }

    pub fn is_simulation(&self) -> bool {
        self.repository.is_none()
    }

    #[instrument(skip(self, request), fields(application_id = %request.application_id, to_state = %request.to_state))]
    pub async fn transition_state(&self, request: &TransitionRequest) -> Result<TransitionResult> {
        if request.application_id.trim().is_empty() {
            return Err(LoanflowError::validation("applicationId is required"));
        }
        let to_state = parse_state("toState", &request.to_state)?;
        let hint = match request.from_state_hint.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_state("fromState", raw)?),
        };

        match &self.repository {
            Some(repository) => {
                self.apply(repository.as_ref(), request, hint, to_state)
                    .await
            }
            None => self.simulate(request, hint, to_state),
        }
    }

    async fn apply(
        &self,
        repository: &dyn LoanRepository,
        request: &TransitionRequest,
        hint: Option<ApplicationState>,
        to_state: ApplicationState,
    ) -> Result<TransitionResult> {
        let application = repository
            .get_application_by_id(&request.application_id)
            .await?;
        let current = application.current_state;

        if hint.is_some_and(|h| h != current) {
            debug!(
                hint = ?hint,
                actual = %current,
                "fromState hint differs from stored state"
            );
        }

        if current == to_state {
            log_transition(&request.application_id, current.as_str(), to_state.as_str(), true, false);
            return Ok(idempotent_result(
                &request.application_id,
                to_state,
                Some(application.status),
                false,
            ));
        }

        if !StateTransitionTable::is_allowed(current, to_state) {
            return Err(LoanflowError::InvalidTransition {
                from: current.to_string(),
                to: to_state.to_string(),
            });
        }

        let updated_at = Utc::now();
        let mut updated = application.clone();
        updated.current_state = to_state;
        updated.status = ApplicationStatus::after_transition(application.status, to_state);
        updated.updated_at = updated_at;

        if !repository
            .update_application_if_state(&updated, current)
            .await?
        {
            return self
                .resolve_lost_race(repository, &request.application_id, current, to_state)
                .await;
        }

        let transition = StateTransition::new(
            &request.application_id,
            Some(current),
            to_state,
            &request.reason,
            request.automated,
            request.user_id.clone().filter(|u| !u.is_empty()),
        )
        .with_metadata(serde_json::json!({
            "fromStateHint": hint.map(|h| h.as_str()),
            "previousStatus": application.status.as_str(),
        }));

        let audit_recorded = match repository.create_state_transition(&transition).await {
            Ok(()) => true,
            Err(e) => {
                log_error(
                    "state_machine",
                    "create_state_transition",
                    &e.to_string(),
                    Some(&request.application_id),
                );
                warn!("Continuing despite state transition record creation failure");
                false
            }
        };

        log_transition(&request.application_id, current.as_str(), to_state.as_str(), false, false);

        Ok(TransitionResult {
            application_id: request.application_id.clone(),
            previous_state: current,
            new_state: to_state,
            new_status: Some(updated.status),
            idempotent: false,
            simulated: false,
            transition: Some(transition),
            audit_recorded,
            updated_at,
        })
    }

    /// Another writer moved the record between our read and our write
    async fn resolve_lost_race(
        &self,
        repository: &dyn LoanRepository,
        application_id: &str,
        expected: ApplicationState,
        to_state: ApplicationState,
    ) -> Result<TransitionResult> {
        let reread = repository.get_application_by_id(application_id).await?;
        if reread.current_state == to_state {
            debug!("Concurrent writer already applied the transition");
            log_transition(application_id, expected.as_str(), to_state.as_str(), true, false);
            return Ok(idempotent_result(
                application_id,
                to_state,
                Some(reread.status),
                false,
            ));
        }

        warn!(
            expected = %expected,
            actual = %reread.current_state,
            "Conditional state update lost to a concurrent writer"
        );
        Err(LoanflowError::StateConflict {
            application_id: application_id.to_string(),
            expected: expected.to_string(),
            actual: reread.current_state.to_string(),
        })
    }

    fn simulate(
        &self,
        request: &TransitionRequest,
        hint: Option<ApplicationState>,
        to_state: ApplicationState,
    ) -> Result<TransitionResult> {
        let assumed = hint.unwrap_or(ApplicationState::Initiated);

        if assumed == to_state {
            log_transition(&request.application_id, assumed.as_str(), to_state.as_str(), true, true);
            return Ok(idempotent_result(
                &request.application_id,
                to_state,
                None,
                true,
            ));
        }

        if !StateTransitionTable::is_allowed(assumed, to_state) {
            return Err(LoanflowError::InvalidTransition {
                from: assumed.to_string(),
                to: to_state.to_string(),
            });
        }

        let transition = StateTransition::new(
            &request.application_id,
            Some(assumed),
            to_state,
            &request.reason,
            request.automated,
            request.user_id.clone().filter(|u| !u.is_empty()),
        );
        log_transition(&request.application_id, assumed.as_str(), to_state.as_str(), false, true);

        Ok(TransitionResult {
            application_id: request.application_id.clone(),
            previous_state: assumed,
            new_state: to_state,
            new_status: None,
            idempotent: false,
            simulated: true,
            updated_at: transition.created_at,
            transition: Some(transition),
            audit_recorded: false,
        })
    }
}

fn parse_state(field: &str, raw: &str) -> Result<ApplicationState> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(LoanflowError::validation(format!("{field} is required")));
    }
    raw.parse::<ApplicationState>()
        .map_err(|e| LoanflowError::validation(format!("{field}: {e}")))
}

fn idempotent_result(
    application_id: &str,
    state: ApplicationState,
    status: Option<ApplicationStatus>,
    simulated: bool,
) -> TransitionResult {
    TransitionResult {
        application_id: application_id.to_string(),
        previous_state: state,
        new_state: state,
        new_status: status,
        idempotent: true,
        simulated,
        transition: None,
        audit_recorded: false,
        updated_at: Utc::now(),
    }
}
