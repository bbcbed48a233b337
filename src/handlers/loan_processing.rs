//! # Loan Processing Handler
//!
//! Serves the main application workflow. Branches on `taskType`; when the type
//! is absent or unfamiliar the reference name is tried (with `update_state_*`
//! references mapping to the state update), and finally the shape of the input.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::identity_verification::verify_identity;
use super::prequalification::{MAX_LOAN_AMOUNT, MIN_ANNUAL_INCOME, MIN_LOAN_AMOUNT};
use super::update_application_state::update_application_state;
use super::{HandlerContext, TaskHandler};
use crate::constants::{payload_keys, task_types};
use crate::error::{LoanflowError, Result};
use crate::state_machine::{ApplicationState, ApplicationStateMachine};
use crate::types::TaskPayload;

pub const LOAN_PURPOSES: &[&str] = &[
    "debt_consolidation",
    "home_improvement",
    "major_purchase",
    "medical_expenses",
    "education",
    "other",
];

const MIN_TERM_MONTHS: i64 = 12;
const MAX_TERM_MONTHS: i64 = 84;
const MAX_VALIDATION_DTI: f64 = 0.4;

/// States from which a loan decision can be finalized
const FINALIZABLE_STATES: &[ApplicationState] = &[
    ApplicationState::IdentityVerified,
    ApplicationState::Approved,
    ApplicationState::Denied,
    ApplicationState::ManualReview,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    ValidateApplication,
    UpdateApplicationState,
    DocumentCollection,
    IdentityVerification,
    FinalizeLoanDecision,
}

impl Operation {
    fn from_task_type(name: &str) -> Option<Self> {
        match name {
            task_types::VALIDATE_APPLICATION => Some(Self::ValidateApplication),
            task_types::UPDATE_APPLICATION_STATE => Some(Self::UpdateApplicationState),
            task_types::DOCUMENT_COLLECTION => Some(Self::DocumentCollection),
            task_types::IDENTITY_VERIFICATION => Some(Self::IdentityVerification),
            task_types::FINALIZE_LOAN_DECISION => Some(Self::FinalizeLoanDecision),
            _ => None,
        }
    }

    fn from_reference_name(name: &str) -> Option<Self> {
        if name.starts_with("update_state_") {
            return Some(Self::UpdateApplicationState);
        }
        Self::from_task_type(name.strip_suffix("_ref").unwrap_or(name))
    }

    /// Last resort: guess from the fields present
    fn from_input_shape(input: &TaskPayload) -> Option<Self> {
        if input.contains_key("loanAmount") {
            Some(Self::ValidateApplication)
        } else if input.contains_key(payload_keys::TO_STATE) {
            Some(Self::UpdateApplicationState)
        } else if input.contains_key("requiredDocuments") {
            Some(Self::DocumentCollection)
        } else if input.contains_key("personalInfo") || input.contains_key("documents") {
            Some(Self::IdentityVerification)
        } else if input.contains_key("decision") {
            Some(Self::FinalizeLoanDecision)
        } else {
            None
        }
    }
}

fn reject(errors: &mut Map<String, Value>, field: &str, message: &str) {
    errors.insert(field.to_string(), Value::from(message));
}

#[derive(Debug, Clone)]
pub struct LoanProcessingTaskHandler {
    state_machine: ApplicationStateMachine,
}

impl LoanProcessingTaskHandler {
    pub fn new(state_machine: ApplicationStateMachine) -> Self {
        Self { state_machine }
    }

    fn resolve_operation(&self, input: &TaskPayload) -> Result<Operation> {
        let task_type = input.optional_str(payload_keys::TASK_TYPE)?.unwrap_or_default();
        if let Some(op) = Operation::from_task_type(task_type) {
            return Ok(op);
        }

        let reference = input
            .optional_str(payload_keys::REFERENCE_TASK_NAME)?
            .unwrap_or_default();
        if let Some(op) = Operation::from_reference_name(reference) {
            return Ok(op);
        }

        warn!(
            task_type = %task_type,
            reference_task_name = %reference,
            "Unknown task type, inferring operation from input"
        );
        Operation::from_input_shape(input)
            .ok_or_else(|| LoanflowError::UnknownTaskType(task_type.to_string()))
    }

    fn validate_application(&self, input: &TaskPayload) -> Result<TaskPayload> {
        let application_id = input.optional_str(payload_keys::APPLICATION_ID)?.unwrap_or_default();
        let user_id = input.optional_str(payload_keys::USER_ID)?.unwrap_or_default();
        let loan_amount = input.optional_f64("loanAmount")?.unwrap_or(0.0);
        let loan_purpose = input.optional_str("loanPurpose")?.unwrap_or_default();
        let annual_income = input.optional_f64("annualIncome")?.unwrap_or(0.0);
        let monthly_income = input.optional_f64("monthlyIncome")?.unwrap_or(0.0);
        let requested_term = input.optional_i64("requestedTerm")?.unwrap_or(0);
        let monthly_debt = input.optional_f64("monthlyDebt")?;

        let mut errors = Map::new();

        if application_id.trim().is_empty() {
            reject(&mut errors, "applicationId", "Application ID is required");
        }
        if user_id.trim().is_empty() {
            reject(&mut errors, "userId", "User ID is required");
        }

        if loan_amount <= 0.0 {
            reject(&mut errors, "loanAmount", "Loan amount must be greater than 0");
        } else if loan_amount < MIN_LOAN_AMOUNT {
            reject(&mut errors, "loanAmount", "Loan amount must be at least $5,000");
        } else if loan_amount > MAX_LOAN_AMOUNT {
            reject(&mut errors, "loanAmount", "Loan amount cannot exceed $50,000");
        }

        if loan_purpose.is_empty() {
            reject(&mut errors, "loanPurpose", "Loan purpose is required");
        } else if !LOAN_PURPOSES.contains(&loan_purpose) {
            reject(&mut errors, "loanPurpose", "Invalid loan purpose");
        }

        if annual_income <= 0.0 {
            reject(&mut errors, "annualIncome", "Annual income must be greater than 0");
        } else if annual_income < MIN_ANNUAL_INCOME {
            reject(&mut errors, "annualIncome", "Annual income must be at least $25,000");
        }

        if monthly_income <= 0.0 {
            reject(&mut errors, "monthlyIncome", "Monthly income must be greater than 0");
        }

        if requested_term <= 0 {
            reject(&mut errors, "requestedTerm", "Requested term must be greater than 0");
        } else if requested_term < MIN_TERM_MONTHS {
            reject(&mut errors, "requestedTerm", "Requested term must be at least 12 months");
        } else if requested_term > MAX_TERM_MONTHS {
            reject(&mut errors, "requestedTerm", "Requested term cannot exceed 84 months");
        }

        // Affordability is only judged once every field is acceptable
        let dti = monthly_debt
            .filter(|_| monthly_income > 0.0)
            .map(|debt| debt / monthly_income);
        if errors.is_empty() && dti.is_some_and(|ratio| ratio > MAX_VALIDATION_DTI) {
            reject(&mut errors, "monthlyDebt", "Debt-to-income ratio exceeds 40%");
        }

        let valid = errors.is_empty();
        info!(
            application_id = %application_id,
            valid,
            error_count = errors.len(),
            "Application validation completed"
        );

        Ok(TaskPayload::new()
            .with("valid", valid)
            .with("validationErrors", Value::Object(errors))
            .with(
                "normalizedData",
                json!({
                    "applicationId": application_id,
                    "userId": user_id,
                    "loanAmount": loan_amount,
                    "loanPurpose": loan_purpose,
                    "annualIncome": annual_income,
                    "monthlyIncome": monthly_income,
                    "requestedTerm": requested_term,
                    "dtiRatio": dti,
                    "validatedAt": Utc::now().to_rfc3339(),
                }),
            ))
    }

    /// Human task; the engine holds it until someone uploads the documents
    fn document_collection(&self, input: &TaskPayload) -> Result<TaskPayload> {
        let application_id = input.optional_str(payload_keys::APPLICATION_ID)?;
        info!(application_id = ?application_id, "Document collection awaiting human action");

        Ok(TaskPayload::new()
            .with("documentsCollected", false)
            .with("incomeVerification", false)
            .with("employmentVerification", false)
            .with("bankStatements", false)
            .with("identificationDocument", false)
            .with("collectionCompletedAt", Value::Null)
            .with("status", "pending_human_action"))
    }

    fn finalize_loan_decision(&self, input: &TaskPayload) -> Result<TaskPayload> {
        let application_id = input.require_str(payload_keys::APPLICATION_ID)?;
        let final_state = input.require_str("finalState")?;
        let decision = input.require_str("decision")?;
        let interest_rate = input.optional_f64("interestRate")?.unwrap_or(0.0);

        if let Some(current) = input.optional_str(payload_keys::CURRENT_STATE)? {
            let state: ApplicationState = current.parse().map_err(LoanflowError::Validation)?;
            if !FINALIZABLE_STATES.contains(&state) {
                return Err(LoanflowError::validation(format!(
                    "cannot finalize loan decision from state {state}"
                )));
            }
        }

        let next_steps: &[&str] = match decision {
            "approved" => &["sign_loan_agreement", "provide_banking_info", "fund_disbursement"],
            "denied" => &["review_denial_reason", "consider_appeal", "alternative_products"],
            "manual_review" => &["underwriter_review", "additional_documentation", "follow_up"],
            _ => &["contact_customer_service"],
        };

        let completed_at = Utc::now().to_rfc3339();
        info!(
            application_id = %application_id,
            decision = %decision,
            final_state = %final_state,
            interest_rate,
            "Loan decision finalized"
        );

        Ok(TaskPayload::new()
            .with("finalState", final_state)
            .with("decision", decision)
            .with("interestRate", interest_rate)
            .with("completedAt", completed_at.as_str())
            .with("nextSteps", json!(next_steps))
            .with(
                "summary",
                json!({
                    "applicationId": application_id,
                    "status": final_state,
                    "decision": decision,
                    "timestamp": completed_at,
                }),
            ))
    }
}

#[async_trait]
impl TaskHandler for LoanProcessingTaskHandler {
    async fn execute(
        &self,
        _ctx: &HandlerContext,
        input: &TaskPayload,
    ) -> Result<Option<TaskPayload>> {
        let operation = self.resolve_operation(input)?;
        debug!(operation = ?operation, "Executing loan processing task");

        let output = match operation {
            Operation::ValidateApplication => self.validate_application(input)?,
            Operation::UpdateApplicationState => {
                update_application_state(&self.state_machine, input).await?
            }
            Operation::DocumentCollection => self.document_collection(input)?,
            Operation::IdentityVerification => verify_identity(input)?,
            Operation::FinalizeLoanDecision => self.finalize_loan_decision(input)?,
        };
        Ok(Some(output))
    }

    fn name(&self) -> &str {
        "loan_processing"
    }
}
