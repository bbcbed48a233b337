use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::{ApplicationState, ApplicationStatus};

/// A loan application, the aggregate moved through the lifecycle state machine.
///
/// Financial fields are read by handlers only; the state machine touches
/// `current_state`, `status` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub id: String,
    pub user_id: String,
    pub application_number: String,
    pub loan_amount: f64,
    pub loan_purpose: String,
    pub requested_term_months: i32,
    pub annual_income: f64,
    pub monthly_income: f64,
    pub employment_status: String,
    pub monthly_debt_payments: f64,
    pub current_state: ApplicationState,
    pub status: ApplicationStatus,
    pub risk_score: Option<i32>,
    pub workflow_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanApplication {
    /// New application in `initiated` / `draft`
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        let id = id.into();
        Self {
            application_number: format!("LN{}", now.format("%Y%m%d%H%M%S")),
            id,
            user_id: user_id.into(),
            loan_amount: 0.0,
            loan_purpose: String::new(),
            requested_term_months: 0,
            annual_income: 0.0,
            monthly_income: 0.0,
            employment_status: String::new(),
            monthly_debt_payments: 0.0,
            current_state: ApplicationState::Initiated,
            status: ApplicationStatus::Draft,
            risk_score: None,
            workflow_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_state(mut self, state: ApplicationState, status: ApplicationStatus) -> Self {
        self.current_state = state;
        self.status = status;
        self
    }
}
