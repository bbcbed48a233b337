use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::LoanRepository;
use crate::config::DatabaseConfig;
use crate::error::{LoanflowError, Result};
use crate::models::{LoanApplication, StateTransition};
use crate::state_machine::{ApplicationState, ApplicationStatus};

const APPLICATION_COLUMNS: &str = "id, user_id, application_number, loan_amount, loan_purpose, \
     requested_term_months, annual_income, monthly_income, employment_status, \
     monthly_debt_payments, current_state, status, risk_score, workflow_id, created_at, updated_at";

#[derive(Debug, FromRow)]
struct LoanApplicationRow {
    id: String,
    user_id: String,
    application_number: String,
    loan_amount: f64,
    loan_purpose: String,
    requested_term_months: i32,
    annual_income: f64,
    monthly_income: f64,
    employment_status: String,
    monthly_debt_payments: f64,
    current_state: String,
    status: String,
    risk_score: Option<i32>,
    workflow_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoanApplicationRow> for LoanApplication {
    type Error = LoanflowError;

    fn try_from(row: LoanApplicationRow) -> Result<Self> {
        let current_state = row.current_state.parse::<ApplicationState>().map_err(|e| {
            LoanflowError::Persistence(format!("application {}: {e}", row.id))
        })?;
        let status = row
            .status
            .parse::<ApplicationStatus>()
            .map_err(|e| LoanflowError::Persistence(format!("application {}: {e}", row.id)))?;

        Ok(LoanApplication {
            id: row.id,
            user_id: row.user_id,
            application_number: row.application_number,
            loan_amount: row.loan_amount,
            loan_purpose: row.loan_purpose,
            requested_term_months: row.requested_term_months,
            annual_income: row.annual_income,
            monthly_income: row.monthly_income,
            employment_status: row.employment_status,
            monthly_debt_payments: row.monthly_debt_payments,
            current_state,
            status,
            risk_score: row.risk_score,
            workflow_id: row.workflow_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct StateTransitionRow {
    id: Uuid,
    application_id: String,
    from_state: Option<String>,
    to_state: String,
    transition_reason: String,
    automated: bool,
    user_id: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<StateTransitionRow> for StateTransition {
    type Error = LoanflowError;

    fn try_from(row: StateTransitionRow) -> Result<Self> {
        let parse = |s: &str| {
            s.parse::<ApplicationState>()
                .map_err(|e| LoanflowError::Persistence(format!("transition {}: {e}", row.id)))
        };
        Ok(StateTransition {
            from_state: row.from_state.as_deref().map(parse).transpose()?,
            to_state: parse(&row.to_state)?,
            id: row.id,
            application_id: row.application_id,
            transition_reason: row.transition_reason,
            automated: row.automated,
            user_id: row.user_id,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL-backed repository using runtime-checked `sqlx` queries
#[derive(Debug, Clone)]
pub struct PgLoanRepository {
    pool: PgPool,
}

impl PgLoanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration; fails when no database URL is configured
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            LoanflowError::Configuration("database.url is required for PostgreSQL".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect(url)
            .await?;

        debug!(
            max_connections = config.max_connections,
            "Connected to loan application database"
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LoanRepository for PgLoanRepository {
    #[instrument(skip(self))]
    async fn get_application_by_id(&self, id: &str) -> Result<LoanApplication> {
        let query = format!("SELECT {APPLICATION_COLUMNS} FROM loan_applications WHERE id = $1");
        let row = sqlx::query_as::<_, LoanApplicationRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LoanflowError::application_not_found(id))?;

        row.try_into()
    }

    #[instrument(skip(self, application), fields(application_id = %application.id))]
    async fn create_application(&self, application: &LoanApplication) -> Result<()> {
        let query = format!(
            "INSERT INTO loan_applications ({APPLICATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        );
        sqlx::query(&query)
            .bind(&application.id)
            .bind(&application.user_id)
            .bind(&application.application_number)
            .bind(application.loan_amount)
            .bind(&application.loan_purpose)
            .bind(application.requested_term_months)
            .bind(application.annual_income)
            .bind(application.monthly_income)
            .bind(&application.employment_status)
            .bind(application.monthly_debt_payments)
            .bind(application.current_state.as_str())
            .bind(application.status.as_str())
            .bind(application.risk_score)
            .bind(&application.workflow_id)
            .bind(application.created_at)
            .bind(application.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, application), fields(application_id = %application.id))]
    async fn update_application(&self, application: &LoanApplication) -> Result<()> {
        let query = r#"
            UPDATE loan_applications
            SET current_state = $2, status = $3, risk_score = $4, workflow_id = $5, updated_at = $6
            WHERE id = $1
        "#;
        let result = sqlx::query(query)
            .bind(&application.id)
            .bind(application.current_state.as_str())
            .bind(application.status.as_str())
            .bind(application.risk_score)
            .bind(&application.workflow_id)
            .bind(application.updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LoanflowError::application_not_found(&application.id));
        }
        Ok(())
    }

    #[instrument(skip(self, application), fields(application_id = %application.id))]
    async fn update_application_if_state(
        &self,
        application: &LoanApplication,
        expected_state: ApplicationState,
    ) -> Result<bool> {
        let query = r#"
            UPDATE loan_applications
            SET current_state = $2, status = $3, risk_score = $4, workflow_id = $5, updated_at = $6
            WHERE id = $1 AND current_state = $7
        "#;
        let result = sqlx::query(query)
            .bind(&application.id)
            .bind(application.current_state.as_str())
            .bind(application.status.as_str())
            .bind(application.risk_score)
            .bind(&application.workflow_id)
            .bind(application.updated_at)
            .bind(expected_state.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, transition), fields(application_id = %transition.application_id))]
    async fn create_state_transition(&self, transition: &StateTransition) -> Result<()> {
        let query = r#"
            INSERT INTO state_transitions
                (id, application_id, from_state, to_state, transition_reason, automated, user_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#;
        sqlx::query(query)
            .bind(transition.id)
            .bind(&transition.application_id)
            .bind(transition.from_state.map(|s| s.as_str()))
            .bind(transition.to_state.as_str())
            .bind(&transition.transition_reason)
            .bind(transition.automated)
            .bind(&transition.user_id)
            .bind(&transition.metadata)
            .bind(transition.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_state_transitions(&self, application_id: &str) -> Result<Vec<StateTransition>> {
        let query = r#"
            SELECT id, application_id, from_state, to_state, transition_reason, automated,
                   user_id, metadata, created_at
            FROM state_transitions
            WHERE application_id = $1
            ORDER BY created_at ASC
        "#;
        let rows = sqlx::query_as::<_, StateTransitionRow>(query)
            .bind(application_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(StateTransition::try_from).collect()
    }
}
