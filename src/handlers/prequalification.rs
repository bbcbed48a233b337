//! # Pre-qualification Handler
//!
//! Serves the pre-qualification workflow: input validation, debt-to-income
//! calculation, risk grading, term generation and the final summary. The
//! sub-operation is taken from `taskName`, then `taskType`, then
//! `referenceTaskName`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::update_application_state::update_application_state;
use super::{requested_operation, round_to, HandlerContext, TaskHandler, OPERATION_KEYS};
use crate::constants::{payload_keys, reference_names, task_types};
use crate::error::{LoanflowError, Result};
use crate::state_machine::ApplicationStateMachine;
use crate::types::TaskPayload;

pub const MIN_LOAN_AMOUNT: f64 = 5_000.0;
pub const MAX_LOAN_AMOUNT: f64 = 50_000.0;
pub const MIN_ANNUAL_INCOME: f64 = 25_000.0;
pub const MAX_DTI_RATIO: f64 = 0.43;
const BASE_INTEREST_RATE: f64 = 8.0;
const MAX_INTEREST_RATE: f64 = 25.0;
const MIN_INTEREST_RATE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<&'static str>,
    pub base_interest_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterestRateRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrequalifyTerms {
    pub qualified: bool,
    pub max_loan_amount: f64,
    pub interest_rate_range: InterestRateRange,
    pub recommended_terms: Vec<u32>,
    pub message: &'static str,
}

/// Monthly debt over monthly income, rounded to four decimals; zero income gives zero.
pub fn dti_ratio(annual_income: f64, monthly_debt: f64) -> f64 {
    let monthly_income = annual_income / 12.0;
    if monthly_income > 0.0 {
        round_to(monthly_debt / monthly_income, 4)
    } else {
        0.0
    }
}

/// Grade risk from DTI, income, employment and loan size. The level only ever
/// escalates; each factor adds a premium to the base rate, capped at 25%.
pub fn assess_risk(
    loan_amount: f64,
    annual_income: f64,
    employment_status: &str,
    dti_ratio: f64,
) -> RiskAssessment {
    let mut level = RiskLevel::Low;
    let mut factors = Vec::new();
    let mut rate = BASE_INTEREST_RATE;
    let mut flag = |lvl: RiskLevel, factor: &'static str, premium: f64| {
        level = level.max(lvl);
        factors.push(factor);
        rate += premium;
    };

    if dti_ratio > MAX_DTI_RATIO {
        flag(RiskLevel::High, "High debt-to-income ratio", 3.0);
    } else if dti_ratio > 0.36 {
        flag(RiskLevel::Medium, "Moderate debt-to-income ratio", 1.5);
    }

    if annual_income < 35_000.0 {
        flag(RiskLevel::High, "Low annual income", 2.0);
    } else if annual_income < 50_000.0 {
        flag(RiskLevel::Medium, "Moderate annual income", 1.0);
    }

    match employment_status {
        "unemployed" => flag(RiskLevel::High, "Unemployed", 4.0),
        "part_time" => flag(RiskLevel::Medium, "Part-time employment", 1.5),
        "self_employed" => flag(RiskLevel::Medium, "Self-employed", 1.0),
        _ => {}
    }

    if loan_amount > annual_income * 0.8 {
        flag(RiskLevel::High, "High loan amount relative to income", 2.0);
    }

    RiskAssessment {
        risk_level: level,
        risk_factors: factors,
        base_interest_rate: rate.min(MAX_INTEREST_RATE),
    }
}

fn is_qualified(dti: f64, annual_income: f64, employment_status: &str, risk: RiskLevel) -> bool {
    !(dti > MAX_DTI_RATIO
        || annual_income < MIN_ANNUAL_INCOME
        || employment_status == "unemployed"
        || (risk == RiskLevel::High && dti > 0.40))
}

/// 25% of monthly income as the payment ceiling (less 20% above 0.30 DTI),
/// discounted over 60 months at 10% APR and capped at the product maximum.
pub fn max_loan_amount(annual_income: f64, dti: f64) -> f64 {
    let mut payment = annual_income / 12.0 * 0.25;
    if dti > 0.30 {
        payment *= 0.8;
    }
    let monthly_rate: f64 = 0.10 / 12.0;
    let growth = (1.0 + monthly_rate).powi(60);
    let amount = payment * (growth - 1.0) / (monthly_rate * growth);
    round_to(amount.min(MAX_LOAN_AMOUNT), 2)
}

pub fn interest_rate_range(base_rate: f64, dti: f64, annual_income: f64) -> InterestRateRange {
    let (mut min, mut max) = (base_rate, base_rate + 2.0);
    if dti > 0.40 {
        min += 1.0;
        max += 1.5;
    } else if dti > 0.30 {
        min += 0.5;
        max += 1.0;
    }
    if annual_income < 40_000.0 {
        min += 0.5;
        max += 0.5;
    }
    InterestRateRange {
        min: round_to(min.max(MIN_INTEREST_RATE), 2),
        max: round_to(max.min(MAX_INTEREST_RATE), 2),
    }
}

pub fn recommended_terms(annual_income: f64, dti: f64) -> Vec<u32> {
    if annual_income >= 50_000.0 && dti <= 0.30 {
        vec![36, 48, 60, 72]
    } else if annual_income >= 35_000.0 && dti <= 0.35 {
        vec![36, 48, 60]
    } else {
        vec![36, 48]
    }
}

fn rejection_message(dti: f64, annual_income: f64, employment_status: &str) -> &'static str {
    if dti > MAX_DTI_RATIO {
        "Your debt-to-income ratio is too high for loan approval"
    } else if annual_income < MIN_ANNUAL_INCOME {
        "Your annual income is below the minimum requirement"
    } else if employment_status == "unemployed" {
        "Employment verification required for loan approval"
    } else {
        "You do not currently qualify for a loan based on the provided information"
    }
}

pub fn generate_terms(
    annual_income: f64,
    employment_status: &str,
    dti: f64,
    risk_level: RiskLevel,
    base_rate: f64,
) -> PrequalifyTerms {
    if !is_qualified(dti, annual_income, employment_status, risk_level) {
        return PrequalifyTerms {
            qualified: false,
            max_loan_amount: 0.0,
            interest_rate_range: InterestRateRange { min: 0.0, max: 0.0 },
            recommended_terms: Vec::new(),
            message: rejection_message(dti, annual_income, employment_status),
        };
    }

    PrequalifyTerms {
        qualified: true,
        max_loan_amount: max_loan_amount(annual_income, dti),
        interest_rate_range: interest_rate_range(base_rate, dti, annual_income),
        recommended_terms: recommended_terms(annual_income, dti),
        message: "You are pre-qualified for a loan",
    }
}

/// `PQ` + up to eight characters of the user id + a six-digit time suffix
pub fn prequalification_id(user_id: &str) -> String {
    let prefix: String = user_id.chars().take(8).collect();
    let suffix = Utc::now().timestamp_subsec_nanos() % 1_000_000;
    format!("PQ{prefix}_{suffix:06}")
}

#[derive(Debug, Clone)]
pub struct PrequalificationTaskHandler {
    state_machine: ApplicationStateMachine,
}

impl PrequalificationTaskHandler {
    pub fn new(state_machine: ApplicationStateMachine) -> Self {
        Self { state_machine }
    }

    fn validate_input(&self, input: &TaskPayload) -> Result<TaskPayload> {
        let mut errors = Map::new();
        let mut error = |field: &str, message: &str| {
            errors.insert(field.to_string(), Value::from(message));
        };

        if input.optional_str(payload_keys::USER_ID)?.map_or(true, |s| s.trim().is_empty()) {
            error("userId", "User ID is required");
        }

        let loan_amount = input.optional_f64("loanAmount")?.unwrap_or(0.0);
        if loan_amount <= 0.0 {
            error("loanAmount", "Loan amount must be greater than 0");
        } else if loan_amount < MIN_LOAN_AMOUNT {
            error("loanAmount", "Loan amount must be at least $5,000");
        } else if loan_amount > MAX_LOAN_AMOUNT {
            error("loanAmount", "Loan amount cannot exceed $50,000");
        }

        let annual_income = input.optional_f64("annualIncome")?.unwrap_or(0.0);
        if annual_income <= 0.0 {
            error("annualIncome", "Annual income must be greater than 0");
        } else if annual_income < MIN_ANNUAL_INCOME {
            error("annualIncome", "Annual income must be at least $25,000");
        }

        if input.optional_f64("monthlyDebt")?.unwrap_or(0.0) < 0.0 {
            error("monthlyDebt", "Monthly debt cannot be negative");
        }

        if input
            .optional_str("employmentStatus")?
            .map_or(true, |s| s.trim().is_empty())
        {
            error("employmentStatus", "Employment status is required");
        }

        let valid = errors.is_empty();
        info!(valid, error_count = errors.len(), "Pre-qualification input validated");

        Ok(TaskPayload::new()
            .with("valid", valid)
            .with("validationErrors", Value::Object(errors)))
    }

    fn calculate_dti(&self, input: &TaskPayload) -> Result<TaskPayload> {
        let annual_income = input.require_f64("annualIncome")?;
        let monthly_debt = input.require_f64("monthlyDebt")?;
        let ratio = dti_ratio(annual_income, monthly_debt);

        debug!(annual_income, monthly_debt, dti_ratio = ratio, "DTI ratio calculated");

        Ok(TaskPayload::new()
            .with("dtiRatio", ratio)
            .with("monthlyIncome", annual_income / 12.0))
    }

    fn assess_risk(&self, input: &TaskPayload) -> Result<TaskPayload> {
        let assessment = assess_risk(
            input.require_f64("loanAmount")?,
            input.require_f64("annualIncome")?,
            input.require_str("employmentStatus")?,
            input.require_f64("dtiRatio")?,
        );

        info!(
            risk_level = assessment.risk_level.as_str(),
            base_interest_rate = assessment.base_interest_rate,
            risk_factor_count = assessment.risk_factors.len(),
            "Risk assessment completed"
        );

        Ok(TaskPayload::new()
            .with("riskLevel", assessment.risk_level.as_str())
            .with("riskFactors", json!(assessment.risk_factors))
            .with("baseInterestRate", assessment.base_interest_rate))
    }

    fn generate_terms(&self, input: &TaskPayload) -> Result<TaskPayload> {
        let risk = input
            .optional_object("riskAssessment")?
            .ok_or_else(|| LoanflowError::validation("riskAssessment is required"))?;
        let risk = TaskPayload::from(risk.clone());
        let risk_level: RiskLevel =
            serde_json::from_value(Value::from(risk.require_str("riskLevel")?)).map_err(|_| {
                LoanflowError::validation("riskAssessment.riskLevel must be LOW, MEDIUM or HIGH")
            })?;

        let terms = generate_terms(
            input.require_f64("annualIncome")?,
            input.require_str("employmentStatus")?,
            input.require_f64("dtiRatio")?,
            risk_level,
            risk.require_f64("baseInterestRate")?,
        );

        info!(
            qualified = terms.qualified,
            max_loan_amount = terms.max_loan_amount,
            message = terms.message,
            "Pre-qualification terms generated"
        );

        Ok(TaskPayload::new()
            .with("qualified", terms.qualified)
            .with("maxLoanAmount", terms.max_loan_amount)
            .with(
                "interestRateRange",
                json!({
                    "min": terms.interest_rate_range.min,
                    "max": terms.interest_rate_range.max,
                }),
            )
            .with("recommendedTerms", json!(terms.recommended_terms))
            .with("message", terms.message))
    }

    fn finalize(&self, input: &TaskPayload) -> Result<TaskPayload> {
        let user_id = input.require_str(payload_keys::USER_ID)?;
        let qualified = input.require_bool("qualified")?;
        let rates = input
            .optional_object("interestRateRange")?
            .cloned()
            .map(TaskPayload::from)
            .unwrap_or_default();
        let terms: Vec<i64> = input
            .optional_array("recommendedTerms")?
            .map(|terms| terms.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();

        let id = prequalification_id(user_id);
        info!(prequalification_id = %id, qualified, "Pre-qualification finalized");

        Ok(TaskPayload::new()
            .with("qualified", qualified)
            .with("maxLoanAmount", input.optional_f64("maxLoanAmount")?.unwrap_or(0.0))
            .with("minInterestRate", rates.optional_f64("min")?.unwrap_or(0.0))
            .with("maxInterestRate", rates.optional_f64("max")?.unwrap_or(0.0))
            .with("recommendedTerms", json!(terms))
            .with("dtiRatio", input.optional_f64("dtiRatio")?.unwrap_or(0.0))
            .with("message", input.optional_str("message")?.unwrap_or_default())
            .with("prequalificationId", id))
    }
}

#[async_trait]
impl TaskHandler for PrequalificationTaskHandler {
    async fn execute(
        &self,
        _ctx: &HandlerContext,
        input: &TaskPayload,
    ) -> Result<Option<TaskPayload>> {
        let operation = requested_operation(input, OPERATION_KEYS).unwrap_or_default();
        debug!(operation = %operation, "Executing pre-qualification task");

        let output = match operation.as_str() {
            reference_names::VALIDATE_PREQUALIFY_INPUT => self.validate_input(input)?,
            reference_names::CALCULATE_DTI_RATIO => self.calculate_dti(input)?,
            reference_names::ASSESS_PREQUALIFY_RISK => self.assess_risk(input)?,
            reference_names::GENERATE_PREQUALIFY_TERMS => self.generate_terms(input)?,
            reference_names::FINALIZE_PREQUALIFICATION => self.finalize(input)?,
            task_types::UPDATE_APPLICATION_STATE => {
                update_application_state(&self.state_machine, input).await?
            }
            other => return Err(LoanflowError::UnknownTaskType(other.to_string())),
        };
        Ok(Some(output))
    }

    fn name(&self) -> &str {
        "prequalification"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> PrequalificationTaskHandler {
        PrequalificationTaskHandler::new(ApplicationStateMachine::simulation())
    }

    async fn run(input: TaskPayload) -> Result<TaskPayload> {
        handler()
            .execute(&HandlerContext::default(), &input)
            .await
            .map(|o| o.unwrap())
    }

    #[test]
    fn test_dti_ratio_rounding() {
        assert_eq!(dti_ratio(60_000.0, 1_000.0), 0.2);
        assert_eq!(dti_ratio(70_000.0, 1_234.0), 0.2115);
        assert_eq!(dti_ratio(0.0, 500.0), 0.0);
    }

    #[test]
    fn test_risk_low_profile() {
        let assessment = assess_risk(20_000.0, 80_000.0, "full_time", 0.2);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment.risk_factors.is_empty());
        assert_eq!(assessment.base_interest_rate, 8.0);
    }

    #[test]
    fn test_risk_level_never_downgrades() {
        // High DTI followed by a medium-grade employment factor stays HIGH
        let assessment = assess_risk(10_000.0, 60_000.0, "part_time", 0.45);
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(
            assessment.risk_factors,
            vec!["High debt-to-income ratio", "Part-time employment"]
        );
        assert_eq!(assessment.base_interest_rate, 12.5);
    }

    #[test]
    fn test_risk_every_factor() {
        let assessment = assess_risk(50_000.0, 20_000.0, "unemployed", 0.9);
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.risk_factors.len(), 4);
        assert_eq!(assessment.base_interest_rate, 19.0);
    }

    #[test]
    fn test_terms_for_strong_applicant() {
        let terms = generate_terms(90_000.0, "full_time", 0.2, RiskLevel::Low, 8.0);
        assert!(terms.qualified);
        assert_eq!(terms.recommended_terms, vec![36, 48, 60, 72]);
        assert_eq!(terms.interest_rate_range, InterestRateRange { min: 8.0, max: 10.0 });
        assert!(terms.max_loan_amount > 0.0 && terms.max_loan_amount <= MAX_LOAN_AMOUNT);
        assert_eq!(terms.message, "You are pre-qualified for a loan");
    }

    #[test]
    fn test_terms_rejections() {
        let terms = generate_terms(60_000.0, "full_time", 0.5, RiskLevel::High, 11.0);
        assert!(!terms.qualified);
        assert_eq!(
            terms.message,
            "Your debt-to-income ratio is too high for loan approval"
        );
        assert!(terms.recommended_terms.is_empty());

        let terms = generate_terms(60_000.0, "unemployed", 0.1, RiskLevel::High, 12.0);
        assert_eq!(terms.message, "Employment verification required for loan approval");

        let terms = generate_terms(60_000.0, "full_time", 0.42, RiskLevel::High, 12.0);
        assert_eq!(
            terms.message,
            "You do not currently qualify for a loan based on the provided information"
        );
    }

    #[test]
    fn test_max_loan_amount_haircut() {
        let low_dti = max_loan_amount(48_000.0, 0.2);
        let high_dti = max_loan_amount(48_000.0, 0.35);
        assert!(high_dti < low_dti);
        assert_eq!(max_loan_amount(1_000_000.0, 0.1), MAX_LOAN_AMOUNT);
    }

    #[test]
    fn test_prequalification_id_short_user() {
        let id = prequalification_id("u1");
        assert!(id.starts_with("PQu1_"));
        assert_eq!(id.len(), "PQu1_".len() + 6);
    }

    #[tokio::test]
    async fn test_validate_input_collects_errors() {
        let output = run(TaskPayload::new()
            .with("taskName", "validate_prequalify_input")
            .with("loanAmount", 1_000)
            .with("annualIncome", 20_000)
            .with("monthlyDebt", -5))
        .await
        .unwrap();

        assert_eq!(output.get("valid"), Some(&json!(false)));
        let errors = output.get("validationErrors").unwrap();
        assert_eq!(errors["userId"], json!("User ID is required"));
        assert_eq!(errors["loanAmount"], json!("Loan amount must be at least $5,000"));
        assert_eq!(errors["annualIncome"], json!("Annual income must be at least $25,000"));
        assert_eq!(errors["monthlyDebt"], json!("Monthly debt cannot be negative"));
        assert_eq!(errors["employmentStatus"], json!("Employment status is required"));
    }

    #[tokio::test]
    async fn test_validate_input_rejects_wrong_types() {
        let err = run(TaskPayload::new()
            .with("taskName", "validate_prequalify_input")
            .with("loanAmount", "10000"))
        .await
        .unwrap_err();
        assert!(matches!(err, LoanflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_dispatch_by_reference_name() {
        let output = run(TaskPayload::new()
            .with("referenceTaskName", "calculate_dti_ratio")
            .with("annualIncome", 60_000)
            .with("monthlyDebt", 1_500))
        .await
        .unwrap();
        assert_eq!(output.get("dtiRatio"), Some(&json!(0.3)));
        assert_eq!(output.get("monthlyIncome"), Some(&json!(5_000.0)));
    }

    #[tokio::test]
    async fn test_generate_terms_requires_risk_assessment() {
        let err = run(TaskPayload::new()
            .with("taskName", "generate_prequalify_terms")
            .with("annualIncome", 60_000)
            .with("employmentStatus", "full_time")
            .with("dtiRatio", 0.2))
        .await
        .unwrap_err();
        assert!(matches!(err, LoanflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_finalize_output() {
        let output = run(TaskPayload::new()
            .with("taskName", "finalize_prequalification")
            .with("userId", "user-123456789")
            .with("qualified", true)
            .with("maxLoanAmount", 25_000.0)
            .with("interestRateRange", json!({"min": 8.0, "max": 10.0}))
            .with("recommendedTerms", json!([36, 48, 60]))
            .with("dtiRatio", 0.2)
            .with("message", "You are pre-qualified for a loan"))
        .await
        .unwrap();

        assert_eq!(output.get("minInterestRate"), Some(&json!(8.0)));
        assert_eq!(output.get("recommendedTerms"), Some(&json!([36, 48, 60])));
        let id = output.get("prequalificationId").unwrap().as_str().unwrap();
        assert!(id.starts_with("PQuser-123_"));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let err = run(TaskPayload::new().with("taskName", "make_coffee"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoanflowError::UnknownTaskType(name) if name == "make_coffee"));
    }
}
