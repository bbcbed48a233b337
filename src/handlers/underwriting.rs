//! # Underwriting Handler
//!
//! Serves the underwriting workflow: credit check, income verification, risk
//! scoring and the final decision. No credit bureau or income provider is wired
//! in, so each step works from the figures the workflow carries forward and
//! falls back to a standard profile where a provider would have answered.
//!
//! The sub-operation comes from the first of `taskName`, `taskType` and
//! `referenceTaskName` that names one; `_task` and `_ref` suffixes are ignored.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::prequalification::{dti_ratio, MAX_DTI_RATIO, MAX_LOAN_AMOUNT, MIN_ANNUAL_INCOME, MIN_LOAN_AMOUNT};
use super::update_application_state::update_application_state;
use super::{round_to, HandlerContext, TaskHandler, OPERATION_KEYS};
use crate::constants::{payload_keys, task_types};
use crate::error::{LoanflowError, Result};
use crate::state_machine::{ApplicationState, ApplicationStateMachine};
use crate::types::TaskPayload;

pub const MIN_CREDIT_SCORE: i64 = 580;
const MAX_CREDIT_UTILIZATION: f64 = 0.8;
const MAX_RECENT_LATE_PAYMENTS: i64 = 5;
const MIN_INTEREST_RATE: f64 = 5.0;
const MAX_INTEREST_RATE: f64 = 25.0;
const APR_MARGIN: f64 = 0.5;
/// Verified income reported when no provider figure is supplied
const STANDARD_INCOME_UPLIFT: f64 = 1.025;
const STANDARD_EMPLOYMENT_MONTHS: i64 = 27;
const CONFIDENCE_LEVEL: f64 = 0.85;
const MODEL_VERSION: &str = "basic_v1.0";
const POLICY_VERSION: &str = "standard_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderwritingRisk {
    Low,
    Medium,
    High,
    Critical,
}

impl UnderwritingRisk {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Critical
        } else if score >= 60.0 {
            Self::High
        } else if score >= 40.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Case-insensitive, so the pre-qualification grades (`LOW`, ...) are accepted
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn recommended_action(&self) -> &'static str {
        match self {
            Self::Low => "approve_standard_terms",
            Self::Medium => "approve_with_conditions",
            Self::High => "manual_review_required",
            Self::Critical => "decline",
        }
    }

    fn category(&self) -> &'static str {
        match self {
            Self::Low => "low_risk_prime",
            Self::Medium => "medium_risk_near_prime",
            Self::High => "high_risk_subprime",
            Self::Critical => "critical_risk_deep_subprime",
        }
    }

    fn recommendations(&self) -> [&'static str; 2] {
        match self {
            Self::Low => ["Standard underwriting process", "Consider premium pricing tier"],
            Self::Medium => [
                "Additional income verification recommended",
                "Consider standard pricing with monitoring",
            ],
            Self::High => [
                "Manual underwriter review required",
                "Consider conditional approval with additional requirements",
            ],
            Self::Critical => [
                "Decline recommendation",
                "Consider alternative products if available",
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Credit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CreditProfile {
    pub credit_score: i64,
    pub credit_utilization: f64,
    pub on_time_payments: i64,
    pub late_payments_30: i64,
    pub late_payments_60: i64,
    pub late_payments_90: i64,
    pub bankruptcies: i64,
    /// All derogatory items, bankruptcies included
    pub derogatory_count: i64,
}

impl Default for CreditProfile {
    /// Profile reported when no bureau data is supplied
    fn default() -> Self {
        Self {
            credit_score: 720,
            credit_utilization: 0.25,
            on_time_payments: 95,
            late_payments_30: 2,
            late_payments_60: 1,
            late_payments_90: 0,
            bankruptcies: 0,
            derogatory_count: 0,
        }
    }
}

impl CreditProfile {
    /// Read the `creditProfile` object. `creditScore` is required once the object
    /// is present; counts and utilization default to zero.
    pub fn from_payload(input: &TaskPayload) -> Result<Option<Self>> {
        let Some(map) = input.optional_object("creditProfile")? else {
            return Ok(None);
        };
        let fields = TaskPayload::from(map.clone());
        let count = |key: &str| -> Result<i64> { Ok(fields.optional_i64(key)?.unwrap_or(0)) };

        let bankruptcies = count("bankruptcies")?;
        let derogatory_count = bankruptcies
            + count("liens")?
            + count("judgments")?
            + count("chargeOffs")?
            + count("collections")?;

        Ok(Some(Self {
            credit_score: fields.require_i64("creditScore")?,
            credit_utilization: fields.optional_f64("creditUtilization")?.unwrap_or(0.0),
            on_time_payments: count("onTimePayments")?,
            late_payments_30: count("latePayments30")?,
            late_payments_60: count("latePayments60")?,
            late_payments_90: count("latePayments90")?,
            bankruptcies,
            derogatory_count,
        }))
    }

    pub fn recent_late_payments(&self) -> i64 {
        self.late_payments_30 + self.late_payments_60 + self.late_payments_90
    }

    pub fn score_range(&self) -> &'static str {
        match self.credit_score {
            s if s >= 800 => "excellent",
            s if s >= 740 => "very_good",
            s if s >= 670 => "good",
            s if s >= 580 => "fair",
            _ => "poor",
        }
    }
}

/// 0-100, higher is riskier
pub fn credit_risk_score(profile: &CreditProfile) -> f64 {
    let mut score: f64 = match profile.credit_score {
        s if s >= 800 => 5.0,
        s if s >= 740 => 10.0,
        s if s >= 670 => 20.0,
        s if s >= 580 => 35.0,
        _ => 50.0,
    };

    score += if profile.credit_utilization > 0.8 {
        20.0
    } else if profile.credit_utilization > 0.5 {
        15.0
    } else if profile.credit_utilization > 0.3 {
        10.0
    } else {
        0.0
    };

    score += profile.recent_late_payments() as f64 * 3.0;
    score += profile.derogatory_count as f64 * 10.0;
    score.min(100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditDecision {
    pub approved: bool,
    pub reason: String,
    pub recommendations: Vec<String>,
    pub manual_review: bool,
}

impl CreditDecision {
    fn declined(reason: String, recommendation: &str, manual_review: bool) -> Self {
        Self {
            approved: false,
            reason,
            recommendations: vec![recommendation.to_string()],
            manual_review,
        }
    }
}

/// Basic credit requirements, checked in order; the first failure decides
pub fn evaluate_credit(profile: &CreditProfile, risk: UnderwritingRisk) -> CreditDecision {
    if profile.credit_score < MIN_CREDIT_SCORE {
        return CreditDecision::declined(
            format!(
                "Credit score {} is below minimum requirement of {MIN_CREDIT_SCORE}",
                profile.credit_score
            ),
            "Improve credit score by paying down existing debts and ensuring on-time payments",
            false,
        );
    }
    if profile.bankruptcies > 0 {
        return CreditDecision::declined(
            "Recent bankruptcy on credit report".to_string(),
            "Manual review required due to bankruptcy history",
            true,
        );
    }
    if profile.credit_utilization > MAX_CREDIT_UTILIZATION {
        return CreditDecision::declined(
            format!(
                "Credit utilization {:.1}% exceeds maximum of {:.1}%",
                profile.credit_utilization * 100.0,
                MAX_CREDIT_UTILIZATION * 100.0
            ),
            "Pay down existing credit card balances to reduce utilization",
            false,
        );
    }
    let late_payments = profile.recent_late_payments();
    if late_payments > MAX_RECENT_LATE_PAYMENTS {
        return CreditDecision::declined(
            format!("Too many recent late payments: {late_payments}"),
            "Establish consistent on-time payment history",
            false,
        );
    }
    if risk == UnderwritingRisk::Critical {
        return CreditDecision::declined(
            "Credit risk level is too high".to_string(),
            "Manual underwriter review required due to high risk factors",
            true,
        );
    }

    let recommendation = match risk {
        UnderwritingRisk::High => "Consider additional income verification due to elevated credit risk",
        UnderwritingRisk::Medium => "Standard underwriting process with additional documentation",
        _ => "Credit profile supports standard underwriting",
    };
    CreditDecision {
        approved: true,
        reason: "Credit check passed basic requirements".to_string(),
        recommendations: vec![recommendation.to_string()],
        manual_review: false,
    }
}

// ---------------------------------------------------------------------------
// Income
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomeVerificationStatus {
    Verified,
    Unverified,
    Failed,
}

impl IncomeVerificationStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "verified" => Some(Self::Verified),
            "unverified" => Some(Self::Unverified),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Unverified => "unverified",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeAnalysis {
    pub income_adequate: bool,
    pub income_stable: bool,
    pub employment_stable: bool,
    pub income_variance: f64,
    pub income_variance_percent: f64,
    pub risk_factors: Vec<&'static str>,
    pub positive_factors: Vec<&'static str>,
    pub recommendations: Vec<String>,
    pub verification_score: f64,
}

pub fn analyze_income(
    status: IncomeVerificationStatus,
    stated_annual_income: f64,
    verified_annual_income: f64,
    employment_months: i64,
) -> IncomeAnalysis {
    let mut analysis = IncomeAnalysis {
        income_adequate: false,
        income_stable: false,
        employment_stable: false,
        income_variance: 0.0,
        income_variance_percent: 0.0,
        risk_factors: Vec::new(),
        positive_factors: Vec::new(),
        recommendations: Vec::new(),
        verification_score: 0.0,
    };

    if status != IncomeVerificationStatus::Verified {
        analysis.risk_factors.push("income_not_verified");
        analysis
            .recommendations
            .push("Manual income verification required".to_string());
        return analysis;
    }

    let variance = verified_annual_income - stated_annual_income;
    analysis.income_variance = round_to(variance, 2);
    if stated_annual_income > 0.0 {
        analysis.income_variance_percent = round_to(variance / stated_annual_income * 100.0, 2);
    }

    if verified_annual_income >= MIN_ANNUAL_INCOME {
        analysis.income_adequate = true;
        analysis.positive_factors.push("adequate_income");
    } else {
        analysis.risk_factors.push("insufficient_income");
        analysis.recommendations.push(format!(
            "Income of ${verified_annual_income:.0} is below minimum requirement of ${MIN_ANNUAL_INCOME:.0}"
        ));
    }

    let variance_percent = analysis.income_variance_percent.abs();
    if variance_percent <= 10.0 {
        analysis.income_stable = true;
        analysis.positive_factors.push("stable_income");
    } else if variance_percent <= 25.0 {
        analysis.risk_factors.push("moderate_income_variance");
    } else {
        analysis.risk_factors.push("high_income_variance");
        analysis.recommendations.push(
            "Large variance between stated and verified income requires explanation".to_string(),
        );
    }

    if employment_months >= 24 {
        analysis.employment_stable = true;
        analysis.positive_factors.push("stable_employment");
    } else if employment_months >= 6 {
        analysis.risk_factors.push("moderate_employment_duration");
    } else {
        analysis.risk_factors.push("short_employment_duration");
        analysis.recommendations.push(
            "Short employment duration may require additional verification".to_string(),
        );
    }

    let mut score: f64 = 40.0;
    for passed in [
        analysis.income_adequate,
        analysis.income_stable,
        analysis.employment_stable,
    ] {
        if passed {
            score += 20.0;
        }
    }
    analysis.verification_score = score;
    analysis
}

fn employment_duration(months: i64) -> String {
    let (years, months) = (months / 12, months % 12);
    if years > 0 {
        format!("{years} years {months} months")
    } else {
        format!("{months} months")
    }
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicantProfile {
    pub loan_amount: f64,
    pub annual_income: f64,
    pub monthly_debt: f64,
    pub employment_status: String,
    /// `None` until income verification has run
    pub income_status: Option<IncomeVerificationStatus>,
}

impl ApplicantProfile {
    pub fn from_payload(input: &TaskPayload) -> Result<Self> {
        let income_status = match input.optional_str("incomeVerificationStatus")? {
            Some(raw) => Some(parse_income_status(raw)?),
            None => input.optional_bool("incomeVerified")?.map(|verified| {
                if verified {
                    IncomeVerificationStatus::Verified
                } else {
                    IncomeVerificationStatus::Unverified
                }
            }),
        };

        Ok(Self {
            loan_amount: input.require_f64("loanAmount")?,
            annual_income: input.require_f64("annualIncome")?,
            monthly_debt: input.optional_f64("monthlyDebt")?.unwrap_or(0.0),
            employment_status: input
                .optional_str("employmentStatus")?
                .unwrap_or_default()
                .to_string(),
            income_status,
        })
    }

    pub fn dti(&self) -> f64 {
        dti_ratio(self.annual_income, self.monthly_debt)
    }
}

fn parse_income_status(raw: &str) -> Result<IncomeVerificationStatus> {
    IncomeVerificationStatus::parse(raw).ok_or_else(|| {
        LoanflowError::validation(format!(
            "income verification status must be verified, unverified or failed, got {raw}"
        ))
    })
}

pub fn income_risk_score(applicant: &ApplicantProfile) -> f64 {
    let mut score: f64 = if applicant.annual_income < 25_000.0 {
        40.0
    } else if applicant.annual_income < 40_000.0 {
        20.0
    } else if applicant.annual_income < 60_000.0 {
        10.0
    } else {
        0.0
    };

    score += match applicant.employment_status.as_str() {
        "unemployed" => 50.0,
        "part_time" => 30.0,
        "self_employed" => 20.0,
        "retired" => 15.0,
        _ => 0.0,
    };

    score += match applicant.income_status {
        Some(IncomeVerificationStatus::Failed) => 30.0,
        Some(IncomeVerificationStatus::Unverified) => 20.0,
        _ => 0.0,
    };
    score.min(100.0)
}

pub fn debt_risk_score(dti: f64) -> f64 {
    if dti > 0.5 {
        80.0
    } else if dti > 0.43 {
        60.0
    } else if dti > 0.36 {
        40.0
    } else if dti > 0.28 {
        20.0
    } else {
        10.0
    }
}

pub fn fraud_risk_score(applicant: &ApplicantProfile) -> f64 {
    if applicant.annual_income <= 0.0 {
        return 0.0;
    }
    let loan_to_income = applicant.loan_amount / applicant.annual_income;
    if loan_to_income > 2.0 {
        20.0
    } else if loan_to_income > 1.0 {
        10.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScores {
    pub credit: f64,
    pub income: f64,
    pub debt: f64,
    pub fraud: f64,
    /// Weighted 40/30/20/10
    pub overall: f64,
}

impl RiskScores {
    pub fn new(credit: f64, income: f64, debt: f64, fraud: f64) -> Self {
        Self {
            credit,
            income,
            debt,
            fraud,
            overall: round_to(credit * 0.4 + income * 0.3 + debt * 0.2 + fraud * 0.1, 2),
        }
    }

    fn primary_drivers(&self) -> Vec<&'static str> {
        let mut drivers = Vec::new();
        if self.credit > 40.0 {
            drivers.push("credit_profile");
        }
        if self.income > 30.0 {
            drivers.push("income_stability");
        }
        if self.debt > 40.0 {
            drivers.push("debt_burden");
        }
        if self.fraud > 20.0 {
            drivers.push("fraud_indicators");
        }
        drivers
    }

    fn additional_requirements(&self) -> Vec<&'static str> {
        let mut requirements = Vec::new();
        if self.income > 30.0 {
            requirements.push("Additional income documentation");
        }
        if self.credit > 50.0 {
            requirements.push("Explanation of credit issues");
        }
        if self.debt > 40.0 {
            requirements.push("Debt consolidation plan");
        }
        requirements
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactor {
    pub factor_id: &'static str,
    pub factor_type: &'static str,
    pub description: String,
    pub impact: &'static str,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnderwritingRiskAssessment {
    pub scores: RiskScores,
    pub level: UnderwritingRisk,
    pub probability_of_default: f64,
    pub risk_factors: Vec<RiskFactor>,
    pub mitigating_factors: Vec<RiskFactor>,
}

pub fn assess_underwriting_risk(
    applicant: &ApplicantProfile,
    credit: &CreditProfile,
) -> UnderwritingRiskAssessment {
    let dti = applicant.dti();
    let scores = RiskScores::new(
        credit_risk_score(credit),
        income_risk_score(applicant),
        debt_risk_score(dti),
        fraud_risk_score(applicant),
    );
    let level = UnderwritingRisk::from_score(scores.overall);
    let probability_of_default = round_to((scores.overall / 100.0 * 0.3).min(0.3), 4);

    let mut risk_factors = Vec::new();
    if credit.credit_score < 620 {
        risk_factors.push(RiskFactor {
            factor_id: "low_credit_score",
            factor_type: "credit",
            description: format!("Credit score {} below preferred range", credit.credit_score),
            impact: "high",
            score: scores.credit,
        });
    }
    if credit.credit_utilization > 0.7 {
        risk_factors.push(RiskFactor {
            factor_id: "high_credit_utilization",
            factor_type: "credit",
            description: format!(
                "Credit utilization {:.1}% is high",
                credit.credit_utilization * 100.0
            ),
            impact: "medium",
            score: 20.0,
        });
    }
    if applicant.annual_income < 35_000.0 {
        risk_factors.push(RiskFactor {
            factor_id: "low_income",
            factor_type: "income",
            description: format!(
                "Annual income ${:.0} below preferred range",
                applicant.annual_income
            ),
            impact: "medium",
            score: scores.income,
        });
    }
    if dti > 0.4 {
        risk_factors.push(RiskFactor {
            factor_id: "high_dti_ratio",
            factor_type: "debt",
            description: format!("Debt-to-income ratio {:.1}% is high", dti * 100.0),
            impact: "high",
            score: scores.debt,
        });
    }

    let mut mitigating_factors = Vec::new();
    if credit.credit_score >= 750 {
        mitigating_factors.push(RiskFactor {
            factor_id: "excellent_credit_score",
            factor_type: "credit",
            description: format!("Excellent credit score of {}", credit.credit_score),
            impact: "high",
            score: 10.0,
        });
    }
    if credit.on_time_payments > 20 {
        mitigating_factors.push(RiskFactor {
            factor_id: "strong_payment_history",
            factor_type: "credit",
            description: "Strong payment history with minimal late payments".to_string(),
            impact: "medium",
            score: 5.0,
        });
    }
    if applicant.income_status == Some(IncomeVerificationStatus::Verified) {
        mitigating_factors.push(RiskFactor {
            factor_id: "verified_income",
            factor_type: "income",
            description: "Income successfully verified through documentation".to_string(),
            impact: "medium",
            score: 5.0,
        });
    }

    UnderwritingRiskAssessment {
        scores,
        level,
        probability_of_default,
        risk_factors,
        mitigating_factors,
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Conditional,
    ManualReview,
    Denied,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Conditional => "conditional",
            Self::ManualReview => "manual_review",
            Self::Denied => "denied",
        }
    }
}

/// Hard limits an application must meet before risk is considered
#[derive(Debug, Clone, PartialEq)]
pub struct UnderwritingPolicy {
    pub min_credit_score: i64,
    pub max_dti_ratio: f64,
    pub min_annual_income: f64,
    pub min_loan_amount: f64,
    pub max_loan_amount: f64,
    pub version: &'static str,
}

impl Default for UnderwritingPolicy {
    fn default() -> Self {
        Self {
            min_credit_score: MIN_CREDIT_SCORE,
            max_dti_ratio: MAX_DTI_RATIO,
            min_annual_income: MIN_ANNUAL_INCOME,
            min_loan_amount: MIN_LOAN_AMOUNT,
            max_loan_amount: MAX_LOAN_AMOUNT,
            version: POLICY_VERSION,
        }
    }
}

impl UnderwritingPolicy {
    pub fn violations(&self, request: &DecisionRequest) -> Vec<DecisionReason> {
        let mut violations = Vec::new();
        let mut violate = |code: &str, description: String| {
            violations.push(DecisionReason::new(code, "denial", description));
        };

        if request.credit_score < self.min_credit_score {
            violate(
                "min_credit_score",
                format!(
                    "Credit score {} below minimum {}",
                    request.credit_score, self.min_credit_score
                ),
            );
        }
        let dti = request.dti();
        if dti > self.max_dti_ratio {
            violate(
                "max_dti_ratio",
                format!(
                    "DTI ratio {:.1}% exceeds maximum {:.1}%",
                    dti * 100.0,
                    self.max_dti_ratio * 100.0
                ),
            );
        }
        if request.annual_income < self.min_annual_income {
            violate(
                "min_annual_income",
                format!(
                    "Annual income ${:.0} below minimum ${:.0}",
                    request.annual_income, self.min_annual_income
                ),
            );
        }
        if request.loan_amount > self.max_loan_amount {
            violate(
                "max_loan_amount",
                format!(
                    "Loan amount ${:.0} exceeds maximum ${:.0}",
                    request.loan_amount, self.max_loan_amount
                ),
            );
        }
        if request.loan_amount < self.min_loan_amount {
            violate(
                "min_loan_amount",
                format!(
                    "Loan amount ${:.0} below minimum ${:.0}",
                    request.loan_amount, self.min_loan_amount
                ),
            );
        }
        violations
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionReason {
    pub reason_code: String,
    pub reason_type: &'static str,
    pub description: String,
}

impl DecisionReason {
    fn new(code: &str, reason_type: &'static str, description: impl Into<String>) -> Self {
        Self {
            reason_code: code.to_string(),
            reason_type,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub condition_id: String,
    pub condition_type: &'static str,
    pub description: String,
    pub priority: &'static str,
    pub status: &'static str,
    pub due_date: String,
}

impl Condition {
    fn prior_to_funding(
        condition_id: String,
        description: String,
        priority: &'static str,
        due_in_days: i64,
    ) -> Self {
        Self {
            condition_id,
            condition_type: "prior_to_funding",
            description,
            priority,
            status: "pending",
            due_date: (Utc::now() + Duration::days(due_in_days)).to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterOffer {
    pub offered_amount: f64,
    pub offered_term: i64,
    pub offered_rate: f64,
    pub offered_apr: f64,
    pub monthly_payment: f64,
    pub offer_reason: &'static str,
    pub offer_conditions: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    pub loan_amount: f64,
    pub requested_term: i64,
    pub annual_income: f64,
    pub monthly_debt: f64,
    pub credit_score: i64,
    pub risk_level: UnderwritingRisk,
    pub income_verified: bool,
    /// `(factorId, description)` of the high-impact risk factors
    pub high_impact_factors: Vec<(String, String)>,
}

impl DecisionRequest {
    pub fn from_payload(input: &TaskPayload) -> Result<Self> {
        let raw_risk = input.require_str("riskLevel")?;
        let risk_level = UnderwritingRisk::parse(raw_risk).ok_or_else(|| {
            LoanflowError::validation(format!(
                "riskLevel must be low, medium, high or critical, got {raw_risk}"
            ))
        })?;

        let mut high_impact_factors = Vec::new();
        for item in input
            .optional_array("riskFactors")?
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let Value::Object(map) = item else {
                return Err(LoanflowError::validation("riskFactors entries must be objects"));
            };
            let factor = TaskPayload::from(map.clone());
            if factor.optional_str("impact")? == Some("high") {
                high_impact_factors.push((
                    factor.require_str("factorId")?.to_string(),
                    factor
                        .optional_str("description")?
                        .unwrap_or_default()
                        .to_string(),
                ));
            }
        }

        Ok(Self {
            loan_amount: input.require_f64("loanAmount")?,
            requested_term: input.require_i64("requestedTerm")?,
            annual_income: input.require_f64("annualIncome")?,
            monthly_debt: input.optional_f64("monthlyDebt")?.unwrap_or(0.0),
            credit_score: input.require_i64("creditScore")?,
            risk_level,
            income_verified: input.optional_bool("incomeVerified")?.unwrap_or(false),
            high_impact_factors,
        })
    }

    pub fn dti(&self) -> f64 {
        dti_ratio(self.annual_income, self.monthly_debt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnderwritingOutcome {
    pub decision: Decision,
    pub approved_amount: f64,
    pub approved_term: i64,
    pub interest_rate: f64,
    pub apr: f64,
    pub monthly_payment: f64,
    pub total_payment: f64,
    pub total_interest: f64,
    pub conditions: Vec<Condition>,
    pub reasons: Vec<DecisionReason>,
    pub counter_offer: Option<CounterOffer>,
    pub manual_review_required: bool,
}

impl UnderwritingOutcome {
    fn without_offer(decision: Decision, reasons: Vec<DecisionReason>) -> Self {
        Self {
            decision,
            approved_amount: 0.0,
            approved_term: 0,
            interest_rate: 0.0,
            apr: 0.0,
            monthly_payment: 0.0,
            total_payment: 0.0,
            total_interest: 0.0,
            conditions: Vec::new(),
            reasons,
            counter_offer: None,
            manual_review_required: decision == Decision::ManualReview,
        }
    }

    fn with_offer(
        request: &DecisionRequest,
        decision: Decision,
        conditions: Vec<Condition>,
        reason: DecisionReason,
    ) -> Self {
        let rate = interest_rate(request.credit_score, request.risk_level);
        let payment = monthly_payment(request.loan_amount, rate, request.requested_term);
        let total_payment = round_to(payment * request.requested_term as f64, 2);
        Self {
            decision,
            approved_amount: request.loan_amount,
            approved_term: request.requested_term,
            interest_rate: rate,
            apr: round_to(rate + APR_MARGIN, 2),
            monthly_payment: payment,
            total_payment,
            total_interest: round_to(total_payment - request.loan_amount, 2),
            conditions,
            reasons: vec![reason],
            counter_offer: None,
            manual_review_required: false,
        }
    }

    /// Lifecycle state the workflow should move the application to
    pub fn next_state(&self) -> ApplicationState {
        match self.decision {
            Decision::Denied => ApplicationState::Denied,
            _ if self.manual_review_required => ApplicationState::ManualReview,
            Decision::Approved | Decision::Conditional => ApplicationState::Approved,
            Decision::ManualReview => ApplicationState::ManualReview,
        }
    }
}

/// Annual rate in percent from the credit score band, adjusted for risk
pub fn interest_rate(credit_score: i64, risk: UnderwritingRisk) -> f64 {
    let base: f64 = match credit_score {
        s if s >= 800 => 5.5,
        s if s >= 740 => 6.5,
        s if s >= 670 => 8.0,
        s if s >= 620 => 12.0,
        _ => 18.0,
    };
    let adjustment: f64 = match risk {
        UnderwritingRisk::Low => -0.5,
        UnderwritingRisk::Medium => 0.0,
        UnderwritingRisk::High => 2.0,
        UnderwritingRisk::Critical => 5.0,
    };
    round_to((base + adjustment).clamp(MIN_INTEREST_RATE, MAX_INTEREST_RATE), 2)
}

/// Fully amortizing payment; `annual_rate` is in percent
pub fn monthly_payment(principal: f64, annual_rate: f64, term_months: i64) -> f64 {
    if principal <= 0.0 || term_months <= 0 {
        return 0.0;
    }
    let monthly_rate = annual_rate / 12.0 / 100.0;
    if monthly_rate <= 0.0 {
        return round_to(principal / term_months as f64, 2);
    }
    let growth = (1.0 + monthly_rate).powi(term_months as i32);
    round_to(principal * monthly_rate * growth / (growth - 1.0), 2)
}

fn counter_offer(request: &DecisionRequest, policy: &UnderwritingPolicy) -> Option<CounterOffer> {
    let offered_amount = round_to(request.loan_amount * 0.7, 2);
    if offered_amount < policy.min_loan_amount {
        return None;
    }
    let offered_rate = round_to(
        (interest_rate(request.credit_score, request.risk_level) + 2.0).min(MAX_INTEREST_RATE),
        2,
    );
    Some(CounterOffer {
        offered_amount,
        offered_term: request.requested_term,
        offered_rate,
        offered_apr: round_to(offered_rate + APR_MARGIN, 2),
        monthly_payment: monthly_payment(offered_amount, offered_rate, request.requested_term),
        offer_reason: "Reduced amount to mitigate risk",
        offer_conditions: vec!["Additional income verification required"],
    })
}

/// Policy limits first, then the risk grade, then the income verification gate
pub fn decide(request: &DecisionRequest, policy: &UnderwritingPolicy) -> UnderwritingOutcome {
    let violations = policy.violations(request);
    if !violations.is_empty() {
        return UnderwritingOutcome::without_offer(Decision::Denied, violations);
    }

    let mut outcome = match request.risk_level {
        UnderwritingRisk::Low => UnderwritingOutcome::with_offer(
            request,
            Decision::Approved,
            Vec::new(),
            DecisionReason::new(
                "low_risk_approval",
                "approval",
                "Application meets all requirements for standard approval",
            ),
        ),
        UnderwritingRisk::Medium => {
            let conditions = request
                .high_impact_factors
                .iter()
                .map(|(factor_id, description)| {
                    Condition::prior_to_funding(
                        format!("{factor_id}_condition"),
                        format!("Address {description}"),
                        "high",
                        14,
                    )
                })
                .collect();
            UnderwritingOutcome::with_offer(
                request,
                Decision::Conditional,
                conditions,
                DecisionReason::new(
                    "conditional_approval",
                    "approval",
                    "Application approved subject to conditions",
                ),
            )
        }
        UnderwritingRisk::High => UnderwritingOutcome::without_offer(
            Decision::ManualReview,
            vec![DecisionReason::new(
                "manual_review_required",
                "condition",
                "Application requires manual underwriter review due to elevated risk",
            )],
        ),
        UnderwritingRisk::Critical => {
            let mut outcome = UnderwritingOutcome::without_offer(
                Decision::Denied,
                vec![DecisionReason::new(
                    "high_risk_denial",
                    "denial",
                    "Application denied due to high risk profile",
                )],
            );
            outcome.counter_offer = counter_offer(request, policy);
            outcome
        }
    };

    if !request.income_verified {
        outcome.manual_review_required = true;
        outcome.conditions.push(Condition::prior_to_funding(
            "income_verification_required".to_string(),
            "Income verification must be completed".to_string(),
            "critical",
            7,
        ));
    }
    outcome
}

// ---------------------------------------------------------------------------
// Task operations
// ---------------------------------------------------------------------------

fn applicant_ids(input: &TaskPayload) -> Result<(&str, &str)> {
    Ok((
        input.require_str(payload_keys::APPLICATION_ID)?,
        input.require_str(payload_keys::USER_ID)?,
    ))
}

pub fn credit_check(input: &TaskPayload) -> Result<TaskPayload> {
    let (application_id, user_id) = applicant_ids(input)?;
    let supplied = CreditProfile::from_payload(input)?;
    let standard_profile = supplied.is_none();
    let profile = supplied.unwrap_or_default();

    let risk_score = credit_risk_score(&profile);
    let risk_level = UnderwritingRisk::from_score(risk_score);
    let decision = evaluate_credit(&profile, risk_level);

    info!(
        application_id = %application_id,
        credit_score = profile.credit_score,
        risk_level = risk_level.as_str(),
        approved = decision.approved,
        manual_review = decision.manual_review,
        standard_profile,
        "Credit check completed"
    );

    Ok(TaskPayload::new()
        .with("success", true)
        .with("applicationId", application_id)
        .with("userId", user_id)
        .with("creditScore", profile.credit_score)
        .with("creditScoreRange", profile.score_range())
        .with("creditUtilization", profile.credit_utilization)
        .with(
            "paymentHistory",
            json!({
                "onTimePayments": profile.on_time_payments,
                "latePayments30": profile.late_payments_30,
                "latePayments60": profile.late_payments_60,
                "latePayments90": profile.late_payments_90,
            }),
        )
        .with("derogatoryCount", profile.derogatory_count)
        .with(
            "riskAnalysis",
            json!({"riskLevel": risk_level.as_str(), "riskScore": risk_score}),
        )
        .with("creditDecision", json!(decision))
        .with("standardProfile", standard_profile)
        .with("completedAt", Utc::now().to_rfc3339()))
}

pub fn income_verification(input: &TaskPayload) -> Result<TaskPayload> {
    let (application_id, user_id) = applicant_ids(input)?;
    let stated_annual_income = input.require_f64("annualIncome")?;
    let method = input
        .optional_str("verificationMethod")?
        .filter(|m| !m.trim().is_empty())
        .unwrap_or("automated_verification");
    let status = match input.optional_str("verificationStatus")? {
        Some(raw) => parse_income_status(raw)?,
        None => IncomeVerificationStatus::Verified,
    };
    let verified_annual_income = match status {
        IncomeVerificationStatus::Verified => match input.optional_f64("verifiedAnnualIncome")? {
            Some(income) => income,
            None => round_to(stated_annual_income * STANDARD_INCOME_UPLIFT, 2),
        },
        _ => 0.0,
    };
    let employment_months = input
        .optional_i64("employmentMonths")?
        .unwrap_or(STANDARD_EMPLOYMENT_MONTHS);

    let analysis = analyze_income(
        status,
        stated_annual_income,
        verified_annual_income,
        employment_months,
    );

    info!(
        application_id = %application_id,
        verification_status = status.as_str(),
        stated_income = stated_annual_income,
        verified_income = verified_annual_income,
        verification_score = analysis.verification_score,
        "Income verification completed"
    );

    Ok(TaskPayload::new()
        .with("success", true)
        .with("applicationId", application_id)
        .with("userId", user_id)
        .with(
            "incomeVerification",
            json!({
                "verificationStatus": status.as_str(),
                "verificationMethod": method,
                "statedAnnualIncome": stated_annual_income,
                "verifiedAnnualIncome": verified_annual_income,
                "verifiedMonthlyIncome": round_to(verified_annual_income / 12.0, 2),
                "employmentMonths": employment_months,
                "employmentDuration": employment_duration(employment_months),
            }),
        )
        .with("incomeAnalysis", json!(analysis))
        .with("incomeVerified", status == IncomeVerificationStatus::Verified)
        .with("completedAt", Utc::now().to_rfc3339()))
}

pub fn risk_assessment(input: &TaskPayload) -> Result<TaskPayload> {
    let (application_id, user_id) = applicant_ids(input)?;
    let applicant = ApplicantProfile::from_payload(input)?;
    let credit = CreditProfile::from_payload(input)?.unwrap_or_default();
    let assessment = assess_underwriting_risk(&applicant, &credit);
    let level = assessment.level;
    let scores = assessment.scores;

    info!(
        application_id = %application_id,
        overall_risk_level = level.as_str(),
        risk_score = scores.overall,
        probability_of_default = assessment.probability_of_default,
        "Risk assessment completed"
    );

    let mitigators: Vec<&str> = assessment
        .mitigating_factors
        .iter()
        .map(|factor| factor.factor_type)
        .collect();
    let monitoring_required = level >= UnderwritingRisk::Medium;

    Ok(TaskPayload::new()
        .with("success", true)
        .with("applicationId", application_id)
        .with("userId", user_id)
        .with(
            "riskAssessment",
            json!({
                "overallRiskLevel": level.as_str(),
                "riskScore": scores.overall,
                "creditRiskScore": scores.credit,
                "incomeRiskScore": scores.income,
                "debtRiskScore": scores.debt,
                "fraudRiskScore": scores.fraud,
                "probabilityOfDefault": assessment.probability_of_default,
                "recommendedAction": level.recommended_action(),
                "confidenceLevel": CONFIDENCE_LEVEL,
                "modelVersion": MODEL_VERSION,
            }),
        )
        .with("riskLevel", level.as_str())
        .with("creditScore", credit.credit_score)
        .with("riskFactors", json!(assessment.risk_factors))
        .with("mitigatingFactors", json!(assessment.mitigating_factors))
        .with(
            "riskAnalysis",
            json!({
                "riskCategory": level.category(),
                "primaryRiskDrivers": scores.primary_drivers(),
                "riskMitigators": mitigators,
                "riskRecommendations": level.recommendations(),
                "additionalRequirements": scores.additional_requirements(),
                "monitoringRequired": monitoring_required,
            }),
        )
        .with("completedAt", Utc::now().to_rfc3339()))
}

pub fn underwriting_decision(input: &TaskPayload) -> Result<TaskPayload> {
    let (application_id, user_id) = applicant_ids(input)?;
    let request = DecisionRequest::from_payload(input)?;
    let policy = UnderwritingPolicy::default();
    let outcome = decide(&request, &policy);
    let next_state = outcome.next_state();

    info!(
        application_id = %application_id,
        decision = outcome.decision.as_str(),
        approved_amount = outcome.approved_amount,
        interest_rate = outcome.interest_rate,
        manual_review = outcome.manual_review_required,
        next_state = next_state.as_str(),
        "Underwriting decision completed"
    );

    let automated_decision = !outcome.manual_review_required;
    let offer_expiration = (Utc::now() + Duration::days(7)).to_rfc3339();
    let dti = request.dti();

    Ok(TaskPayload::new()
        .with("success", true)
        .with("applicationId", application_id)
        .with("userId", user_id)
        .with(
            "underwritingResult",
            json!({
                "decision": outcome.decision.as_str(),
                "approvedAmount": outcome.approved_amount,
                "approvedTerm": outcome.approved_term,
                "interestRate": outcome.interest_rate,
                "apr": outcome.apr,
                "monthlyPayment": outcome.monthly_payment,
                "totalInterest": outcome.total_interest,
                "totalPayment": outcome.total_payment,
                "automatedDecision": automated_decision,
                "manualReviewRequired": outcome.manual_review_required,
                "offerExpirationDate": offer_expiration,
                "policyVersion": policy.version,
                "modelVersion": MODEL_VERSION,
            }),
        )
        .with("decision", outcome.decision.as_str())
        .with("nextState", next_state.as_str())
        .with("conditions", json!(outcome.conditions))
        .with("decisionReasons", json!(outcome.reasons))
        .with("counterOffer", json!(outcome.counter_offer))
        .with(
            "inputSummary",
            json!({
                "requestedAmount": request.loan_amount,
                "requestedTerm": request.requested_term,
                "creditScore": request.credit_score,
                "riskLevel": request.risk_level.as_str(),
                "incomeVerified": request.income_verified,
                "dtiRatio": dti,
            }),
        )
        .with("completedAt", Utc::now().to_rfc3339()))
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    CreditCheck,
    IncomeVerification,
    RiskAssessment,
    UnderwritingDecision,
    UpdateState,
}

impl Operation {
    fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name
            .strip_suffix("_task")
            .or_else(|| name.strip_suffix("_ref"))
            .unwrap_or(name);
        match name {
            task_types::CREDIT_CHECK => Some(Self::CreditCheck),
            task_types::INCOME_VERIFICATION => Some(Self::IncomeVerification),
            task_types::RISK_ASSESSMENT => Some(Self::RiskAssessment),
            task_types::UNDERWRITING_DECISION => Some(Self::UnderwritingDecision),
            "update_state" | task_types::UPDATE_APPLICATION_STATE => Some(Self::UpdateState),
            _ => None,
        }
    }
}

fn resolve_operation(input: &TaskPayload) -> Result<Operation> {
    let mut requested = None;
    for key in OPERATION_KEYS {
        let Some(name) = input.optional_str(key)? else {
            continue;
        };
        if let Some(operation) = Operation::parse(name) {
            return Ok(operation);
        }
        if requested.is_none() && !name.trim().is_empty() {
            requested = Some(name);
        }
    }
    Err(LoanflowError::UnknownTaskType(
        requested.unwrap_or_default().to_string(),
    ))
}

#[derive(Debug, Clone)]
pub struct UnderwritingTaskHandler {
    state_machine: ApplicationStateMachine,
}

impl UnderwritingTaskHandler {
    pub fn new(state_machine: ApplicationStateMachine) -> Self {
        Self { state_machine }
    }
}

#[async_trait]
impl TaskHandler for UnderwritingTaskHandler {
    async fn execute(
        &self,
        _ctx: &HandlerContext,
        input: &TaskPayload,
    ) -> Result<Option<TaskPayload>> {
        let operation = resolve_operation(input)?;
        debug!(?operation, "Executing underwriting task");

        let output = match operation {
            Operation::CreditCheck => credit_check(input)?,
            Operation::IncomeVerification => income_verification(input)?,
            Operation::RiskAssessment => risk_assessment(input)?,
            Operation::UnderwritingDecision => underwriting_decision(input)?,
            Operation::UpdateState => update_application_state(&self.state_machine, input).await?,
        };
        Ok(Some(output))
    }

    fn name(&self) -> &str {
        "underwriting"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> UnderwritingTaskHandler {
        UnderwritingTaskHandler::new(ApplicationStateMachine::simulation())
    }

    async fn run(input: TaskPayload) -> Result<TaskPayload> {
        handler()
            .execute(&HandlerContext::default(), &input)
            .await
            .map(|o| o.unwrap())
    }

    fn applicant(reference: &str) -> TaskPayload {
        TaskPayload::new()
            .with("referenceTaskName", reference)
            .with("applicationId", "A1")
            .with("userId", "U1")
    }

    fn decision_request(risk_level: UnderwritingRisk, income_verified: bool) -> DecisionRequest {
        DecisionRequest {
            loan_amount: 20_000.0,
            requested_term: 36,
            annual_income: 120_000.0,
            monthly_debt: 1_000.0,
            credit_score: 720,
            risk_level,
            income_verified,
            high_impact_factors: Vec::new(),
        }
    }

    #[test]
    fn test_risk_grade_thresholds() {
        assert_eq!(UnderwritingRisk::from_score(39.99), UnderwritingRisk::Low);
        assert_eq!(UnderwritingRisk::from_score(40.0), UnderwritingRisk::Medium);
        assert_eq!(UnderwritingRisk::from_score(60.0), UnderwritingRisk::High);
        assert_eq!(UnderwritingRisk::from_score(80.0), UnderwritingRisk::Critical);
        assert_eq!(UnderwritingRisk::parse("HIGH"), Some(UnderwritingRisk::High));
        assert_eq!(UnderwritingRisk::parse("severe"), None);
    }

    #[tokio::test]
    async fn test_credit_check_with_standard_profile() {
        let output = run(applicant("credit_check_task")).await.unwrap();

        assert_eq!(output.require_i64("creditScore").unwrap(), 720);
        assert_eq!(output.require_str("creditScoreRange").unwrap(), "good");
        assert!(output.require_bool("standardProfile").unwrap());

        let risk = TaskPayload::from(output.optional_object("riskAnalysis").unwrap().unwrap().clone());
        // 20 for the score band, 3 late payments at 3 each
        assert_eq!(risk.require_f64("riskScore").unwrap(), 29.0);
        assert_eq!(risk.require_str("riskLevel").unwrap(), "low");

        let decision =
            TaskPayload::from(output.optional_object("creditDecision").unwrap().unwrap().clone());
        assert!(decision.require_bool("approved").unwrap());
        assert!(!decision.require_bool("manualReview").unwrap());
    }

    #[test]
    fn test_credit_decision_rules() {
        let low_score = CreditProfile {
            credit_score: 560,
            ..Default::default()
        };
        let decision = evaluate_credit(&low_score, UnderwritingRisk::Medium);
        assert!(!decision.approved);
        assert!(!decision.manual_review);
        assert!(decision.reason.contains("below minimum requirement of 580"));

        let bankrupt = CreditProfile {
            bankruptcies: 1,
            derogatory_count: 1,
            ..Default::default()
        };
        let decision = evaluate_credit(&bankrupt, UnderwritingRisk::Low);
        assert!(!decision.approved);
        assert!(decision.manual_review);

        let late = CreditProfile {
            late_payments_30: 4,
            late_payments_60: 2,
            ..Default::default()
        };
        let decision = evaluate_credit(&late, UnderwritingRisk::Low);
        assert_eq!(decision.reason, "Too many recent late payments: 6");
    }

    #[test]
    fn test_credit_profile_requires_score() {
        let input = TaskPayload::new().with("creditProfile", json!({"creditUtilization": 0.4}));
        let err = CreditProfile::from_payload(&input).unwrap_err();
        assert!(matches!(err, LoanflowError::Validation(msg) if msg.contains("creditScore")));

        let input = TaskPayload::new().with(
            "creditProfile",
            json!({"creditScore": 690, "bankruptcies": 1, "collections": 2}),
        );
        let profile = CreditProfile::from_payload(&input).unwrap().unwrap();
        assert_eq!(profile.derogatory_count, 3);
        assert_eq!(profile.recent_late_payments(), 0);
    }

    #[tokio::test]
    async fn test_income_verification_defaults_to_verified() {
        let output = run(applicant("income_verification").with("annualIncome", 80_000.0))
            .await
            .unwrap();
        assert!(output.require_bool("incomeVerified").unwrap());

        let analysis =
            TaskPayload::from(output.optional_object("incomeAnalysis").unwrap().unwrap().clone());
        assert_eq!(analysis.require_f64("incomeVariancePercent").unwrap(), 2.5);
        assert_eq!(analysis.require_f64("verificationScore").unwrap(), 100.0);
    }

    #[test]
    fn test_income_analysis_flags() {
        let analysis = analyze_income(IncomeVerificationStatus::Verified, 60_000.0, 42_000.0, 3);
        assert!(analysis.income_adequate);
        assert!(!analysis.income_stable);
        assert_eq!(
            analysis.risk_factors,
            vec!["high_income_variance", "short_employment_duration"]
        );
        assert_eq!(analysis.verification_score, 60.0);

        let analysis = analyze_income(IncomeVerificationStatus::Failed, 60_000.0, 0.0, 36);
        assert_eq!(analysis.risk_factors, vec!["income_not_verified"]);
        assert_eq!(analysis.verification_score, 0.0);
    }

    #[test]
    fn test_strong_applicant_is_low_risk() {
        let applicant = ApplicantProfile {
            loan_amount: 20_000.0,
            annual_income: 120_000.0,
            monthly_debt: 1_000.0,
            employment_status: "employed".to_string(),
            income_status: Some(IncomeVerificationStatus::Verified),
        };
        let assessment = assess_underwriting_risk(&applicant, &CreditProfile::default());

        assert_eq!(assessment.scores.overall, 13.6);
        assert_eq!(assessment.level, UnderwritingRisk::Low);
        assert!(assessment.risk_factors.is_empty());
        let mitigating: Vec<_> = assessment.mitigating_factors.iter().map(|f| f.factor_id).collect();
        assert_eq!(mitigating, vec!["strong_payment_history", "verified_income"]);
    }

    #[test]
    fn test_weak_applicant_is_critical() {
        let applicant = ApplicantProfile {
            loan_amount: 40_000.0,
            annual_income: 30_000.0,
            monthly_debt: 1_500.0,
            employment_status: "unemployed".to_string(),
            income_status: Some(IncomeVerificationStatus::Failed),
        };
        let credit = CreditProfile {
            credit_score: 550,
            credit_utilization: 0.9,
            on_time_payments: 10,
            late_payments_30: 3,
            late_payments_60: 0,
            late_payments_90: 0,
            bankruptcies: 1,
            derogatory_count: 2,
        };
        let assessment = assess_underwriting_risk(&applicant, &credit);

        assert_eq!(assessment.scores.credit, 99.0);
        assert_eq!(assessment.scores.income, 100.0);
        assert_eq!(assessment.scores.debt, 80.0);
        assert_eq!(assessment.scores.fraud, 10.0);
        assert_eq!(assessment.scores.overall, 86.6);
        assert_eq!(assessment.level, UnderwritingRisk::Critical);
        assert_eq!(assessment.probability_of_default, 0.2598);
        let factors: Vec<_> = assessment.risk_factors.iter().map(|f| f.factor_id).collect();
        assert_eq!(
            factors,
            vec!["low_credit_score", "high_credit_utilization", "low_income", "high_dti_ratio"]
        );
    }

    #[tokio::test]
    async fn test_risk_assessment_reads_income_step_output() {
        let output = run(applicant("risk_assessment_task")
            .with("loanAmount", 20_000.0)
            .with("annualIncome", 120_000.0)
            .with("monthlyDebt", 1_000.0)
            .with("incomeVerified", false))
        .await
        .unwrap();

        // unverified income adds 20 to the income score: 11.6 + 6 + 2
        let assessment =
            TaskPayload::from(output.optional_object("riskAssessment").unwrap().unwrap().clone());
        assert_eq!(assessment.require_f64("incomeRiskScore").unwrap(), 20.0);
        assert_eq!(assessment.require_f64("riskScore").unwrap(), 19.6);
        assert_eq!(output.require_str("riskLevel").unwrap(), "low");
        assert_eq!(output.require_i64("creditScore").unwrap(), 720);
    }

    #[test]
    fn test_interest_rate_table() {
        assert_eq!(interest_rate(810, UnderwritingRisk::Low), 5.0);
        assert_eq!(interest_rate(720, UnderwritingRisk::Low), 7.5);
        assert_eq!(interest_rate(630, UnderwritingRisk::High), 14.0);
        assert_eq!(interest_rate(550, UnderwritingRisk::Critical), 23.0);
        assert_eq!(monthly_payment(12_000.0, 0.0, 12), 1_000.0);
        assert_eq!(monthly_payment(0.0, 7.5, 36), 0.0);
    }

    #[test]
    fn test_low_risk_verified_is_approved() {
        let outcome = decide(
            &decision_request(UnderwritingRisk::Low, true),
            &UnderwritingPolicy::default(),
        );
        assert_eq!(outcome.decision, Decision::Approved);
        assert_eq!(outcome.next_state(), ApplicationState::Approved);
        assert_eq!(outcome.approved_amount, 20_000.0);
        assert_eq!(outcome.interest_rate, 7.5);
        assert_eq!(outcome.apr, 8.0);
        assert!(outcome.monthly_payment > 600.0 && outcome.monthly_payment < 650.0);
        assert_eq!(
            outcome.total_interest,
            round_to(outcome.total_payment - 20_000.0, 2)
        );
        assert!(!outcome.manual_review_required);
        assert!(outcome.conditions.is_empty());
    }

    #[test]
    fn test_medium_risk_gets_conditions_from_high_impact_factors() {
        let mut request = decision_request(UnderwritingRisk::Medium, true);
        request.high_impact_factors = vec![(
            "high_dti_ratio".to_string(),
            "Debt-to-income ratio 42.0% is high".to_string(),
        )];
        let outcome = decide(&request, &UnderwritingPolicy::default());

        assert_eq!(outcome.decision, Decision::Conditional);
        assert_eq!(outcome.next_state(), ApplicationState::Approved);
        assert_eq!(outcome.conditions.len(), 1);
        assert_eq!(outcome.conditions[0].condition_id, "high_dti_ratio_condition");
        assert_eq!(
            outcome.conditions[0].description,
            "Address Debt-to-income ratio 42.0% is high"
        );
    }

    #[test]
    fn test_unverified_income_forces_manual_review() {
        let outcome = decide(
            &decision_request(UnderwritingRisk::Low, false),
            &UnderwritingPolicy::default(),
        );
        assert_eq!(outcome.decision, Decision::Approved);
        assert!(outcome.manual_review_required);
        assert_eq!(outcome.next_state(), ApplicationState::ManualReview);
        assert_eq!(outcome.conditions[0].condition_id, "income_verification_required");
        assert_eq!(outcome.conditions[0].priority, "critical");
    }

    #[test]
    fn test_policy_violations_deny_without_offer() {
        let mut request = decision_request(UnderwritingRisk::Low, false);
        request.credit_score = 550;
        request.loan_amount = 60_000.0;
        let outcome = decide(&request, &UnderwritingPolicy::default());

        assert_eq!(outcome.decision, Decision::Denied);
        assert_eq!(outcome.next_state(), ApplicationState::Denied);
        let codes: Vec<_> = outcome.reasons.iter().map(|r| r.reason_code.as_str()).collect();
        assert_eq!(codes, vec!["min_credit_score", "max_loan_amount"]);
        assert!(outcome.counter_offer.is_none());
        // denied by policy before the income gate
        assert!(outcome.conditions.is_empty());
    }

    #[test]
    fn test_critical_risk_denied_with_counter_offer() {
        let mut request = decision_request(UnderwritingRisk::Critical, true);
        request.loan_amount = 40_000.0;
        let outcome = decide(&request, &UnderwritingPolicy::default());

        assert_eq!(outcome.decision, Decision::Denied);
        let offer = outcome.counter_offer.unwrap();
        assert_eq!(offer.offered_amount, 28_000.0);
        // 8.0 for the 720 band, +5 critical, +2 counter-offer premium
        assert_eq!(offer.offered_rate, 15.0);
        assert_eq!(offer.offered_apr, 15.5);

        request.loan_amount = 6_000.0;
        let outcome = decide(&request, &UnderwritingPolicy::default());
        assert!(outcome.counter_offer.is_none());
    }

    #[tokio::test]
    async fn test_decision_task_output() {
        let output = run(applicant("underwriting_decision_task")
            .with("loanAmount", 20_000.0)
            .with("requestedTerm", 36)
            .with("annualIncome", 120_000.0)
            .with("monthlyDebt", 1_000.0)
            .with("creditScore", 720)
            .with("riskLevel", "high")
            .with("incomeVerified", true))
        .await
        .unwrap();

        assert_eq!(output.require_str("decision").unwrap(), "manual_review");
        assert_eq!(output.require_str("nextState").unwrap(), "manual_review");
        assert!(output.get("counterOffer").unwrap().is_null());
    }

    #[tokio::test]
    async fn test_decision_rejects_unknown_risk_level() {
        let err = run(applicant("underwriting_decision")
            .with("loanAmount", 20_000.0)
            .with("requestedTerm", 36)
            .with("annualIncome", 120_000.0)
            .with("creditScore", 720)
            .with("riskLevel", "severe"))
        .await
        .unwrap_err();
        assert!(matches!(err, LoanflowError::Validation(msg) if msg.contains("riskLevel")));
    }

    #[tokio::test]
    async fn test_update_state_slot_uses_state_machine() {
        let output = run(applicant("update_state_task")
            .with("fromState", "identity_verified")
            .with("toState", "underwriting"))
        .await
        .unwrap();
        assert_eq!(output.require_str("newState").unwrap(), "underwriting");
        assert!(output.require_bool("simulated").unwrap());
    }

    #[test]
    fn test_operation_resolution() {
        let input = TaskPayload::new()
            .with("taskType", "SIMPLE")
            .with("referenceTaskName", "risk_assessment_task");
        assert_eq!(resolve_operation(&input).unwrap(), Operation::RiskAssessment);

        let input = TaskPayload::new().with("taskType", "send_offer_email");
        let err = resolve_operation(&input).unwrap_err();
        assert!(matches!(err, LoanflowError::UnknownTaskType(name) if name == "send_offer_email"));
    }
}
