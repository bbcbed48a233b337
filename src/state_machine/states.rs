use serde::{Deserialize, Serialize};
use std::fmt;

/// Loan application lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    /// Created by the application service, nothing verified yet
    Initiated,
    PreQualified,
    DocumentsSubmitted,
    IdentityVerified,
    Underwriting,
    /// Underwriting could not decide automatically
    ManualReview,
    Approved,
    /// Terminal rejection
    Denied,
    DocumentsSigned,
    Funded,
    /// Loan is being serviced
    Active,
    /// Terminal, loan paid off or otherwise closed
    Closed,
}

impl ApplicationState {
    pub const ALL: [ApplicationState; 12] = [
        Self::Initiated,
        Self::PreQualified,
        Self::DocumentsSubmitted,
        Self::IdentityVerified,
        Self::Underwriting,
        Self::ManualReview,
        Self::Approved,
        Self::Denied,
        Self::DocumentsSigned,
        Self::Funded,
        Self::Active,
        Self::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::PreQualified => "pre_qualified",
            Self::DocumentsSubmitted => "documents_submitted",
            Self::IdentityVerified => "identity_verified",
            Self::Underwriting => "underwriting",
            Self::ManualReview => "manual_review",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::DocumentsSigned => "documents_signed",
            Self::Funded => "funded",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied | Self::Closed)
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApplicationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Invalid application state: {s}"))
    }
}

/// Default state for new applications
impl Default for ApplicationState {
    fn default() -> Self {
        Self::Initiated
    }
}

/// Customer-facing status, coarser than [`ApplicationState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Denied,
    Funded,
    Active,
    Closed,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Funded => "funded",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// Statuses that intermediate state changes never downgrade
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Denied | Self::Funded | Self::Active | Self::Closed
        )
    }

    /// Status after moving into `new_state`, given the status held before the move.
    ///
    /// Decision states carry their own status. Any other state promotes `draft` to
    /// `submitted` and other non-final statuses to `under_review`; final statuses are
    /// kept (an approved application stays `approved` through `documents_signed`).
    pub fn after_transition(current: ApplicationStatus, new_state: ApplicationState) -> Self {
        match new_state {
            ApplicationState::Approved => Self::Approved,
            ApplicationState::Denied => Self::Denied,
            ApplicationState::Funded => Self::Funded,
            ApplicationState::Active => Self::Active,
            ApplicationState::Closed => Self::Closed,
            _ if current == Self::Draft => Self::Submitted,
            _ if current.is_final() => current,
            _ => Self::UnderReview,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "under_review" => Ok(Self::UnderReview),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "funded" => Ok(Self::Funded),
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid application status: {s}")),
        }
    }
}

impl Default for ApplicationStatus {
    fn default() -> Self {
        Self::Draft
    }
}
