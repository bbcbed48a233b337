//! Allowed lifecycle edges for a loan application.

use super::states::ApplicationState;

/// Static `from -> {to...}` table. A linear chain with one branch at
/// `underwriting` and one merge back from `manual_review`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateTransitionTable;

impl StateTransitionTable {
    pub fn allowed_next(state: ApplicationState) -> &'static [ApplicationState] {
        use ApplicationState::*;

        match state {
            Initiated => &[PreQualified],
            PreQualified => &[DocumentsSubmitted],
            DocumentsSubmitted => &[IdentityVerified],
            IdentityVerified => &[Underwriting],
            Underwriting => &[Approved, Denied, ManualReview],
            ManualReview => &[Approved, Denied],
            Approved => &[DocumentsSigned],
            DocumentsSigned => &[Funded],
            Funded => &[Active],
            Active => &[Closed],
            Denied | Closed => &[],
        }
    }

    /// Lookup by wire name; unknown names have no outgoing edges.
    pub fn allowed_next_by_name(state: &str) -> &'static [ApplicationState] {
        state
            .parse::<ApplicationState>()
            .map(Self::allowed_next)
            .unwrap_or(&[])
    }

    pub fn is_allowed(from: ApplicationState, to: ApplicationState) -> bool {
        Self::allowed_next(from).contains(&to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ApplicationState::*;

    #[test]
    fn test_underwriting_branches() {
        assert!(StateTransitionTable::is_allowed(Underwriting, Approved));
        assert!(StateTransitionTable::is_allowed(Underwriting, Denied));
        assert!(StateTransitionTable::is_allowed(Underwriting, ManualReview));
        assert!(!StateTransitionTable::is_allowed(Underwriting, Funded));
    }

    #[test]
    fn test_manual_review_merges_back() {
        assert_eq!(
            StateTransitionTable::allowed_next(ManualReview),
            &[Approved, Denied]
        );
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for state in ApplicationState::ALL {
            assert_eq!(
                StateTransitionTable::allowed_next(state).is_empty(),
                state.is_terminal(),
                "{state}"
            );
        }
    }

    #[test]
    fn test_unknown_state_name_is_empty() {
        assert!(StateTransitionTable::allowed_next_by_name("archived").is_empty());
        assert_eq!(
            StateTransitionTable::allowed_next_by_name("funded"),
            &[Active]
        );
    }

    #[test]
    fn test_no_self_loops() {
        for state in ApplicationState::ALL {
            assert!(!StateTransitionTable::is_allowed(state, state));
        }
    }
}
