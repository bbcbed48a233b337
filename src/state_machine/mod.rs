// State machine module for loan application lifecycle management
//
// The transition table is pure data; the application state machine applies one
// transition at a time against the repository (or in simulation mode without one).

pub mod application_state_machine;
pub mod states;
pub mod transitions;

// Re-export main types for convenient access
pub use application_state_machine::{
    ApplicationStateMachine, TransitionRequest, TransitionResult,
};
pub use states::{ApplicationState, ApplicationStatus};
pub use transitions::StateTransitionTable;
