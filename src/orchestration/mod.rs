//! # Orchestration
//!
//! The worker side of the engine protocol: the polling loop, task dispatch and
//! status reporting.
//!
//! ## Flow
//!
//! ```text
//! OrchestratorPoller --discover--> WorkflowEngineClient
//!        |
//!        +--dispatch--> TaskDispatcher --resolve--> TaskHandlerRegistry --> TaskHandler
//!        |
//!        +--report----> StatusReporter --update_task--> WorkflowEngineClient
//! ```

pub mod dispatcher;
pub mod poller;
pub mod status_reporter;

pub use dispatcher::{missing_output_payload, TaskDispatcher};
pub use poller::{
    generate_worker_id, DiscoverySource, OrchestratorPoller, PollerHandle, PollerState,
    PollerStats, PollerStatsSnapshot, TickOutcome,
};
pub use status_reporter::{failure_payload, ReportOutcome, StatusReporter};
