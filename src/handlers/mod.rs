//! # Task Handlers
//!
//! Business logic executed for engine tasks. A handler receives the task's input
//! payload (already merged with `taskType` and `referenceTaskName` by the
//! dispatcher) and returns an output payload, or `None` when it has nothing to
//! report. One handler may serve several reference names and branch internally.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::constants::payload_keys;
use crate::error::Result;
use crate::types::TaskPayload;

pub mod identity_verification;
pub mod loan_processing;
pub mod prequalification;
pub mod underwriting;
pub mod update_application_state;

pub use loan_processing::LoanProcessingTaskHandler;
pub use prequalification::PrequalificationTaskHandler;
pub use underwriting::UnderwritingTaskHandler;
pub use update_application_state::UpdateApplicationStateHandler;

/// Per-execution context handed to a handler
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    /// Cancelled when the worker is shutting down
    pub cancellation: CancellationToken,
    pub task_id: String,
    pub workflow_instance_id: String,
    pub reference_task_name: String,
}

impl HandlerContext {
    pub fn new(
        cancellation: CancellationToken,
        task_id: impl Into<String>,
        workflow_instance_id: impl Into<String>,
        reference_task_name: impl Into<String>,
    ) -> Self {
        Self {
            cancellation,
            task_id: task_id.into(),
            workflow_instance_id: workflow_instance_id.into(),
            reference_task_name: reference_task_name.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the handler. `Ok(None)` means "no output"; the dispatcher turns that
    /// into a diagnostic payload before reporting.
    async fn execute(&self, ctx: &HandlerContext, input: &TaskPayload)
        -> Result<Option<TaskPayload>>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Sub-operation requested by the payload: first non-empty of `taskName`,
/// `taskType`, `referenceTaskName`, with any `_ref` suffix removed.
pub(crate) fn requested_operation(input: &TaskPayload, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| input.get(key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(|name| name.strip_suffix("_ref").unwrap_or(name).to_string())
}

pub(crate) const OPERATION_KEYS: &[&str] = &[
    payload_keys::TASK_NAME,
    payload_keys::TASK_TYPE,
    payload_keys::REFERENCE_TASK_NAME,
];

/// Round half away from zero to `places` decimals
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
