//! # Task Dispatcher
//!
//! Routes one engine task to its registered handler and guarantees a
//! well-formed output payload.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::constants::payload_keys;
use crate::error::{LoanflowError, Result};
use crate::handlers::HandlerContext;
use crate::models::Task;
use crate::registry::TaskHandlerRegistry;
use crate::types::TaskPayload;

#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    registry: Arc<TaskHandlerRegistry>,
    handler_timeout: Duration,
}

impl TaskDispatcher {
    pub fn new(registry: Arc<TaskHandlerRegistry>, handler_timeout: Duration) -> Self {
        Self {
            registry,
            handler_timeout,
        }
    }

    pub fn registry(&self) -> &TaskHandlerRegistry {
        &self.registry
    }

    /// Whether a handler is registered for the task's reference name
    pub fn can_handle(&self, task: &Task) -> bool {
        self.registry.handles(&task.reference_task_name)
    }

    /// Execute `task` with its handler.
    ///
    /// The task's type and reference name are merged into the handler input. A
    /// handler that produces no output yields a diagnostic payload instead.
    #[instrument(skip(self, task, cancellation), fields(
        task_id = %task.task_id,
        reference_task_name = %task.reference_task_name
    ))]
    pub async fn dispatch(
        &self,
        task: &Task,
        cancellation: &CancellationToken,
    ) -> Result<TaskPayload> {
        let handler = self.registry.resolve(&task.reference_task_name)?;

        let mut input = task.input_data.clone();
        input.insert(payload_keys::TASK_TYPE, task.task_type.as_str());
        input.insert(
            payload_keys::REFERENCE_TASK_NAME,
            task.reference_task_name.as_str(),
        );

        let ctx = HandlerContext::new(
            cancellation.child_token(),
            &task.task_id,
            &task.workflow_instance_id,
            &task.reference_task_name,
        );

        let started = Instant::now();
        let output = tokio::time::timeout(self.handler_timeout, handler.execute(&ctx, &input))
            .await
            .map_err(|_| {
                LoanflowError::Internal(format!(
                    "handler {} timed out after {}ms",
                    handler.name(),
                    self.handler_timeout.as_millis()
                ))
            })??;

        debug!(
            handler = handler.name(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Handler finished"
        );

        Ok(output.unwrap_or_else(|| {
            warn!(task_type = %task.task_type, "Task handler returned no output");
            missing_output_payload(&task.task_type)
        }))
    }
}

/// Diagnostic payload substituted for a missing handler output
pub fn missing_output_payload(task_type: &str) -> TaskPayload {
    TaskPayload::new()
        .with(payload_keys::ERROR, "Task handler returned nil output")
        .with(payload_keys::TASK_TYPE, task_type)
        .with(payload_keys::TIMESTAMP, Utc::now().to_rfc3339())
}
