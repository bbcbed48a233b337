//! # Workflow Engine Client
//!
//! Narrow HTTP contract with the external workflow engine. The poller depends on
//! [`WorkflowEngineClient`]; [`ConductorHttpClient`] implements it over `reqwest`.
//!
//! | Operation | Request |
//! |---|---|
//! | poll for work | `GET /api/tasks/poll?workerid=&timeout=` (204 = nothing to do) |
//! | running workflows | `GET /api/workflow/search?query=status:RUNNING` |
//! | workflow detail | `GET /api/workflow/{id}` |
//! | task status | `POST /api/tasks` or `POST /api/tasks/{taskId}` |

pub mod conductor_client;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Task, TaskResultUpdate, WorkflowDetail};

pub use conductor_client::ConductorHttpClient;

#[async_trait]
pub trait WorkflowEngineClient: Send + Sync {
    /// Long-poll for tasks assigned to this worker. "No content" is an empty vec.
    async fn poll_tasks(&self, worker_id: &str, timeout_seconds: u64) -> Result<Vec<Task>>;

    /// Identifiers of workflows currently running
    async fn search_running_workflows(&self) -> Result<Vec<String>>;

    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowDetail>;

    /// Report a task status; non-2xx responses are errors
    async fn update_task(&self, update: &TaskResultUpdate) -> Result<()>;
}
