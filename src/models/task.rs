//! Wire models for the workflow engine's task and workflow resources.

use serde::{Deserialize, Serialize};

use crate::constants::TaskStatus;
use crate::types::TaskPayload;

/// A unit of work owned by the engine. This crate only reads and reports on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    #[serde(deserialize_with = "null_as_default")]
    pub task_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub task_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub reference_task_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub workflow_instance_id: String,
    #[serde(deserialize_with = "deserialize_status")]
    pub status: TaskStatus,
    #[serde(deserialize_with = "deserialize_payload")]
    pub input_data: TaskPayload,
    #[serde(deserialize_with = "null_as_default")]
    pub retry_count: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub poll_count: u32,
}

impl Task {
    /// Whether status reports can be addressed to a workflow instance
    pub fn has_workflow_instance(&self) -> bool {
        !self.workflow_instance_id.trim().is_empty()
    }
}

/// Workflow resource with its embedded task list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowDetail {
    #[serde(deserialize_with = "null_as_default")]
    pub workflow_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub workflow_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    pub correlation_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub tasks: Vec<Task>,
}

impl WorkflowDetail {
    /// Tasks ready to run, with the workflow id filled in where the engine omitted it
    pub fn schedulable_tasks(&self) -> impl Iterator<Item = Task> + '_ {
        self.tasks
            .iter()
            .filter(|task| task.status.is_schedulable())
            .map(|task| {
                let mut task = task.clone();
                if !task.has_workflow_instance() {
                    task.workflow_instance_id = self.workflow_id.clone();
                }
                task
            })
    }
}

/// One hit of a workflow search
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSummary {
    #[serde(deserialize_with = "null_as_default")]
    pub workflow_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSearchResult {
    #[serde(deserialize_with = "null_as_default")]
    pub total_hits: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub results: Vec<WorkflowSummary>,
}

/// Status update body sent to the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultUpdate {
    pub task_id: String,
    pub reference_task_name: String,
    pub workflow_instance_id: String,
    pub status: TaskStatus,
    pub output_data: TaskPayload,
}

impl TaskResultUpdate {
    pub fn for_task(task: &Task, status: TaskStatus, output_data: TaskPayload) -> Self {
        Self {
            task_id: task.task_id.clone(),
            reference_task_name: task.reference_task_name.clone(),
            workflow_instance_id: task.workflow_instance_id.clone(),
            status,
            output_data,
        }
    }
}

/// Explicit `null` reads as the field's default, same as an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// An explicit `null` status is never treated as schedulable
fn deserialize_status<'de, D>(deserializer: D) -> Result<TaskStatus, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<TaskStatus>::deserialize(deserializer)?.unwrap_or(TaskStatus::Other))
}

/// `inputData` may be null or absent on some engine versions
fn deserialize_payload<'de, D>(deserializer: D) -> Result<TaskPayload, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Object(map) => Ok(TaskPayload::from(map)),
        _ => Ok(TaskPayload::new()),
    }
}
