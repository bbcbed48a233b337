//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use loanflow_core::client::WorkflowEngineClient;
use loanflow_core::config::WorkerConfig;
use loanflow_core::constants::TaskStatus;
use loanflow_core::error::{LoanflowError, Result};
use loanflow_core::models::{Task, TaskResultUpdate, WorkflowDetail};
use loanflow_core::types::TaskPayload;

/// In-process stand-in for the workflow engine.
///
/// Poll responses are queued per call; running workflows and their details are
/// served from maps. Every status update is recorded whether or not it is
/// configured to fail.
#[derive(Debug, Default)]
pub struct FakeEngineClient {
    poll_responses: Mutex<VecDeque<Vec<Task>>>,
    running: Mutex<Vec<String>>,
    workflows: Mutex<HashMap<String, WorkflowDetail>>,
    updates: Mutex<Vec<TaskResultUpdate>>,
    fail_updates: AtomicBool,
    fail_polls: AtomicBool,
    fail_search: AtomicBool,
    poll_calls: AtomicUsize,
    search_calls: AtomicUsize,
}

impl FakeEngineClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_poll(&self, tasks: Vec<Task>) {
        self.poll_responses.lock().push_back(tasks);
    }

    pub fn add_running_workflow(&self, workflow: WorkflowDetail) {
        self.running.lock().push(workflow.workflow_id.clone());
        self.workflows
            .lock()
            .insert(workflow.workflow_id.clone(), workflow);
    }

    /// Listed as running but missing from the detail endpoint
    pub fn add_dangling_workflow(&self, workflow_id: &str) {
        self.running.lock().push(workflow_id.to_string());
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_polls(&self, fail: bool) {
        self.fail_polls.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_search(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<TaskResultUpdate> {
        self.updates.lock().clone()
    }

    pub fn statuses_for(&self, task_id: &str) -> Vec<TaskStatus> {
        self.updates
            .lock()
            .iter()
            .filter(|u| u.task_id == task_id)
            .map(|u| u.status)
            .collect()
    }

    pub fn last_update_for(&self, task_id: &str) -> Option<TaskResultUpdate> {
        self.updates
            .lock()
            .iter()
            .rev()
            .find(|u| u.task_id == task_id)
            .cloned()
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowEngineClient for FakeEngineClient {
    async fn poll_tasks(&self, _worker_id: &str, _timeout_seconds: u64) -> Result<Vec<Task>> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(LoanflowError::Transport("connection refused".to_string()));
        }
        Ok(self.poll_responses.lock().pop_front().unwrap_or_default())
    }

    async fn search_running_workflows(&self) -> Result<Vec<String>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(LoanflowError::Transport("search unavailable".to_string()));
        }
        Ok(self.running.lock().clone())
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowDetail> {
        self.workflows
            .lock()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| LoanflowError::workflow_not_found(workflow_id))
    }

    async fn update_task(&self, update: &TaskResultUpdate) -> Result<()> {
        self.updates.lock().push(update.clone());
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(LoanflowError::Transport(
                "Task status update failed with HTTP 500".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for engine tasks
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(task_id: &str, reference_task_name: &str) -> Self {
        Self {
            task: Task {
                task_id: task_id.to_string(),
                task_type: reference_task_name.trim_end_matches("_ref").to_string(),
                reference_task_name: reference_task_name.to_string(),
                workflow_instance_id: "wf-1".to_string(),
                status: TaskStatus::Scheduled,
                ..Default::default()
            },
        }
    }

    pub fn task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn workflow(mut self, workflow_id: &str) -> Self {
        self.task.workflow_instance_id = workflow_id.to_string();
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn input(mut self, input: TaskPayload) -> Self {
        self.task.input_data = input;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

pub fn workflow(workflow_id: &str, tasks: Vec<Task>) -> WorkflowDetail {
    WorkflowDetail {
        workflow_id: workflow_id.to_string(),
        workflow_name: "loan_processing".to_string(),
        status: "RUNNING".to_string(),
        correlation_id: None,
        tasks,
    }
}

pub fn worker_config(scan_running_workflows: bool) -> WorkerConfig {
    WorkerConfig {
        worker_id: Some("test-worker".to_string()),
        poll_interval_ms: 10,
        poll_timeout_seconds: 1,
        handler_timeout_ms: 1_000,
        scan_running_workflows,
    }
}

/// Input for a DTI task that the prequalification handler accepts
pub fn dti_input() -> TaskPayload {
    TaskPayload::new()
        .with("annualIncome", 120_000.0)
        .with("monthlyDebt", 2_000.0)
}
