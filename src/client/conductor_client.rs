//! # Conductor HTTP Client
//!
//! `reqwest` implementation of [`WorkflowEngineClient`] for a Conductor-style engine.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, error, info, instrument, warn};

use super::WorkflowEngineClient;
use crate::config::{EngineConfig, UpdateTaskPathStyle};
use crate::constants::defaults::RUNNING_WORKFLOW_QUERY;
use crate::error::{LoanflowError, Result};
use crate::models::{Task, TaskResultUpdate, WorkflowDetail, WorkflowSearchResult};

#[derive(Debug, Clone)]
pub struct ConductorHttpClient {
    client: Client,
    base_url: Url,
    update_path_style: UpdateTaskPathStyle,
}

impl ConductorHttpClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            LoanflowError::Configuration(format!("Invalid engine base URL: {e}"))
        })?;
        // Keep any path prefix when joining relative endpoints
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("loanflow-worker/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                LoanflowError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        info!(
            base_url = %base_url,
            timeout_ms = config.request_timeout_ms,
            update_path_style = ?config.update_task_path_style,
            "Created workflow engine client"
        );

        Ok(Self {
            client,
            base_url,
            update_path_style: config.update_task_path_style,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| LoanflowError::Configuration(format!("Failed to construct URL: {e}")))
    }

    async fn error_for_status(response: reqwest::Response, operation: &str) -> LoanflowError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        LoanflowError::Transport(format!("{operation} failed with HTTP {status}: {body}"))
    }
}

/// Engines answer a poll with an array, a single task object or an empty body
fn parse_poll_body(body: &str) -> Result<Vec<Task>> {
    let body = body.trim();
    if body.is_empty() || body == "null" {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| LoanflowError::Transport(format!("Invalid poll response: {e}")))?;
    let tasks = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value),
        serde_json::Value::Object(_) => serde_json::from_value(value).map(|task| vec![task]),
        _ => return Ok(Vec::new()),
    };
    tasks.map_err(|e| LoanflowError::Transport(format!("Invalid poll response: {e}")))
}

#[async_trait]
impl WorkflowEngineClient for ConductorHttpClient {
    #[instrument(skip(self))]
    async fn poll_tasks(&self, worker_id: &str, timeout_seconds: u64) -> Result<Vec<Task>> {
        let mut url = self.endpoint("api/tasks/poll")?;
        url.query_pairs_mut()
            .append_pair("workerid", worker_id)
            .append_pair("timeout", &timeout_seconds.to_string());

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT => {
                debug!("No tasks available");
                Ok(Vec::new())
            }
            status if status.is_success() => {
                let body = response.text().await?;
                let tasks = parse_poll_body(&body)?;
                debug!(count = tasks.len(), "Polled tasks");
                Ok(tasks)
            }
            _ => Err(Self::error_for_status(response, "Task poll").await),
        }
    }

    #[instrument(skip(self))]
    async fn search_running_workflows(&self) -> Result<Vec<String>> {
        let mut url = self.endpoint("api/workflow/search")?;
        url.query_pairs_mut()
            .append_pair("query", RUNNING_WORKFLOW_QUERY);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for_status(response, "Workflow search").await);
        }

        let result: WorkflowSearchResult = response.json().await.map_err(|e| {
            LoanflowError::Transport(format!("Failed to decode search response: {e}"))
        })?;
        debug!(
            total_hits = result.total_hits,
            returned = result.results.len(),
            "Running workflow search complete"
        );

        Ok(result
            .results
            .into_iter()
            .map(|summary| summary.workflow_id)
            .filter(|id| !id.is_empty())
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowDetail> {
        let url = self.endpoint(&format!("api/workflow/{workflow_id}"))?;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(LoanflowError::workflow_not_found(workflow_id)),
            status if status.is_success() => response.json().await.map_err(|e| {
                LoanflowError::Transport(format!("Failed to decode workflow {workflow_id}: {e}"))
            }),
            _ => Err(Self::error_for_status(response, "Workflow detail").await),
        }
    }

    #[instrument(skip(self, update), fields(task_id = %update.task_id, status = %update.status))]
    async fn update_task(&self, update: &TaskResultUpdate) -> Result<()> {
        let url = match self.update_path_style {
            UpdateTaskPathStyle::Body => self.endpoint("api/tasks")?,
            UpdateTaskPathStyle::PathId => self.endpoint(&format!("api/tasks/{}", update.task_id))?,
        };

        let response = self.client.post(url).json(update).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!("Task status update accepted");
            return Ok(());
        }

        let err = Self::error_for_status(response, "Task status update").await;
        if status.is_client_error() {
            error!(error = %err, "Engine rejected task status update");
        } else {
            warn!(error = %err, "Task status update failed");
        }
        Err(err)
    }
}
