//! # Orchestrator Poller
//!
//! The worker loop. Each tick discovers at most one task this worker can
//! handle, dispatches it and reports the result:
//!
//! ```text
//! Idle -> Polling -> Dispatching -> Reporting -> Idle
//! ```
//!
//! Discovery tries two sources in order. First a scan of running workflows for
//! schedulable tasks the engine's own dispatch may have missed, then the
//! standard long poll. Both go through a circuit breaker so an unreachable
//! engine costs one fast rejection per tick instead of a full request timeout.
//!
//! Tasks run one at a time on the loop. Cancellation is observed between ticks
//! and during discovery; a handler already running is allowed to finish.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::dispatcher::TaskDispatcher;
use super::status_reporter::StatusReporter;
use crate::client::WorkflowEngineClient;
use crate::config::{CircuitBreakerConfig, WorkerConfig};
use crate::error::{LoanflowError, Result};
use crate::logging::{log_error, log_task_operation};
use crate::models::Task;
use crate::registry::TaskHandlerRegistry;
use crate::resilience::{CircuitBreaker, CircuitBreakerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Polling,
    Dispatching,
    Reporting,
    Stopped,
}

/// Where a task was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Scan,
    Poll,
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NoWork,
    Completed {
        task_id: String,
        source: DiscoverySource,
    },
    Failed {
        task_id: String,
        source: DiscoverySource,
        error: LoanflowError,
    },
    DiscoveryFailed(LoanflowError),
    /// The engine circuit breaker rejected discovery
    CircuitOpen,
    Cancelled,
}

/// Runtime counters
#[derive(Debug, Default)]
pub struct PollerStats {
    pub ticks: AtomicU64,
    pub tasks_discovered_by_scan: AtomicU64,
    pub tasks_discovered_by_poll: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    /// Polled tasks left for redelivery: no handler, or beyond the one run per tick
    pub tasks_skipped: AtomicU64,
    pub discovery_errors: AtomicU64,
    pub report_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStatsSnapshot {
    pub ticks: u64,
    pub tasks_discovered_by_scan: u64,
    pub tasks_discovered_by_poll: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_skipped: u64,
    pub discovery_errors: u64,
    pub report_failures: u64,
}

impl PollerStats {
    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tasks_discovered_by_scan: self.tasks_discovered_by_scan.load(Ordering::Relaxed),
            tasks_discovered_by_poll: self.tasks_discovered_by_poll.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_skipped: self.tasks_skipped.load(Ordering::Relaxed),
            discovery_errors: self.discovery_errors.load(Ordering::Relaxed),
            report_failures: self.report_failures.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct OrchestratorPoller {
    worker_id: String,
    config: WorkerConfig,
    client: Arc<dyn WorkflowEngineClient>,
    dispatcher: TaskDispatcher,
    reporter: StatusReporter,
    breaker: CircuitBreaker,
    state: Mutex<PollerState>,
    stats: Arc<PollerStats>,
}

impl std::fmt::Debug for OrchestratorPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorPoller")
            .field("worker_id", &self.worker_id)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("breaker", &self.breaker.state())
            .finish()
    }
}

/// `worker_<unix nanos>`
pub fn generate_worker_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    format!("worker_{nanos}")
}

impl OrchestratorPoller {
    pub fn new(
        config: WorkerConfig,
        breaker_config: &CircuitBreakerConfig,
        client: Arc<dyn WorkflowEngineClient>,
        registry: Arc<TaskHandlerRegistry>,
    ) -> Self {
        let breaker = CircuitBreaker::new("workflow_engine", breaker_config);
        Self::with_circuit_breaker(config, breaker, client, registry)
    }

    pub fn with_circuit_breaker(
        config: WorkerConfig,
        breaker: CircuitBreaker,
        client: Arc<dyn WorkflowEngineClient>,
        registry: Arc<TaskHandlerRegistry>,
    ) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_worker_id);

        info!(
            worker_id = %worker_id,
            poll_interval_ms = config.poll_interval_ms,
            scan_running_workflows = config.scan_running_workflows,
            handlers = registry.len(),
            "Creating OrchestratorPoller"
        );

        Self {
            dispatcher: TaskDispatcher::new(registry, config.handler_timeout()),
            reporter: StatusReporter::new(client.clone()),
            worker_id,
            config,
            client,
            breaker,
            state: Mutex::new(PollerState::Idle),
            stats: Arc::new(PollerStats::default()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> PollerState {
        *self.state.lock()
    }

    pub fn stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn set_state(&self, state: PollerState) {
        *self.state.lock() = state;
    }

    /// Run one discovery/dispatch/report cycle
    #[instrument(skip(self, cancellation), fields(worker_id = %self.worker_id))]
    pub async fn run_once(&self, cancellation: &CancellationToken) -> TickOutcome {
        if cancellation.is_cancelled() {
            return TickOutcome::Cancelled;
        }
        PollerStats::incr(&self.stats.ticks);
        self.set_state(PollerState::Polling);

        let discovered = tokio::select! {
            _ = cancellation.cancelled() => {
                self.set_state(PollerState::Idle);
                return TickOutcome::Cancelled;
            }
            result = self.breaker.call(|| self.discover()) => result,
        };

        let (task, source) = match discovered {
            Ok(Some(found)) => found,
            Ok(None) => {
                self.set_state(PollerState::Idle);
                return TickOutcome::NoWork;
            }
            Err(CircuitBreakerError::CircuitOpen { .. }) => {
                debug!("Engine circuit open, skipping tick");
                self.set_state(PollerState::Idle);
                return TickOutcome::CircuitOpen;
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                PollerStats::incr(&self.stats.discovery_errors);
                log_error("poller", "discover", &e.to_string(), None);
                self.set_state(PollerState::Idle);
                return TickOutcome::DiscoveryFailed(e);
            }
        };

        let outcome = self.process(task, source, cancellation).await;
        self.set_state(PollerState::Idle);
        outcome
    }

    /// Run ticks on the configured interval until `cancellation` fires
    pub async fn run(&self, cancellation: CancellationToken) {
        let period = self.config.poll_interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(worker_id = %self.worker_id, "Starting OrchestratorPoller");
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = interval.tick() => {
                    let started = Instant::now();
                    let outcome = self.run_once(&cancellation).await;
                    debug!(
                        outcome = ?outcome,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Completed polling tick"
                    );
                }
            }
        }

        self.set_state(PollerState::Stopped);
        info!(
            worker_id = %self.worker_id,
            stats = ?self.stats.snapshot(),
            "OrchestratorPoller stopped"
        );
    }

    /// Start [`OrchestratorPoller::run`] on the runtime
    pub fn spawn(self: Arc<Self>) -> PollerHandle {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let poller = self.clone();
        let join = tokio::spawn(async move { poller.run(token).await });
        PollerHandle {
            cancellation,
            join,
            poller: self,
        }
    }

    async fn discover(&self) -> Result<Option<(Task, DiscoverySource)>> {
        if self.config.scan_running_workflows {
            match self.scan_running_workflows().await {
                Ok(Some(task)) => {
                    PollerStats::incr(&self.stats.tasks_discovered_by_scan);
                    return Ok(Some((task, DiscoverySource::Scan)));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Running workflow scan failed, falling back to poll");
                }
            }
        }

        let polled = self
            .client
            .poll_tasks(&self.worker_id, self.config.poll_timeout_seconds)
            .await?;
        Ok(self.first_handleable(polled).map(|task| {
            PollerStats::incr(&self.stats.tasks_discovered_by_poll);
            (task, DiscoverySource::Poll)
        }))
    }

    async fn scan_running_workflows(&self) -> Result<Option<Task>> {
        let workflow_ids = self.client.search_running_workflows().await?;
        debug!(count = workflow_ids.len(), "Scanning running workflows");

        for workflow_id in workflow_ids {
            let workflow = match self.client.get_workflow(&workflow_id).await {
                Ok(workflow) => workflow,
                Err(e) => {
                    warn!(workflow_id = %workflow_id, error = %e, "Failed to load workflow");
                    continue;
                }
            };
            let candidate = workflow
                .schedulable_tasks()
                .find(|task| self.dispatcher.can_handle(task));
            if let Some(task) = candidate {
                debug!(
                    workflow_id = %workflow_id,
                    task_id = %task.task_id,
                    reference_task_name = %task.reference_task_name,
                    "Found schedulable task in running workflow"
                );
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// First polled task with a handler; the rest stay with the engine and
    /// are counted as skipped
    fn first_handleable(&self, tasks: Vec<Task>) -> Option<Task> {
        let mut selected = None;
        for task in tasks {
            let handled = self.dispatcher.can_handle(&task);
            if handled && selected.is_none() {
                selected = Some(task);
                continue;
            }
            PollerStats::incr(&self.stats.tasks_skipped);
            if handled {
                debug!(
                    task_id = %task.task_id,
                    reference_task_name = %task.reference_task_name,
                    "One task per tick, leaving handled task for redelivery"
                );
            } else {
                debug!(
                    task_id = %task.task_id,
                    reference_task_name = %task.reference_task_name,
                    "No handler registered, leaving task for redelivery"
                );
            }
        }
        selected
    }

    async fn process(
        &self,
        task: Task,
        source: DiscoverySource,
        cancellation: &CancellationToken,
    ) -> TickOutcome {
        self.set_state(PollerState::Dispatching);
        log_task_operation(
            "dispatch",
            &task.task_id,
            Some(&task.reference_task_name),
            Some(&task.workflow_instance_id),
            "STARTED",
            None,
        );

        // Execution proceeds even when the engine did not take the update
        if self.reporter.mark_in_progress(&task).await.is_failure() {
            PollerStats::incr(&self.stats.report_failures);
        }

        let result = self.dispatcher.dispatch(&task, cancellation).await;

        self.set_state(PollerState::Reporting);
        match result {
            Ok(output) => {
                PollerStats::incr(&self.stats.tasks_completed);
                if self.reporter.mark_completed(&task, output).await.is_failure() {
                    PollerStats::incr(&self.stats.report_failures);
                }
                log_task_operation(
                    "dispatch",
                    &task.task_id,
                    Some(&task.reference_task_name),
                    Some(&task.workflow_instance_id),
                    "COMPLETED",
                    None,
                );
                TickOutcome::Completed {
                    task_id: task.task_id,
                    source,
                }
            }
            Err(e) => {
                PollerStats::incr(&self.stats.tasks_failed);
                error!(
                    task_id = %task.task_id,
                    reference_task_name = %task.reference_task_name,
                    error_kind = e.error_kind(),
                    error = %e,
                    "Task execution failed"
                );
                if self.reporter.mark_failed(&task, &e).await.is_failure() {
                    PollerStats::incr(&self.stats.report_failures);
                }
                TickOutcome::Failed {
                    task_id: task.task_id,
                    source,
                    error: e,
                }
            }
        }
    }
}

/// Handle to a spawned poller
#[derive(Debug)]
pub struct PollerHandle {
    cancellation: CancellationToken,
    join: JoinHandle<()>,
    poller: Arc<OrchestratorPoller>,
}

impl PollerHandle {
    pub fn poller(&self) -> &Arc<OrchestratorPoller> {
        &self.poller
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Cancel the loop and wait for the current tick to drain
    pub async fn shutdown(self) -> Result<()> {
        self.cancellation.cancel();
        self.join
            .await
            .map_err(|e| LoanflowError::Internal(format!("poller task failed: {e}")))
    }

    /// Like [`PollerHandle::shutdown`], giving up after `grace`
    pub async fn shutdown_with_timeout(self, grace: Duration) -> Result<()> {
        self.cancellation.cancel();
        match tokio::time::timeout(grace, self.join).await {
            Ok(joined) => {
                joined.map_err(|e| LoanflowError::Internal(format!("poller task failed: {e}")))
            }
            Err(_) => Err(LoanflowError::Internal(format!(
                "poller did not stop within {}ms",
                grace.as_millis()
            ))),
        }
    }
}
