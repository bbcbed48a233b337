//! # Task Handler Registry
//!
//! Maps engine reference names to handler instances. Built once when a worker
//! starts and then shared read-only with the poller; nothing global, so several
//! independently configured workers can live in one process.
//!
//! ## Usage
//!
//! ```rust
//! use loanflow_core::registry::TaskHandlerRegistry;
//!
//! let registry = TaskHandlerRegistry::with_standard_handlers(None);
//! assert!(registry.handles("calculate_dti_ratio"));
//! assert!(registry.resolve("unknown_ref").is_err());
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::reference_names;
use crate::error::{LoanflowError, Result};
use crate::handlers::{
    LoanProcessingTaskHandler, PrequalificationTaskHandler, TaskHandler,
    UnderwritingTaskHandler, UpdateApplicationStateHandler,
};
use crate::repository::LoanRepository;
use crate::state_machine::ApplicationStateMachine;

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_registrations: usize,
    /// Distinct handler names behind the registrations
    pub handlers: Vec<String>,
}

#[derive(Default, Clone)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every handler this worker ships with. Without a
    /// repository the state-update paths run in simulation mode.
    pub fn with_standard_handlers(repository: Option<Arc<dyn LoanRepository>>) -> Self {
        let state_machine = ApplicationStateMachine::with_optional_repository(repository);
        let mut registry = Self::new();

        let prequalification: Arc<dyn TaskHandler> =
            Arc::new(PrequalificationTaskHandler::new(state_machine.clone()));
        for name in reference_names::PREQUALIFICATION {
            registry.register(*name, prequalification.clone());
        }

        let loan_processing: Arc<dyn TaskHandler> =
            Arc::new(LoanProcessingTaskHandler::new(state_machine.clone()));
        for name in reference_names::LOAN_PROCESSING {
            registry.register(*name, loan_processing.clone());
        }

        let underwriting: Arc<dyn TaskHandler> =
            Arc::new(UnderwritingTaskHandler::new(state_machine.clone()));
        for name in reference_names::UNDERWRITING {
            registry.register(*name, underwriting.clone());
        }

        registry.register(
            reference_names::UPDATE_APPLICATION_STATE,
            Arc::new(UpdateApplicationStateHandler::new(state_machine.clone())),
        );

        info!(
            registrations = registry.len(),
            simulation = state_machine.is_simulation(),
            "Task handler registry initialized"
        );
        registry
    }

    /// Bind a reference name to a handler. A second registration for the same
    /// name replaces the first.
    pub fn register(&mut self, reference_name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let reference_name = reference_name.into();
        debug!(
            reference_name = %reference_name,
            handler = handler.name(),
            "Registering task handler"
        );
        if let Some(previous) = self.handlers.insert(reference_name.clone(), handler) {
            warn!(
                reference_name = %reference_name,
                replaced = previous.name(),
                "Task handler registration replaced"
            );
        }
    }

    pub fn resolve(&self, reference_name: &str) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(reference_name)
            .cloned()
            .ok_or_else(|| LoanflowError::UnknownTaskType(reference_name.to_string()))
    }

    pub fn handles(&self, reference_name: &str) -> bool {
        self.handlers.contains_key(reference_name)
    }

    /// Registered reference names, sorted
    pub fn reference_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let handlers: BTreeSet<String> = self
            .handlers
            .values()
            .map(|h| h.name().to_string())
            .collect();
        RegistryStats {
            total_registrations: self.handlers.len(),
            handlers: handlers.into_iter().collect(),
        }
    }
}

impl fmt::Debug for TaskHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandlerRegistry")
            .field("reference_names", &self.reference_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::HandlerContext;
    use crate::types::TaskPayload;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl TaskHandler for Named {
        async fn execute(
            &self,
            _ctx: &HandlerContext,
            _input: &TaskPayload,
        ) -> Result<Option<TaskPayload>> {
            Ok(Some(TaskPayload::new().with("handler", self.0)))
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_standard_registrations() {
        let registry = TaskHandlerRegistry::with_standard_handlers(None);
        assert_eq!(
            registry.len(),
            reference_names::PREQUALIFICATION.len()
                + reference_names::LOAN_PROCESSING.len()
                + reference_names::UNDERWRITING.len()
                + 1
        );
        assert!(registry.handles("validate_prequalify_input"));
        assert!(registry.handles("update_state_to_underwriting_ref"));
        assert!(registry.handles("update_application_state"));
        assert_eq!(registry.resolve("credit_check_task").unwrap().name(), "underwriting");
        assert_eq!(
            registry.stats().handlers,
            vec![
                "loan_processing",
                "prequalification",
                "underwriting",
                "update_application_state"
            ]
        );
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = TaskHandlerRegistry::new();
        assert!(registry.is_empty());
        let err = registry.resolve("nope_ref").err().unwrap();
        assert!(matches!(err, LoanflowError::UnknownTaskType(name) if name == "nope_ref"));
    }

    #[test]
    fn test_registration_replaces() {
        let mut registry = TaskHandlerRegistry::new();
        registry.register("step_ref", Arc::new(Named("first")));
        registry.register("step_ref", Arc::new(Named("second")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("step_ref").unwrap().name(), "second");
    }

    #[test]
    fn test_registries_are_independent() {
        let mut a = TaskHandlerRegistry::new();
        let b = TaskHandlerRegistry::new();
        a.register("only_in_a", Arc::new(Named("a")));
        assert!(a.handles("only_in_a"));
        assert!(!b.handles("only_in_a"));
    }
}
