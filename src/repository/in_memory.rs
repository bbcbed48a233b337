use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::LoanRepository;
use crate::error::{LoanflowError, Result};
use crate::models::{LoanApplication, StateTransition};
use crate::state_machine::ApplicationState;

/// Process-local repository.
///
/// Besides plain storage it can inject failures: failing audit writes, failing
/// record updates, and a competing writer that moves a record just before the
/// next conditional update.
#[derive(Debug, Default)]
pub struct InMemoryLoanRepository {
    applications: DashMap<String, LoanApplication>,
    transitions: RwLock<Vec<StateTransition>>,
    fail_transition_writes: AtomicBool,
    fail_updates: AtomicBool,
    competing_write: Mutex<Option<ApplicationState>>,
    update_count: AtomicU64,
}

impl InMemoryLoanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing the state machine
    pub fn insert(&self, application: LoanApplication) {
        self.applications.insert(application.id.clone(), application);
    }

    pub fn set_fail_transition_writes(&self, fail: bool) {
        self.fail_transition_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Before the next conditional update, another writer moves the record to `state`
    pub fn simulate_competing_write(&self, state: ApplicationState) {
        *self.competing_write.lock() = Some(state);
    }

    /// Number of successful record writes
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::SeqCst)
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.read().len()
    }

    fn check_update_allowed(&self) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(LoanflowError::Persistence(
                "simulated update failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LoanRepository for InMemoryLoanRepository {
    async fn get_application_by_id(&self, id: &str) -> Result<LoanApplication> {
        self.applications
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LoanflowError::application_not_found(id))
    }

    async fn create_application(&self, application: &LoanApplication) -> Result<()> {
        if self.applications.contains_key(&application.id) {
            return Err(LoanflowError::Persistence(format!(
                "application {} already exists",
                application.id
            )));
        }
        self.insert(application.clone());
        Ok(())
    }

    async fn update_application(&self, application: &LoanApplication) -> Result<()> {
        self.check_update_allowed()?;
        let mut entry = self
            .applications
            .get_mut(&application.id)
            .ok_or_else(|| LoanflowError::application_not_found(&application.id))?;
        *entry = application.clone();
        self.update_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_application_if_state(
        &self,
        application: &LoanApplication,
        expected_state: ApplicationState,
    ) -> Result<bool> {
        self.check_update_allowed()?;
        let mut entry = self
            .applications
            .get_mut(&application.id)
            .ok_or_else(|| LoanflowError::application_not_found(&application.id))?;

        if let Some(state) = self.competing_write.lock().take() {
            entry.current_state = state;
        }

        if entry.current_state != expected_state {
            return Ok(false);
        }
        *entry = application.clone();
        self.update_count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn create_state_transition(&self, transition: &StateTransition) -> Result<()> {
        if self.fail_transition_writes.load(Ordering::SeqCst) {
            return Err(LoanflowError::Persistence(
                "simulated audit write failure".to_string(),
            ));
        }
        self.transitions.write().push(transition.clone());
        Ok(())
    }

    async fn list_state_transitions(&self, application_id: &str) -> Result<Vec<StateTransition>> {
        Ok(self
            .transitions
            .read()
            .iter()
            .filter(|t| t.application_id == application_id)
            .cloned()
            .collect())
    }
}
