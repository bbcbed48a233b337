use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::ApplicationState;

/// Append-only audit record, one per effective transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: Uuid,
    pub application_id: String,
    /// `None` only for the very first transition of an application
    pub from_state: Option<ApplicationState>,
    pub to_state: ApplicationState,
    pub transition_reason: String,
    pub automated: bool,
    pub user_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(
        application_id: impl Into<String>,
        from_state: Option<ApplicationState>,
        to_state: ApplicationState,
        transition_reason: impl Into<String>,
        automated: bool,
        user_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id: application_id.into(),
            from_state,
            to_state,
            transition_reason: transition_reason.into(),
            automated,
            user_id,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
