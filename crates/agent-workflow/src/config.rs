//! Workflow-level configuration

use crate::event::WorkflowEventType;
use agent_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Behaviour switches for a [`Workflow`](crate::Workflow)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Halt the top-level sequence at the first failed output
    pub fail_fast: bool,

    /// Keep emitted events in the run response
    pub store_events: bool,

    /// Event types never kept, even with `store_events`
    pub events_to_skip: Vec<WorkflowEventType>,

    /// Forward unit partial chunks as `StepProgress` events when streaming
    pub stream_partials: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            store_events: false,
            events_to_skip: Vec::new(),
            stream_partials: true,
        }
    }
}

impl WorkflowConfig {
    /// Parse from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        agent_utils::load_json(path).map_err(|e| Error::InitializationFailed(format!("{e:#}")))
    }

    /// Whether an event of `event_type` is kept in the run response
    pub fn should_store(&self, event_type: WorkflowEventType) -> bool {
        self.store_events && !self.events_to_skip.contains(&event_type)
    }
}
