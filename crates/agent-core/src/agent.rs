//! Core Agent trait definition

use crate::{Result, RunContext};
use async_trait::async_trait;

/// Collaborator contract for agent and team steps
///
/// The input/output types are kept as String; an agent-backed step sends
/// the preceding step's content (or the original message) and wraps the
/// reply in a `StepOutput`. How the agent reaches a model or a team of
/// members is its own concern.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Process input and return output
    async fn process(&self, input: String, context: &RunContext) -> Result<String>;

    /// Get the agent's name
    fn name(&self) -> &str;
}
