//! Workflow agent implementation (wraps a workflow as an agent)

use crate::workflow::{RunRequest, RunStatus, Workflow};
use agent_core::{Agent, Error, Result, RunContext};
use async_trait::async_trait;

/// Wraps a Workflow as an Agent
///
/// WorkflowAgent allows workflows to be used as steps within other
/// workflows, enabling hierarchical workflow composition. The inner run
/// shares the outer session id and stops when the outer run is cancelled.
///
/// # Example
///
/// ```no_run
/// use agent_core::{RunContext, StepInput};
/// use agent_workflow::{Step, Workflow, WorkflowAgent};
/// use std::sync::Arc;
///
/// # fn example() -> agent_core::Result<()> {
/// let review = Workflow::builder("review")
///     .add(Step::function("lint", |input: StepInput, _ctx: RunContext| async move {
///         Ok(input.message_as_string())
///     }))
///     .build()?;
///
/// let main_workflow = Workflow::builder("publish")
///     .add(Step::agent(Arc::new(WorkflowAgent::new("review", review))))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct WorkflowAgent {
    workflow: Workflow,
    name: String,
}

impl WorkflowAgent {
    /// Create a new workflow agent
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the agent
    /// * `workflow` - The workflow to wrap
    pub fn new(name: impl Into<String>, workflow: Workflow) -> Self {
        Self {
            workflow,
            name: name.into(),
        }
    }

    /// Get a reference to the underlying workflow
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }
}

#[async_trait]
impl Agent for WorkflowAgent {
    async fn process(&self, input: String, context: &RunContext) -> Result<String> {
        let mut request = RunRequest::new(input).with_session_id(context.session_id());
        if let Some(user_id) = context.user_id() {
            request = request.with_user_id(user_id);
        }

        let response = self
            .workflow
            .execute_with_cancellation(request, context.cancellation().child_token())
            .await?;

        match response.status {
            RunStatus::Completed => Ok(response
                .output
                .content_text()
                .unwrap_or_default()),
            RunStatus::Cancelled => Err(Error::Cancelled),
            RunStatus::Error => Err(Error::ProcessingFailed(
                response.output.error.unwrap_or_default(),
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
