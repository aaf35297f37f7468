//! Sequential composite

use crate::context::ExecutionContext;
use crate::event::WorkflowEventType;
use crate::node::Node;
use crate::runnable::Runnable;
use agent_core::{Result, StepInput, StepOutput};
use async_trait::async_trait;
use tracing::debug;

/// Outputs of a sequence run, in execution order
#[derive(Debug, Default)]
pub(crate) struct SequenceOutcome {
    pub(crate) outputs: Vec<StepOutput>,
    pub(crate) stopped: bool,
}

impl SequenceOutcome {
    pub(crate) fn failed(&self) -> bool {
        self.outputs.iter().any(|o| !o.success)
    }

    /// Collapse into a single output named `name`
    ///
    /// Content is the last output's; errors of failed outputs are joined;
    /// media is concatenated; the outputs become `children`.
    pub(crate) fn into_aggregate(self, name: &str) -> StepOutput {
        let errors: Vec<String> = self
            .outputs
            .iter()
            .filter(|o| !o.success)
            .map(|o| format!("{}: {}", o.step_name, o.error.as_deref().unwrap_or("failed")))
            .collect();

        let mut aggregate = StepOutput::empty(name);
        aggregate.content = self.outputs.last().and_then(|o| o.content.clone());
        aggregate.media = self
            .outputs
            .iter()
            .flat_map(|o| o.media.iter().cloned())
            .collect();
        aggregate.stop = self.stopped;
        aggregate
            .metadata
            .insert("executed_steps".to_string(), self.outputs.len().into());
        aggregate.children = self.outputs;

        if errors.is_empty() {
            aggregate
        } else {
            aggregate.into_failure(errors.join("; "))
        }
    }
}

/// Run `nodes` in order, threading each output into the next input
///
/// With `fail_fast` the sequence halts at the first failed output. An output
/// with `stop` set always halts it.
pub(crate) async fn run_sequence(
    nodes: &[Node],
    input: &StepInput,
    ctx: &ExecutionContext,
    fail_fast: bool,
) -> Result<SequenceOutcome> {
    let mut outcome = SequenceOutcome::default();
    let mut current = input.clone();

    for node in nodes {
        ctx.check_cancelled()?;
        let output = node.execute(&current, ctx).await?;
        current = current.next_input(&output);

        let failed = !output.success;
        let stop = output.stop;
        outcome.outputs.push(output);

        if stop {
            debug!(step = %node.name(), "Early termination requested");
            outcome.stopped = true;
            break;
        }
        if failed && fail_fast {
            break;
        }
    }
    Ok(outcome)
}

/// Ordered sequence of nodes
///
/// Child *i*'s output is child *i+1*'s `previous_step_content`. With the
/// default `fail_fast` the first failing child ends the sequence and its
/// failure becomes the aggregate; otherwise every child runs and the
/// aggregate is marked failed if any child failed.
#[derive(Debug, Clone)]
pub struct Steps {
    name: String,
    description: Option<String>,
    children: Vec<Node>,
    fail_fast: bool,
}

impl Steps {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            children: Vec::new(),
            fail_fast: true,
        }
    }

    /// Append a child
    pub fn add(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Keep running after a failed child
    pub fn continue_on_failure(mut self) -> Self {
        self.fail_fast = false;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }
}

#[async_trait]
impl Runnable for Steps {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput> {
        ctx.check_cancelled()?;
        ctx.emit(WorkflowEventType::StepsStarted, |e| {
            e.with_step_name(&self.name)
                .with_metadata("step_count", self.children.len())
        });

        let outcome = run_sequence(&self.children, input, ctx, self.fail_fast).await?;
        let aggregate = outcome.into_aggregate(&self.name);

        debug!(steps = %self.name, success = aggregate.success, "Steps completed");
        ctx.emit(WorkflowEventType::StepsCompleted, |e| {
            let event = e
                .with_step_name(&self.name)
                .with_content(aggregate.content.clone())
                .with_metadata("success", aggregate.success);
            match &aggregate.error {
                Some(error) => event.with_error(error),
                None => event,
            }
        });
        Ok(aggregate)
    }
}
