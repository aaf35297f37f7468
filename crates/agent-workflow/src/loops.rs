//! Bounded-iteration composite

use crate::condition::predicate_failure;
use crate::context::ExecutionContext;
use crate::event::WorkflowEventType;
use crate::node::Node;
use crate::runnable::Runnable;
use crate::steps::run_sequence;
use agent_core::{Result, StepInput, StepOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Iteration cap used when none is configured
pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// Decides, from one iteration's outputs, whether the loop is done
pub type EndCondition = Arc<dyn Fn(&[StepOutput]) -> agent_core::Result<bool> + Send + Sync>;

/// Why a loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopTermination {
    /// The end condition returned true
    EndCondition,
    /// The iteration cap was reached; a normal terminal state
    MaxIterations,
    /// A body output requested early termination
    Stopped,
    /// An iteration failed
    Failed,
}

impl LoopTermination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndCondition => "end_condition",
            Self::MaxIterations => "max_iterations",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Read the termination recorded in a loop's output metadata
    pub fn from_output(output: &StepOutput) -> Option<Self> {
        output
            .metadata
            .get("termination")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Runs its body repeatedly until an end condition holds
///
/// Iterations are strictly sequential; each one receives the previous
/// iteration's outputs as history. The loop always stops after
/// `max_iterations`. The aggregate is the final iteration's result; earlier
/// iterations are only visible through lifecycle events.
#[derive(Clone)]
pub struct Loop {
    name: String,
    description: Option<String>,
    body: Vec<Node>,
    end_condition: Option<EndCondition>,
    max_iterations: usize,
}

impl Loop {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            body: Vec::new(),
            end_condition: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Append a node to the loop body
    pub fn add(mut self, node: impl Into<Node>) -> Self {
        self.body.push(node.into());
        self
    }

    /// Stop once `f` returns true for an iteration's outputs
    pub fn end_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&[StepOutput]) -> agent_core::Result<bool> + Send + Sync + 'static,
    {
        self.end_condition = Some(Arc::new(f));
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn body(&self) -> &[Node] {
        &self.body
    }

    pub fn configured_max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn should_end(&self, outputs: &[StepOutput]) -> Result<bool> {
        match &self.end_condition {
            Some(f) => f(outputs).map_err(|err| predicate_failure(&self.name, err)),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Runnable for Loop {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput> {
        ctx.check_cancelled()?;
        let max_iterations = ctx.max_iterations_for(&self.name, self.max_iterations);
        info!(loop_name = %self.name, max_iterations, "Loop started");
        ctx.emit(WorkflowEventType::LoopStarted, |e| {
            e.with_step_name(&self.name)
                .with_metadata("max_iterations", max_iterations)
        });

        let mut current = input.clone();
        let mut iteration = 0;
        let (last, termination) = loop {
            iteration += 1;
            ctx.check_cancelled()?;
            debug!(loop_name = %self.name, iteration, "Loop iteration started");
            ctx.emit(WorkflowEventType::LoopIterationStarted, |e| {
                e.with_step_name(&self.name)
                    .with_metadata("iteration", iteration)
                    .with_metadata("max_iterations", max_iterations)
            });

            let outcome = run_sequence(&self.body, &current, ctx, true).await?;
            let termination = if outcome.failed() {
                Some(LoopTermination::Failed)
            } else if outcome.stopped {
                Some(LoopTermination::Stopped)
            } else {
                match self.should_end(&outcome.outputs) {
                    Ok(true) => Some(LoopTermination::EndCondition),
                    Ok(false) if iteration >= max_iterations => {
                        Some(LoopTermination::MaxIterations)
                    }
                    Ok(false) => None,
                    Err(err) => {
                        error!(loop_name = %self.name, error = %err, "Loop end condition failed");
                        return Err(err);
                    }
                }
            };

            ctx.emit(WorkflowEventType::LoopIterationCompleted, |e| {
                e.with_step_name(&self.name)
                    .with_content(outcome.outputs.last().and_then(|o| o.content.clone()))
                    .with_metadata("iteration", iteration)
                    .with_metadata("max_iterations", max_iterations)
                    .with_metadata("should_continue", termination.is_none())
            });

            match termination {
                Some(termination) => break (outcome, termination),
                None => {
                    current = outcome
                        .outputs
                        .iter()
                        .fold(current, |acc, output| acc.next_input(output));
                }
            }
        };

        let mut output = last.into_aggregate(&self.name);
        output.metadata.insert("iterations".to_string(), iteration.into());
        output
            .metadata
            .insert("max_iterations".to_string(), max_iterations.into());
        output.metadata.insert(
            "max_iterations_reached".to_string(),
            (termination == LoopTermination::MaxIterations).into(),
        );
        output
            .metadata
            .insert("termination".to_string(), termination.as_str().into());

        info!(
            loop_name = %self.name,
            iterations = iteration,
            termination = termination.as_str(),
            "Loop completed"
        );
        ctx.emit(WorkflowEventType::LoopCompleted, |e| {
            e.with_step_name(&self.name)
                .with_content(output.content.clone())
                .with_metadata("iterations", iteration)
                .with_metadata("termination", termination.as_str())
                .with_metadata("success", output.success)
        });
        Ok(output)
    }
}

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("name", &self.name)
            .field("body", &self.body)
            .field("max_iterations", &self.max_iterations)
            .field("has_end_condition", &self.end_condition.is_some())
            .finish_non_exhaustive()
    }
}
