//! Fan-out/fan-in composite

use crate::context::ExecutionContext;
use crate::event::WorkflowEventType;
use crate::node::Node;
use crate::runnable::Runnable;
use crate::step::panic_message;
use agent_core::{Error, Result, StepInput, StepOutput};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

/// Siblings run concurrently on the same input
///
/// Every sibling receives the composite's own incoming input and never sees
/// another sibling's output. The aggregate lists sibling outputs in
/// declaration order regardless of completion order.
///
/// Siblings share the run's session state. Writes from concurrent siblings
/// are not coordinated: the last writer wins.
///
/// Each sibling's events are held until the group joins and are then
/// forwarded sibling by sibling in declaration order, so identical runs
/// produce identical event sequences.
#[derive(Debug, Clone)]
pub struct Parallel {
    name: String,
    description: Option<String>,
    children: Vec<Node>,
    fail_fast: bool,
}

impl Parallel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            children: Vec::new(),
            fail_fast: false,
        }
    }

    /// Add a sibling
    pub fn add(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Cancel outstanding siblings as soon as one fails
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

    fn aggregate(&self, children: Vec<StepOutput>, cancelled: Vec<String>) -> StepOutput {
        let sections: Vec<String> = children
            .iter()
            .filter_map(|child| {
                child
                    .content
                    .as_ref()
                    .map(|c| format!("=== {} ===\n{}", child.step_name, c.to_text()))
            })
            .collect();
        let errors: Vec<String> = children
            .iter()
            .filter(|c| !c.success)
            .map(|c| format!("{}: {}", c.step_name, c.error.as_deref().unwrap_or("failed")))
            .collect();

        let mut aggregate = StepOutput::empty(&self.name);
        if !sections.is_empty() {
            aggregate.content = Some(sections.join("\n\n").into());
        }
        aggregate.media = children
            .iter()
            .flat_map(|c| c.media.iter().cloned())
            .collect();
        aggregate.stop = children.iter().any(|c| c.stop);
        aggregate
            .metadata
            .insert("parallel_step_count".to_string(), self.children.len().into());
        if !cancelled.is_empty() {
            aggregate
                .metadata
                .insert("cancelled_steps".to_string(), cancelled.into());
        }
        aggregate.children = children;

        if errors.is_empty() {
            aggregate
        } else {
            aggregate.into_failure(errors.join("; "))
        }
    }
}

type SiblingResult = std::thread::Result<Result<StepOutput>>;

/// Sibling results collected as their tasks finish
struct FanIn<'a> {
    parallel: &'a Parallel,
    group: &'a ExecutionContext,
    slots: Vec<Option<StepOutput>>,
    cancelled: Vec<usize>,
    fatal: Option<Error>,
}

impl<'a> FanIn<'a> {
    fn new(parallel: &'a Parallel, group: &'a ExecutionContext) -> Self {
        Self {
            parallel,
            group,
            slots: vec![None; parallel.children.len()],
            cancelled: Vec::new(),
            fatal: None,
        }
    }

    fn record(&mut self, joined: std::result::Result<(usize, SiblingResult), JoinError>) {
        let (index, result) = match joined {
            Ok(pair) => pair,
            Err(join_error) => {
                // attributed to its sibling by `settle`
                warn!(parallel = %self.parallel.name, error = %join_error, "Sibling task aborted");
                return;
            }
        };
        let sibling = self.parallel.children[index].name();

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(Error::Cancelled)) => {
                self.cancelled.push(index);
                return;
            }
            Ok(Err(err)) => {
                self.group.run().cancellation().cancel();
                if self.fatal.is_none() {
                    self.fatal = Some(err);
                }
                return;
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                warn!(
                    parallel = %self.parallel.name,
                    step = %sibling,
                    panic = %message,
                    "Sibling panicked"
                );
                StepOutput::failure(sibling, format!("panicked: {message}"))
            }
        };
        self.finish(index, output);
    }

    fn finish(&mut self, index: usize, output: StepOutput) {
        if !output.success && self.parallel.fail_fast {
            debug!(
                parallel = %self.parallel.name,
                step = %output.step_name,
                "Cancelling remaining siblings"
            );
            self.group.run().cancellation().cancel();
        }
        self.slots[index] = Some(output);
    }

    /// Fail every sibling whose task ended without reporting a result
    fn settle(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].is_none() && !self.cancelled.contains(&index) {
                let sibling = self.parallel.children[index].name();
                self.slots[index] = Some(StepOutput::failure(
                    sibling,
                    "sibling task ended without a result",
                ));
            }
        }
    }

    /// Names of cancelled siblings, in declaration order
    fn cancelled_names(&self) -> Vec<String> {
        let mut indices = self.cancelled.clone();
        indices.sort_unstable();
        indices
            .into_iter()
            .map(|index| self.parallel.children[index].name().to_string())
            .collect()
    }
}

#[async_trait]
impl Runnable for Parallel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput> {
        ctx.check_cancelled()?;
        debug!(parallel = %self.name, siblings = self.children.len(), "Parallel started");
        ctx.emit(WorkflowEventType::ParallelStarted, |e| {
            e.with_step_name(&self.name)
                .with_metadata("parallel_step_count", self.children.len())
        });

        let group = ctx.child_scope();
        let mut join_set = JoinSet::new();
        let mut buffers = Vec::with_capacity(self.children.len());
        for (index, node) in self.children.iter().enumerate() {
            let (sibling_ctx, buffer) = group.buffered();
            buffers.push(buffer);
            let node = node.clone();
            let input = input.clone();
            join_set.spawn(async move {
                let result = AssertUnwindSafe(node.execute(&input, &sibling_ctx))
                    .catch_unwind()
                    .await;
                (index, result)
            });
        }

        let mut fan_in = FanIn::new(self, &group);
        while let Some(joined) = join_set.join_next().await {
            fan_in.record(joined);
        }

        // sibling events in declaration order, not completion order
        for buffer in buffers {
            ctx.replay(buffer);
        }

        ctx.check_cancelled()?;
        if let Some(err) = fan_in.fatal.take() {
            return Err(err);
        }
        fan_in.settle();

        let cancelled = fan_in.cancelled_names();
        let aggregate = self.aggregate(fan_in.slots.into_iter().flatten().collect(), cancelled);

        ctx.emit(WorkflowEventType::ParallelCompleted, |e| {
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
