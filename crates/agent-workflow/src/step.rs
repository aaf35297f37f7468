//! Leaf step wrapping a single unit

use crate::context::ExecutionContext;
use crate::event::WorkflowEventType;
use crate::runnable::Runnable;
use crate::units::{AgentUnit, FunctionUnit, PartialCollector, StreamingFunctionUnit};
use agent_core::{
    Agent, Error, Result, RunContext, StepInput, StepMetrics, StepOutput, Unit, UnitEvent,
    UnitKind,
};
use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Text carried by a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Leaf node: one agent, team, or function call
///
/// Errors raised by the unit, and panics inside it, become a failed
/// [`StepOutput`]; only cancellation and predicate failures escape as `Err`.
///
/// # Example
///
/// ```
/// use agent_core::{RunContext, StepInput};
/// use agent_workflow::Step;
///
/// let step = Step::function("greet", |input: StepInput, _ctx: RunContext| async move {
///     Ok(format!("hello {}", input.message_as_string()))
/// });
/// assert_eq!(step.name(), "greet");
/// ```
pub struct Step {
    name: String,
    description: Option<String>,
    unit: Arc<dyn Unit>,
    timeout: Option<Duration>,
}

impl Step {
    /// Wrap an arbitrary unit under `name`
    pub fn new(name: impl Into<String>, unit: Arc<dyn Unit>) -> Self {
        Self {
            name: name.into(),
            description: None,
            unit,
            timeout: None,
        }
    }

    /// Step calling an agent; named after the agent
    pub fn agent(agent: Arc<dyn Agent>) -> Self {
        let name = agent.name().to_string();
        Self::new(name, Arc::new(AgentUnit::agent(agent)))
    }

    /// Step calling a team of agents; named after the team
    pub fn team(team: Arc<dyn Agent>) -> Self {
        let name = team.name().to_string();
        Self::new(name, Arc::new(AgentUnit::team(team)))
    }

    /// Step calling an async function
    pub fn function<F, Fut, O>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepInput, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Into<StepOutput> + 'static,
    {
        let name = name.into();
        Self::new(name.clone(), Arc::new(FunctionUnit::new(name, f)))
    }

    /// Step calling a function that streams partial content
    pub fn streaming<F, S>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepInput, RunContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<UnitEvent>> + Send + 'static,
    {
        let name = name.into();
        Self::new(name.clone(), Arc::new(StreamingFunctionUnit::new(name, f)))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Fail the step when the unit takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> UnitKind {
        self.unit.kind()
    }

    async fn call_unit(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput> {
        if !ctx.streams_partials() {
            return self.unit.execute(input, ctx.run()).await;
        }

        let mut stream = self.unit.stream(input, ctx.run());
        let mut collector = PartialCollector::default();
        while let Some(event) = stream.next().await {
            let event = event?;
            if let UnitEvent::Partial(content) = &event {
                ctx.emit(WorkflowEventType::StepProgress, |e| {
                    e.with_step_name(&self.name)
                        .with_content(Some(content.clone()))
                });
            }
            if let Some(output) = collector.push(event) {
                return Ok(output);
            }
        }
        collector.finish(self.unit.name())
    }

    async fn call_with_timeout(
        &self,
        input: &StepInput,
        ctx: &ExecutionContext,
    ) -> Result<StepOutput> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.call_unit(input, ctx))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::unit(
                        &self.name,
                        format!("timed out after {} ms", limit.as_millis()),
                    ))
                }),
            None => self.call_unit(input, ctx).await,
        }
    }

    fn stamp(&self, mut output: StepOutput, elapsed: Duration) -> StepOutput {
        output.step_name.clone_from(&self.name);
        output.metrics = Some(StepMetrics::new(
            &self.name,
            self.kind(),
            self.unit.name(),
            elapsed,
        ));
        output
            .metadata
            .insert("executor_type".to_string(), self.kind().as_str().into());
        output
            .metadata
            .insert("executor_name".to_string(), self.unit.name().into());
        if !output.success && output.error.as_deref().is_none_or(|e| e.trim().is_empty()) {
            output = output.into_failure("");
        }
        output
    }
}

#[async_trait]
impl Runnable for Step {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput> {
        ctx.check_cancelled()?;
        debug!(step = %self.name, executor = %self.unit.name(), "Step started");
        ctx.emit(WorkflowEventType::StepStarted, |e| {
            e.with_step_name(&self.name)
                .with_metadata("executor_type", self.kind().as_str())
                .with_metadata("executor_name", self.unit.name())
        });

        let started = Instant::now();
        let call = AssertUnwindSafe(self.call_with_timeout(input, ctx)).catch_unwind();
        let result = tokio::select! {
            biased;
            () = ctx.run().cancellation().cancelled() => Err(Error::Cancelled),
            caught = call => caught.unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                warn!(step = %self.name, panic = %message, "Unit panicked");
                Err(Error::unit(&self.name, format!("panicked: {message}")))
            }),
        };
        let elapsed = started.elapsed();

        let output = match result {
            Ok(output) => self.stamp(output, elapsed),
            Err(err) if err.is_fatal() => {
                debug!(step = %self.name, error = %err, "Step aborted");
                return Err(err);
            }
            Err(err) => self.stamp(StepOutput::failure(&self.name, err.to_string()), elapsed),
        };

        if output.success {
            debug!(step = %self.name, "Step completed");
            ctx.emit(WorkflowEventType::StepCompleted, |e| {
                e.with_step_name(&self.name)
                    .with_content(output.content.clone())
                    .with_metadata("success", true)
            });
        } else {
            let error = output.error.clone().unwrap_or_default();
            warn!(step = %self.name, error = %error, "Step failed");
            ctx.emit(WorkflowEventType::StepError, |e| {
                e.with_step_name(&self.name)
                    .with_content(output.content.clone())
                    .with_error(error)
            });
        }
        Ok(output)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
