//! Workflow definition and execution

use crate::config::WorkflowConfig;
use crate::context::{ExecutionContext, RunOverrides};
use crate::event::{EventIter, EventSink, WorkflowEvent, WorkflowEventStream, WorkflowEventType};
use crate::metrics::WorkflowMetrics;
use crate::node::{Node, validate_all};
use crate::step::{Step, panic_message};
use crate::steps::run_sequence;
use crate::workflow_agent::WorkflowAgent;
use agent_core::session::keys;
use agent_core::{
    Agent, Content, Error, Media, Metadata, Result, RunContext, SessionState, StepInput,
    StepOutput,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Input and per-run settings for one workflow run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// The task payload
    pub message: Option<Content>,
    /// Side-channel data handed to every unit
    pub additional_data: Metadata,
    /// Media attached to the task
    pub media: Vec<Media>,
    /// Session to run in; a fresh one is created when absent
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Entries merged into the session state before the run starts
    pub session_state: Metadata,
    pub overrides: RunOverrides,
}

impl RunRequest {
    pub fn new(message: impl Into<Content>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_additional_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Seed a session state entry for this run
    pub fn with_session_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.session_state.insert(key.into(), value.into());
        self
    }

    pub fn with_overrides(mut self, overrides: RunOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

impl From<&str> for RunRequest {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RunRequest {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<Content> for RunRequest {
    fn from(message: Content) -> Self {
        Self::new(message)
    }
}

impl From<Value> for RunRequest {
    fn from(message: Value) -> Self {
        Self::new(message)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Error,
    Cancelled,
}

/// Outcome of a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunResponse {
    pub run_id: String,
    pub session_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    /// Aggregate output of the top-level sequence
    pub output: StepOutput,
    /// Per-step timings gathered from the output tree
    pub metrics: WorkflowMetrics,
    /// Events kept when `store_events` is enabled
    pub events: Vec<WorkflowEvent>,
}

impl WorkflowRunResponse {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn content(&self) -> Option<&Content> {
        self.output.content.as_ref()
    }
}

/// A pipeline of nodes run from start to finish
///
/// The top-level nodes run as a sequence, each receiving the previous one's
/// output. The workflow owns the session state shared by every unit.
///
/// # Example
///
/// ```no_run
/// use agent_core::{RunContext, StepInput};
/// use agent_workflow::{Parallel, Step, Workflow};
///
/// # async fn example() -> agent_core::Result<()> {
/// let workflow = Workflow::builder("research")
///     .add(
///         Parallel::new("gather")
///             .add(Step::function("web", |input: StepInput, _ctx: RunContext| async move {
///                 Ok(format!("web results for {}", input.message_as_string()))
///             }))
///             .add(Step::function("papers", |input: StepInput, _ctx: RunContext| async move {
///                 Ok(format!("papers about {}", input.message_as_string()))
///             })),
///     )
///     .add(Step::function("summarize", |input: StepInput, _ctx: RunContext| async move {
///         Ok(input.previous_content_as_string().unwrap_or_default())
///     }))
///     .build()?;
///
/// let output = workflow.run("rust async runtimes").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Workflow {
    id: String,
    name: String,
    description: Option<String>,
    nodes: Vec<Node>,
    session_state: SessionState,
    config: WorkflowConfig,
}

impl Workflow {
    /// Create a new workflow builder
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Session state shared by every run of this workflow
    pub fn session_state(&self) -> &SessionState {
        &self.session_state
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run to completion and return the full response
    pub async fn execute(&self, request: impl Into<RunRequest>) -> Result<WorkflowRunResponse> {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Run to completion, stopping early once `token` is cancelled
    pub async fn execute_with_cancellation(
        &self,
        request: impl Into<RunRequest>,
        token: CancellationToken,
    ) -> Result<WorkflowRunResponse> {
        let request = request.into();
        request.overrides.validate()?;
        let run_id = Uuid::new_v4().to_string();

        if !self.config.store_events {
            return Ok(self.drive(run_id, request, None, token).await);
        }

        let (sink, mut rx) = EventSink::channel();
        let mut response = self.drive(run_id, request, Some(sink), token).await;
        while let Ok(event) = rx.try_recv() {
            if self.config.should_store(event.event_type) {
                response.events.push(event);
            }
        }
        Ok(response)
    }

    /// Run to completion and return the aggregate output
    ///
    /// A failed run still returns `Ok`, with `success == false` and the
    /// accumulated error text. Only cancellation and invalid requests are
    /// reported as `Err`.
    pub async fn run(&self, request: impl Into<RunRequest>) -> Result<StepOutput> {
        let response = self.execute(request).await?;
        match response.status {
            RunStatus::Cancelled => Err(Error::Cancelled),
            RunStatus::Completed | RunStatus::Error => Ok(response.output),
        }
    }

    /// Start a run on the current Tokio runtime and stream its events
    ///
    /// The stream ends after exactly one terminal event. Dropping it cancels
    /// the run.
    pub fn run_stream(&self, request: impl Into<RunRequest>) -> Result<WorkflowEventStream> {
        let handle = Handle::try_current().map_err(|_| {
            Error::InitializationFailed("run_stream requires a Tokio runtime".to_string())
        })?;
        let request = request.into();
        request.overrides.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        let (sink, rx) = EventSink::channel();

        let workflow = self.clone();
        let run_token = token.clone();
        let id = run_id.clone();
        handle.spawn(async move {
            workflow.drive(id, request, Some(sink), run_token).await;
        });

        Ok(WorkflowEventStream::new(run_id, rx, token))
    }

    /// Blocking equivalent of [`Workflow::run`] for callers outside a runtime
    pub fn run_blocking(&self, request: impl Into<RunRequest>) -> Result<StepOutput> {
        blocking_runtime()?.block_on(self.run(request))
    }

    /// Blocking equivalent of [`Workflow::run_stream`] for callers outside a runtime
    pub fn run_stream_blocking(&self, request: impl Into<RunRequest>) -> Result<EventIter> {
        let runtime = blocking_runtime()?;
        let stream = {
            let _guard = runtime.enter();
            self.run_stream(request)?
        };
        Ok(EventIter::new(stream, runtime))
    }

    async fn drive(
        &self,
        run_id: String,
        request: RunRequest,
        sink: Option<EventSink>,
        token: CancellationToken,
    ) -> WorkflowRunResponse {
        let RunRequest {
            message,
            additional_data,
            media,
            session_id,
            user_id,
            session_state,
            overrides,
        } = request;
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        self.session_state.merge(session_state);
        self.session_state.update(|state| {
            state.insert(keys::WORKFLOW_NAME.to_string(), self.name.clone().into());
            state.insert(keys::RUN_ID.to_string(), run_id.clone().into());
            state.insert(keys::SESSION_ID.to_string(), session_id.clone().into());
            if let Some(user_id) = &user_id {
                state.insert(keys::USER_ID.to_string(), user_id.clone().into());
            }
        });

        let mut run = RunContext::new(session_id.clone())
            .with_run_id(run_id.clone())
            .with_session_state(self.session_state.clone())
            .with_cancellation(token);
        if let Some(user_id) = user_id {
            run = run.with_user_id(user_id);
        }
        let mut ctx = ExecutionContext::new(run)
            .with_overrides(overrides)
            .with_stream_partials(self.config.stream_partials);
        if let Some(sink) = sink {
            ctx = ctx.with_sink(sink);
        }

        let input = StepInput {
            message,
            additional_data,
            media,
            ..StepInput::default()
        };

        info!(
            workflow = %self.name,
            run_id = %run_id,
            session_id = %session_id,
            "Workflow run started"
        );
        ctx.emit(WorkflowEventType::Started, |e| {
            e.with_step_name(&self.name)
                .with_content(input.message.clone())
                .with_metadata("session_id", session_id.as_str())
        });

        let started = Instant::now();
        let sequence = run_sequence(&self.nodes, &input, &ctx, self.config.fail_fast);
        let result = AssertUnwindSafe(sequence)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::ProcessingFailed(format!(
                    "panicked: {}",
                    panic_message(&*panic)
                )))
            });

        let (status, output) = match result {
            Ok(outcome) => {
                let output = outcome.into_aggregate(&self.name);
                if output.success {
                    info!(workflow = %self.name, run_id = %run_id, "Workflow run completed");
                    ctx.emit(WorkflowEventType::Completed, |e| {
                        e.with_step_name(&self.name)
                            .with_content(output.content.clone())
                            .with_metadata("stopped", output.stop)
                    });
                    (RunStatus::Completed, output)
                } else {
                    let error = output.error.clone().unwrap_or_default();
                    warn!(
                        workflow = %self.name,
                        run_id = %run_id,
                        error = %error,
                        "Workflow run failed"
                    );
                    ctx.emit(WorkflowEventType::Error, |e| {
                        e.with_step_name(&self.name)
                            .with_content(output.content.clone())
                            .with_error(error)
                    });
                    (RunStatus::Error, output)
                }
            }
            Err(err) => {
                let status = if err.is_cancelled() {
                    info!(workflow = %self.name, run_id = %run_id, "Workflow run cancelled");
                    RunStatus::Cancelled
                } else {
                    error!(
                        workflow = %self.name,
                        run_id = %run_id,
                        error = %err,
                        "Workflow run aborted"
                    );
                    RunStatus::Error
                };
                ctx.emit(WorkflowEventType::Error, |e| {
                    e.with_step_name(&self.name).with_error(err.to_string())
                });
                (status, StepOutput::failure(&self.name, err.to_string()))
            }
        };

        WorkflowRunResponse {
            run_id,
            session_id,
            workflow_name: self.name.clone(),
            status,
            metrics: WorkflowMetrics::collect(&output, started.elapsed()),
            output,
            events: Vec::new(),
        }
    }
}

fn blocking_runtime() -> Result<Runtime> {
    if Handle::try_current().is_ok() {
        return Err(Error::InitializationFailed(
            "blocking run called inside a Tokio runtime; use the async API instead".to_string(),
        ));
    }
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::InitializationFailed(format!("failed to start runtime: {e}")))
}

/// Builder for constructing workflows
pub struct WorkflowBuilder {
    id: Option<String>,
    name: String,
    description: Option<String>,
    nodes: Vec<Node>,
    executor: Option<Step>,
    session_state: Metadata,
    config: WorkflowConfig,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            executor: None,
            session_state: Metadata::new(),
            config: WorkflowConfig::default(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a top-level node
    pub fn add(mut self, node: impl Into<Node>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Append a step calling `agent`
    pub fn add_agent(self, agent: Arc<dyn Agent>) -> Self {
        self.add(Step::agent(agent))
    }

    /// Append a nested workflow as a single step
    ///
    /// This allows for hierarchical workflow structures.
    pub fn add_workflow(self, workflow: Workflow) -> Self {
        let name = workflow.name().to_string();
        self.add(Step::agent(Arc::new(WorkflowAgent::new(name, workflow))))
    }

    /// Run `f` in place of a step list
    ///
    /// The function receives the run input and context and its result
    /// becomes the workflow output. It cannot be combined with [`add`].
    ///
    /// [`add`]: WorkflowBuilder::add
    pub fn executor<F, Fut, O>(mut self, f: F) -> Self
    where
        F: Fn(StepInput, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Into<StepOutput> + 'static,
    {
        self.executor = Some(Step::function(self.name.clone(), f));
        self
    }

    /// Seed a session state entry shared by every run
    pub fn session_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.session_state.insert(key.into(), value.into());
        self
    }

    pub fn session_state(mut self, state: Metadata) -> Self {
        self.session_state.extend(state);
        self
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    pub fn store_events(mut self, store_events: bool) -> Self {
        self.config.store_events = store_events;
        self
    }

    /// Never store events of `event_type`
    pub fn skip_event(mut self, event_type: WorkflowEventType) -> Self {
        self.config.events_to_skip.push(event_type);
        self
    }

    pub fn stream_partials(mut self, stream_partials: bool) -> Self {
        self.config.stream_partials = stream_partials;
        self
    }

    /// Build the workflow
    pub fn build(self) -> Result<Workflow> {
        let nodes = match self.executor {
            Some(_) if !self.nodes.is_empty() => {
                return Err(Error::InitializationFailed(format!(
                    "workflow '{}' has both steps and an executor",
                    self.name
                )));
            }
            Some(executor) => vec![Node::from(executor)],
            None if self.nodes.is_empty() => {
                return Err(Error::InitializationFailed(format!(
                    "workflow '{}' has no steps",
                    self.name
                )));
            }
            None => self.nodes,
        };
        validate_all(&nodes)?;

        Ok(Workflow {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            description: self.description,
            nodes,
            session_state: SessionState::from_map(self.session_state),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::loops::Loop;
    use crate::parallel::Parallel;
    use crate::router::Router;
    use crate::steps::Steps;
    use crate::test_support::{failing_step, text_step};
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio_test::{assert_err, assert_ok};

    fn event_types(events: &[WorkflowEvent]) -> Vec<WorkflowEventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    fn echo_step(name: &'static str) -> Step {
        Step::function(name, move |input: StepInput, _ctx: RunContext| async move {
            let upstream = input
                .previous_content_as_string()
                .unwrap_or_else(|| input.message_as_string());
            Ok(format!("{name}({upstream})"))
        })
    }

    #[tokio::test]
    async fn test_run_returns_final_aggregate() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("research"))
            .add(echo_step("write"))
            .build()
            .unwrap();

        let output = assert_ok!(workflow.run("rust").await);
        assert!(output.success);
        assert_eq!(output.step_name, "pipeline");
        assert_eq!(output.content_text().as_deref(), Some("write(research(rust))"));
        assert_eq!(output.children.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_lifecycle_events() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("intro"))
            .add(
                Parallel::new("gather")
                    .add(echo_step("web"))
                    .add(echo_step("papers")),
            )
            .add(
                Loop::new("polish")
                    .add(echo_step("edit"))
                    .max_iterations(2),
            )
            .build()
            .unwrap();

        let events: Vec<WorkflowEvent> = workflow.run_stream("topic").unwrap().collect().await;
        let types = event_types(&events);

        assert_eq!(types.first(), Some(&WorkflowEventType::Started));
        assert_eq!(types.last(), Some(&WorkflowEventType::Completed));
        assert_eq!(types.iter().filter(|t| t.is_terminal()).count(), 1);
        for expected in [
            WorkflowEventType::StepStarted,
            WorkflowEventType::StepCompleted,
            WorkflowEventType::ParallelStarted,
            WorkflowEventType::ParallelCompleted,
            WorkflowEventType::LoopStarted,
            WorkflowEventType::LoopIterationCompleted,
            WorkflowEventType::LoopCompleted,
        ] {
            assert!(types.contains(&expected), "missing {expected}");
        }

        let run_id = &events[0].run_id;
        assert!(events.iter().all(|e| &e.run_id == run_id));

        let completed = events.last().unwrap();
        assert!(
            completed
                .content
                .as_ref()
                .is_some_and(|c| c.to_text().starts_with("edit(edit("))
        );
    }

    #[tokio::test]
    async fn test_identical_runs_are_deterministic() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("a"))
            .add(
                Condition::new("long_enough", |input| {
                    Ok(input.previous_content_as_string().unwrap_or_default().len() > 3)
                })
                .then(echo_step("expand"))
                .otherwise(echo_step("shrink")),
            )
            .add(
                Router::new("route", |_, candidates| Ok(vec![candidates[0].clone()]))
                    .route(echo_step("only")),
            )
            .add(
                Parallel::new("gather")
                    .add(Step::function("slow", |input: StepInput, _ctx: RunContext| async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(format!("slow({})", input.message_as_string()))
                    }))
                    .add(echo_step("fast")),
            )
            .add(Loop::new("refine").add(echo_step("b")).max_iterations(2))
            .store_events(true)
            .build()
            .unwrap();

        let first = workflow.execute("seed").await.unwrap();
        let second = workflow.execute("seed").await.unwrap();

        let steps = |events: &[WorkflowEvent]| {
            events
                .iter()
                .map(|e| (e.event_type, e.step_name.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(first.output.content, second.output.content);
        assert_eq!(steps(&first.events), steps(&second.events));
        assert_ne!(first.run_id, second.run_id);
        assert!(!first.events.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_mid_parallel() {
        let a_done = Arc::new(Notify::new());
        let fast_a = {
            let a_done = a_done.clone();
            Step::function("a", move |_input: StepInput, _ctx: RunContext| {
                let a_done = a_done.clone();
                async move {
                    a_done.notify_one();
                    Ok("a-out")
                }
            })
        };
        let b_finished = Arc::new(AtomicBool::new(false));
        let slow_b = {
            let b_finished = b_finished.clone();
            Step::function("b", move |_input: StepInput, _ctx: RunContext| {
                let b_finished = b_finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    b_finished.store(true, Ordering::SeqCst);
                    Ok("b-out")
                }
            })
        };
        let workflow = Workflow::builder("pipeline")
            .add(Parallel::new("fan_out").add(fast_a).add(slow_b))
            .add(text_step("after", "never"))
            .build()
            .unwrap();

        let mut stream = workflow.run_stream("go").unwrap();
        a_done.notified().await;
        stream.cancel();
        let events: Vec<WorkflowEvent> = stream.collect().await;
        tokio::time::sleep(Duration::from_millis(700)).await;

        let types = event_types(&events);
        assert!(!types.contains(&WorkflowEventType::Completed));
        assert_eq!(types.last(), Some(&WorkflowEventType::Error));
        assert_eq!(
            events.last().and_then(|e| e.error.as_deref()),
            Some("Workflow run cancelled")
        );
        // a finished before the cancel, so its buffered events still arrive
        assert!(events.iter().any(|e| {
            e.event_type == WorkflowEventType::StepCompleted && e.step_name.as_deref() == Some("a")
        }));
        assert!(!b_finished.load(Ordering::SeqCst));
        assert!(!events.iter().any(|e| e.step_name.as_deref() == Some("after")));
    }

    #[tokio::test]
    async fn test_panicking_step_ends_run_with_error() {
        let workflow = Workflow::builder("pipeline")
            .add(Step::function("boom", |_input: StepInput, _ctx: RunContext| async {
                if true {
                    panic!("invariant broken");
                }
                Ok("unreachable")
            }))
            .add(echo_step("after"))
            .build()
            .unwrap();

        let events: Vec<WorkflowEvent> = workflow.run_stream("x").unwrap().collect().await;
        let types = event_types(&events);
        assert_eq!(types.last(), Some(&WorkflowEventType::Error));
        assert_eq!(types.iter().filter(|t| t.is_terminal()).count(), 1);
        assert!(!events.iter().any(|e| e.step_name.as_deref() == Some("after")));

        let output = assert_ok!(workflow.run("x").await);
        assert!(!output.success);
        assert_eq!(
            output.error.as_deref(),
            Some("boom: Step 'boom' failed: panicked: invariant broken")
        );
    }

    #[tokio::test]
    async fn test_panicking_predicate_ends_run_with_error() {
        let workflow = Workflow::builder("pipeline")
            .add(
                Condition::new("gate", |_input| -> Result<bool> { panic!("score table missing") })
                    .then(echo_step("t")),
            )
            .build()
            .unwrap();

        let events: Vec<WorkflowEvent> = workflow.run_stream("x").unwrap().collect().await;
        let last = events.last().unwrap();
        assert_eq!(last.event_type, WorkflowEventType::Error);
        assert_eq!(
            last.error.as_deref(),
            Some("Processing failed: panicked: score table missing")
        );
        assert_eq!(events.iter().filter(|e| e.event_type.is_terminal()).count(), 1);

        let response = workflow.execute("x").await.unwrap();
        assert_eq!(response.status, RunStatus::Error);
    }

    #[tokio::test]
    async fn test_response_carries_step_metrics() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("intro"))
            .add(
                Parallel::new("gather")
                    .add(Step::function("web", |_input: StepInput, _ctx: RunContext| async {
                        tokio::time::sleep(Duration::from_millis(25)).await;
                        Ok("web-out")
                    }))
                    .add(echo_step("papers")),
            )
            .add(Loop::new("polish").add(echo_step("edit")).max_iterations(2))
            .build()
            .unwrap();

        let response = workflow.execute("x").await.unwrap();
        let metrics = &response.metrics;

        assert_eq!(metrics.total_steps, 4);
        let names: Vec<_> = metrics.steps.iter().map(|m| m.step_name.as_str()).collect();
        assert_eq!(names, vec!["intro", "web", "papers", "edit"]);
        assert!(metrics.step("web").is_some_and(|m| m.duration_ms >= 25));
        assert!(metrics.duration_ms >= 25);
    }

    #[tokio::test]
    async fn test_custom_executor_replaces_steps() {
        let workflow = Workflow::builder("summarize")
            .executor(|input: StepInput, ctx: RunContext| async move {
                ctx.session_state().insert("summarized", json!(true));
                Ok(format!("summary of {}", input.message_as_string()))
            })
            .store_events(true)
            .build()
            .unwrap();

        let response = workflow.execute("notes").await.unwrap();
        assert!(response.is_success());
        assert_eq!(
            response.output.content_text().as_deref(),
            Some("summary of notes")
        );
        assert_eq!(workflow.session_state().get("summarized"), Some(json!(true)));
        assert_eq!(
            event_types(&response.events),
            vec![
                WorkflowEventType::Started,
                WorkflowEventType::StepStarted,
                WorkflowEventType::StepCompleted,
                WorkflowEventType::Completed,
            ]
        );
        assert_eq!(response.metrics.total_steps, 1);
    }

    #[test]
    fn test_build_rejects_steps_with_executor() {
        let err = Workflow::builder("mixed")
            .add(echo_step("a"))
            .executor(|_input: StepInput, _ctx: RunContext| async { Ok("x") })
            .build()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Initialization failed: workflow 'mixed' has both steps and an executor"
        );
    }

    #[tokio::test]
    async fn test_fatal_predicate_ends_stream_with_error() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("a"))
            .add(
                Condition::new("broken", |_| Err(Error::Generic("no score".to_string())))
                    .then(echo_step("t")),
            )
            .add(echo_step("after"))
            .build()
            .unwrap();

        let events: Vec<WorkflowEvent> = workflow.run_stream("x").unwrap().collect().await;
        let last = events.last().unwrap();
        assert_eq!(last.event_type, WorkflowEventType::Error);
        assert_eq!(
            last.error.as_deref(),
            Some("Predicate evaluation failed in 'broken': no score")
        );
        assert!(!events.iter().any(|e| e.step_name.as_deref() == Some("after")));

        let response = workflow.execute("x").await.unwrap();
        assert_eq!(response.status, RunStatus::Error);
        assert!(!response.output.success);
    }

    #[tokio::test]
    async fn test_failed_step_fails_run() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("a"))
            .add(failing_step("b", "quota exceeded"))
            .add(echo_step("c"))
            .build()
            .unwrap();

        let response = workflow.execute("x").await.unwrap();
        assert_eq!(response.status, RunStatus::Error);
        assert_eq!(response.output.error.as_deref(), Some("b: quota exceeded"));
        assert_eq!(response.output.children.len(), 2);

        let lenient = Workflow::builder("pipeline")
            .add(failing_step("b", "quota exceeded"))
            .add(echo_step("c"))
            .fail_fast(false)
            .build()
            .unwrap();
        let output = lenient.run("x").await.unwrap();
        assert!(!output.success);
        assert_eq!(output.children.len(), 2);
    }

    #[tokio::test]
    async fn test_early_stop_completes_run() {
        let workflow = Workflow::builder("pipeline")
            .add(Step::function("gate", |_input: StepInput, _ctx: RunContext| async {
                Ok(StepOutput::new("nothing to do").stop_workflow())
            }))
            .add(failing_step("never", "should not run"))
            .store_events(true)
            .build()
            .unwrap();

        let response = workflow.execute("x").await.unwrap();
        assert_eq!(response.status, RunStatus::Completed);
        assert!(response.output.stop);
        assert_eq!(
            response.events.last().map(|e| e.metadata["stopped"].clone()),
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn test_session_state_is_shared_and_seeded() {
        let workflow = Workflow::builder("pipeline")
            .session_value("tone", "formal")
            .add(Step::function("writer", |_input: StepInput, ctx: RunContext| async move {
                let tone = ctx.session_state().get("tone").unwrap_or_default();
                ctx.session_state().insert("draft_count", json!(1));
                Ok(format!("tone={tone}"))
            }))
            .build()
            .unwrap();

        let request = RunRequest::new("x")
            .with_session_id("sess-1")
            .with_user_id("user-7")
            .with_session_value("tone", "casual");
        let response = workflow.execute(request).await.unwrap();

        assert_eq!(
            response.output.content_text().as_deref(),
            Some("tone=\"casual\"")
        );
        let state = workflow.session_state();
        assert_eq!(state.get("draft_count"), Some(json!(1)));
        assert_eq!(state.session_id().as_deref(), Some("sess-1"));
        assert_eq!(state.user_id().as_deref(), Some("user-7"));
        assert_eq!(state.workflow_name().as_deref(), Some("pipeline"));
        assert_eq!(state.run_id(), Some(response.run_id));
    }

    #[tokio::test]
    async fn test_stored_events_respect_skip_list() {
        let workflow = Workflow::builder("pipeline")
            .add(Steps::new("inner").add(echo_step("a")))
            .store_events(true)
            .skip_event(WorkflowEventType::StepStarted)
            .build()
            .unwrap();

        let response = workflow.execute("x").await.unwrap();
        let types = event_types(&response.events);
        assert!(!types.contains(&WorkflowEventType::StepStarted));
        assert_eq!(
            types,
            vec![
                WorkflowEventType::Started,
                WorkflowEventType::StepsStarted,
                WorkflowEventType::StepCompleted,
                WorkflowEventType::StepsCompleted,
                WorkflowEventType::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_overrides_rejected() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("a"))
            .build()
            .unwrap();
        let request =
            RunRequest::new("x").with_overrides(RunOverrides::new().with_max_iterations(0));
        assert_err!(workflow.execute(request).await);
    }

    #[tokio::test]
    async fn test_blocking_api_refuses_inside_runtime() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("a"))
            .build()
            .unwrap();
        assert!(matches!(
            workflow.run_blocking("x"),
            Err(Error::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_blocking_run_and_stream() {
        let workflow = Workflow::builder("pipeline")
            .add(echo_step("a"))
            .build()
            .unwrap();

        let output = workflow.run_blocking("x").unwrap();
        assert_eq!(output.content_text().as_deref(), Some("a(x)"));

        let types: Vec<_> = workflow
            .run_stream_blocking("x")
            .unwrap()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                WorkflowEventType::Started,
                WorkflowEventType::StepStarted,
                WorkflowEventType::StepCompleted,
                WorkflowEventType::Completed,
            ]
        );
    }

    #[test]
    fn test_build_rejects_empty_workflow() {
        let err = Workflow::builder("empty").build().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Initialization failed: workflow 'empty' has no steps"
        );
        assert!(
            Workflow::builder("bad")
                .add(Parallel::new("nothing"))
                .build()
                .is_err()
        );
    }
}
