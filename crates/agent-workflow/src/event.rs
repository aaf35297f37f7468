//! Workflow lifecycle events
//!
//! Every event carries the run it belongs to, the emitting step (when there
//! is one), optional content, and a UTC timestamp. A run's event sequence
//! always ends with exactly one terminal event: `Completed` or `Error`.

use agent_core::{Content, Metadata};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Type of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    Started,
    Completed,
    Error,
    StepStarted,
    StepProgress,
    StepCompleted,
    StepError,
    StepsStarted,
    StepsCompleted,
    ParallelStarted,
    ParallelCompleted,
    ConditionStarted,
    ConditionCompleted,
    LoopStarted,
    LoopIterationStarted,
    LoopIterationCompleted,
    LoopCompleted,
    RouterStarted,
    RouterCompleted,
}

impl WorkflowEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::StepStarted => "step_started",
            Self::StepProgress => "step_progress",
            Self::StepCompleted => "step_completed",
            Self::StepError => "step_error",
            Self::StepsStarted => "steps_started",
            Self::StepsCompleted => "steps_completed",
            Self::ParallelStarted => "parallel_started",
            Self::ParallelCompleted => "parallel_completed",
            Self::ConditionStarted => "condition_started",
            Self::ConditionCompleted => "condition_completed",
            Self::LoopStarted => "loop_started",
            Self::LoopIterationStarted => "loop_iteration_started",
            Self::LoopIterationCompleted => "loop_iteration_completed",
            Self::LoopCompleted => "loop_completed",
            Self::RouterStarted => "router_started",
            Self::RouterCompleted => "router_completed",
        }
    }

    /// Whether this event ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_type: WorkflowEventType,

    /// Run that emitted the event
    pub run_id: String,

    /// Emitting step or composite, if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,

    /// Content or partial content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Metadata,

    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(event_type: WorkflowEventType, run_id: impl Into<String>) -> Self {
        Self {
            event_type,
            run_id: run_id.into(),
            step_name: None,
            content: None,
            error: None,
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_step_name(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = Some(step_name.into());
        self
    }

    pub fn with_content(mut self, content: Option<Content>) -> Self {
        self.content = content;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Sending half of a run's event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl EventSink {
    /// Create a sink and the receiver it feeds
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver an event; a closed receiver is ignored
    pub fn send(&self, event: WorkflowEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped, discarding event");
        }
    }
}

/// Live event stream of a workflow run
///
/// Events arrive in generation order. Dropping the stream cancels the run.
pub struct WorkflowEventStream {
    run_id: String,
    rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl WorkflowEventStream {
    pub(crate) fn new(
        run_id: String,
        rx: mpsc::UnboundedReceiver<WorkflowEvent>,
        token: CancellationToken,
    ) -> Self {
        let guard = token.clone().drop_guard();
        Self {
            run_id,
            rx,
            token,
            _guard: guard,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request cancellation of the run
    ///
    /// The stream keeps delivering the events emitted while the run winds
    /// down and ends after the terminal `Error` event.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Receive the next event
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        self.rx.recv().await
    }
}

impl Stream for WorkflowEventStream {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl fmt::Debug for WorkflowEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEventStream")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Blocking iterator over a workflow run's events
///
/// Owns the runtime driving the run; returned by
/// [`Workflow::run_stream_blocking`](crate::Workflow::run_stream_blocking).
pub struct EventIter {
    // declared before `runtime` so the stream is dropped first
    stream: WorkflowEventStream,
    runtime: tokio::runtime::Runtime,
}

impl EventIter {
    pub(crate) fn new(stream: WorkflowEventStream, runtime: tokio::runtime::Runtime) -> Self {
        Self { stream, runtime }
    }

    pub fn cancel(&self) {
        self.stream.cancel();
    }
}

impl Iterator for EventIter {
    type Item = WorkflowEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.recv())
    }
}
