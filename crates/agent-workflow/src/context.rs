//! Execution context threaded through the node tree

use crate::event::{EventSink, WorkflowEvent, WorkflowEventType};
use agent_core::{Error, Result, RunContext, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Per-run overrides of node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOverrides {
    /// Cap applied to every loop of the run
    pub max_iterations: Option<usize>,

    /// Caps for individual loops, by loop name; these win over `max_iterations`
    pub loop_max_iterations: HashMap<String, usize>,
}

impl RunOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every loop at `max_iterations`
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Cap the loop named `loop_name` at `max_iterations`
    pub fn with_loop_max_iterations(
        mut self,
        loop_name: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        self.loop_max_iterations
            .insert(loop_name.into(), max_iterations);
        self
    }

    /// Effective cap for `loop_name`, if overridden
    pub fn max_iterations_for(&self, loop_name: &str) -> Option<usize> {
        self.loop_max_iterations
            .get(loop_name)
            .copied()
            .or(self.max_iterations)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == Some(0) {
            return Err(Error::InitializationFailed(
                "max_iterations override must be at least 1".to_string(),
            ));
        }
        if let Some((name, _)) = self.loop_max_iterations.iter().find(|(_, n)| **n == 0) {
            return Err(Error::InitializationFailed(format!(
                "max_iterations override for loop '{name}' must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Everything a node needs while executing
///
/// Cheap to clone; clones share the run's session state, cancellation
/// tree, and event sink.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    run: RunContext,
    sink: Option<EventSink>,
    overrides: Arc<RunOverrides>,
    stream_partials: bool,
}

impl ExecutionContext {
    /// Context without an event sink (blocking execution)
    pub fn new(run: RunContext) -> Self {
        Self {
            run,
            sink: None,
            overrides: Arc::new(RunOverrides::default()),
            stream_partials: true,
        }
    }

    /// Same context, delivering events to `sink`
    pub fn with_sink(&self, sink: EventSink) -> Self {
        Self {
            sink: Some(sink),
            ..self.clone()
        }
    }

    pub fn with_overrides(mut self, overrides: RunOverrides) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    /// Whether unit partial chunks are forwarded as `StepProgress` events
    pub fn with_stream_partials(mut self, stream_partials: bool) -> Self {
        self.stream_partials = stream_partials;
        self
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn run_id(&self) -> &str {
        self.run.run_id()
    }

    pub fn session_state(&self) -> &SessionState {
        self.run.session_state()
    }

    /// Whether events are being collected
    pub fn is_streaming(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn streams_partials(&self) -> bool {
        self.is_streaming() && self.stream_partials
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.is_cancelled()
    }

    /// `Err(Error::Cancelled)` once the run has been cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Context for a group of siblings that can be cancelled together
    pub(crate) fn child_scope(&self) -> Self {
        Self {
            run: self.run.child(),
            ..self.clone()
        }
    }

    /// Same context, with events held in a private buffer
    ///
    /// Returns no buffer when no sink is attached.
    pub(crate) fn buffered(&self) -> (Self, Option<UnboundedReceiver<WorkflowEvent>>) {
        if self.sink.is_none() {
            return (self.clone(), None);
        }
        let (sink, rx) = EventSink::channel();
        (self.with_sink(sink), Some(rx))
    }

    /// Forward everything collected in `buffer` to this context's sink
    pub(crate) fn replay(&self, buffer: Option<UnboundedReceiver<WorkflowEvent>>) {
        if let (Some(sink), Some(mut rx)) = (&self.sink, buffer) {
            while let Ok(event) = rx.try_recv() {
                sink.send(event);
            }
        }
    }

    pub(crate) fn max_iterations_for(&self, loop_name: &str, configured: usize) -> usize {
        self.overrides
            .max_iterations_for(loop_name)
            .unwrap_or(configured)
    }

    /// Emit an event built by `build`; nothing is built when no sink is attached
    pub(crate) fn emit(
        &self,
        event_type: WorkflowEventType,
        build: impl FnOnce(WorkflowEvent) -> WorkflowEvent,
    ) {
        if let Some(sink) = &self.sink {
            sink.send(build(WorkflowEvent::new(event_type, self.run.run_id())));
        }
    }
}
