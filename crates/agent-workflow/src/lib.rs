//! Composable step-execution engine for agent-rs
//!
//! This crate assembles units (agents, teams, plain functions) into
//! sequences, parallel groups, predicate-gated branches, bounded loops, and
//! dynamic routers, and drives them with a [`Workflow`] that streams
//! lifecycle events while it runs.

pub mod condition;
pub mod config;
pub mod context;
pub mod event;
pub mod loops;
pub mod metrics;
pub mod node;
pub mod parallel;
pub mod router;
pub mod runnable;
pub mod step;
pub mod steps;
pub mod units;
pub mod workflow;
pub mod workflow_agent;

// Re-export for convenience
pub use condition::{Condition, FnPredicate, Predicate};
pub use config::WorkflowConfig;
pub use context::{ExecutionContext, RunOverrides};
pub use event::{EventIter, EventSink, WorkflowEvent, WorkflowEventStream, WorkflowEventType};
pub use loops::{DEFAULT_MAX_ITERATIONS, EndCondition, Loop, LoopTermination};
pub use metrics::WorkflowMetrics;
pub use node::Node;
pub use parallel::Parallel;
pub use router::{FnSelector, Router, Selector};
pub use runnable::{Runnable, StreamItem};
pub use step::Step;
pub use steps::Steps;
pub use units::{AgentUnit, FunctionUnit, StreamingFunctionUnit};
pub use workflow::{RunRequest, RunStatus, Workflow, WorkflowBuilder, WorkflowRunResponse};
pub use workflow_agent::WorkflowAgent;
