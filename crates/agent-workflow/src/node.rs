//! Closed set of node kinds the engine dispatches over

use crate::condition::Condition;
use crate::context::ExecutionContext;
use crate::loops::Loop;
use crate::parallel::Parallel;
use crate::router::Router;
use crate::runnable::Runnable;
use crate::step::Step;
use crate::steps::Steps;
use agent_core::{Error, Result, StepInput, StepOutput};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A leaf step or any composite
///
/// Cloning is cheap; clones share the underlying definition.
#[derive(Clone)]
pub enum Node {
    Step(Arc<Step>),
    Steps(Arc<Steps>),
    Parallel(Arc<Parallel>),
    Condition(Arc<Condition>),
    Loop(Arc<Loop>),
    Router(Arc<Router>),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::Step(step) => step.name(),
            Self::Steps(steps) => steps.name(),
            Self::Parallel(parallel) => parallel.name(),
            Self::Condition(condition) => condition.name(),
            Self::Loop(l) => l.name(),
            Self::Router(router) => router.name(),
        }
    }

    /// Kind of node, as used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Step(_) => "step",
            Self::Steps(_) => "steps",
            Self::Parallel(_) => "parallel",
            Self::Condition(_) => "condition",
            Self::Loop(_) => "loop",
            Self::Router(_) => "router",
        }
    }

    /// Check structural constraints of this node and everything below it
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(Error::InitializationFailed(format!(
                "{} '{}' {reason}",
                self.kind(),
                self.name()
            )))
        };

        match self {
            Self::Step(_) => Ok(()),
            Self::Steps(steps) => {
                if steps.children().is_empty() {
                    return invalid("has no steps");
                }
                validate_all(steps.children())
            }
            Self::Parallel(parallel) => {
                if parallel.children().is_empty() {
                    return invalid("has no steps");
                }
                validate_all(parallel.children())
            }
            Self::Condition(condition) => {
                if condition.on_true().is_empty() && condition.on_false().is_empty() {
                    return invalid("has no branch");
                }
                validate_all(condition.on_true())?;
                validate_all(condition.on_false())
            }
            Self::Loop(l) => {
                if l.body().is_empty() {
                    return invalid("has no steps");
                }
                if l.configured_max_iterations() == 0 {
                    return invalid("must allow at least one iteration");
                }
                validate_all(l.body())
            }
            Self::Router(router) => {
                if router.candidates().is_empty() {
                    return invalid("has no routes");
                }
                let mut seen = HashSet::new();
                if let Some(duplicate) = router
                    .candidates()
                    .iter()
                    .find(|c| !seen.insert(c.name()))
                {
                    return invalid(&format!("has duplicate route '{}'", duplicate.name()));
                }
                validate_all(router.candidates())
            }
        }
    }
}

pub(crate) fn validate_all(nodes: &[Node]) -> Result<()> {
    nodes.iter().try_for_each(Node::validate)
}

#[async_trait]
impl Runnable for Node {
    fn name(&self) -> &str {
        Node::name(self)
    }

    async fn execute(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput> {
        match self {
            Self::Step(step) => step.execute(input, ctx).await,
            Self::Steps(steps) => steps.execute(input, ctx).await,
            Self::Parallel(parallel) => parallel.execute(input, ctx).await,
            Self::Condition(condition) => condition.execute(input, ctx).await,
            Self::Loop(l) => l.execute(input, ctx).await,
            Self::Router(router) => router.execute(input, ctx).await,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(step) => fmt::Debug::fmt(step, f),
            Self::Steps(steps) => fmt::Debug::fmt(steps, f),
            Self::Parallel(parallel) => fmt::Debug::fmt(parallel, f),
            Self::Condition(condition) => fmt::Debug::fmt(condition, f),
            Self::Loop(l) => fmt::Debug::fmt(l, f),
            Self::Router(router) => fmt::Debug::fmt(router, f),
        }
    }
}

macro_rules! impl_from_node {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Node {
                fn from(value: $variant) -> Self {
                    Self::$variant(Arc::new(value))
                }
            }

            impl From<Arc<$variant>> for Node {
                fn from(value: Arc<$variant>) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_node!(Step, Steps, Parallel, Condition, Loop, Router);
