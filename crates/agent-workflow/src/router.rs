//! Dynamic-selection composite

use crate::condition::predicate_failure;
use crate::context::ExecutionContext;
use crate::event::WorkflowEventType;
use crate::node::Node;
use crate::runnable::Runnable;
use crate::steps::run_sequence;
use agent_core::{Error, Result, RunContext, StepInput, StepOutput};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Picks which candidates of a [`Router`] run
///
/// Receives the candidate names so an implementation backed by a model call
/// can classify the input against them.
#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(
        &self,
        input: &StepInput,
        ctx: &RunContext,
        candidates: &[String],
    ) -> Result<Vec<String>>;
}

/// Selector backed by a synchronous closure
pub struct FnSelector<F>(F);

impl<F> FnSelector<F>
where
    F: Fn(&StepInput, &[String]) -> Result<Vec<String>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Selector for FnSelector<F>
where
    F: Fn(&StepInput, &[String]) -> Result<Vec<String>> + Send + Sync,
{
    async fn select(
        &self,
        input: &StepInput,
        _ctx: &RunContext,
        candidates: &[String],
    ) -> Result<Vec<String>> {
        (self.0)(input, candidates)
    }
}

/// Runs the candidates a selector picks at run time
///
/// Selected candidates run sequentially in the order the selector returned
/// them, each one chained onto the previous. An empty selection passes the
/// incoming `previous_step_content` through. A selector error, or a
/// selection naming an unknown candidate, is fatal to the run.
#[derive(Clone)]
pub struct Router {
    name: String,
    description: Option<String>,
    selector: Arc<dyn Selector>,
    candidates: Vec<Node>,
    fail_fast: bool,
}

impl Router {
    /// Router choosing with a synchronous closure
    pub fn new<F>(name: impl Into<String>, selector: F) -> Self
    where
        F: Fn(&StepInput, &[String]) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        Self::with_selector(name, Arc::new(FnSelector::new(selector)))
    }

    /// Router choosing with an arbitrary (possibly async) selector
    pub fn with_selector(name: impl Into<String>, selector: Arc<dyn Selector>) -> Self {
        Self {
            name: name.into(),
            description: None,
            selector,
            candidates: Vec::new(),
            fail_fast: true,
        }
    }

    /// Register a candidate under its node name
    pub fn route(mut self, node: impl Into<Node>) -> Self {
        self.candidates.push(node.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Keep running selected candidates after one fails
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

    pub fn candidates(&self) -> &[Node] {
        &self.candidates
    }

    pub fn candidate_names(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.name().to_string()).collect()
    }

    fn resolve(&self, selected: &[String]) -> Result<Vec<Node>> {
        selected
            .iter()
            .map(|name| {
                self.candidates
                    .iter()
                    .find(|c| c.name() == name)
                    .cloned()
                    .ok_or_else(|| {
                        Error::predicate(&self.name, format!("unknown route '{name}'"))
                    })
            })
            .collect()
    }
}

#[async_trait]
impl Runnable for Router {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput> {
        ctx.check_cancelled()?;
        ctx.emit(WorkflowEventType::RouterStarted, |e| {
            e.with_step_name(&self.name)
                .with_metadata("candidates", self.candidate_names())
        });

        let selected = match self
            .selector
            .select(input, ctx.run(), &self.candidate_names())
            .await
        {
            Ok(selected) => selected,
            Err(err) => {
                let err = predicate_failure(&self.name, err);
                error!(router = %self.name, error = %err, "Route selection failed");
                return Err(err);
            }
        };
        let nodes = self.resolve(&selected).inspect_err(|err| {
            error!(router = %self.name, error = %err, "Route selection failed");
        })?;
        debug!(router = %self.name, selected = ?selected, "Routes selected");

        let mut output = if nodes.is_empty() {
            StepOutput {
                content: input.previous_step_content.clone(),
                ..StepOutput::empty(&self.name)
            }
        } else {
            run_sequence(&nodes, input, ctx, self.fail_fast)
                .await?
                .into_aggregate(&self.name)
        };
        output
            .metadata
            .insert("selected_steps".to_string(), selected.clone().into());

        ctx.emit(WorkflowEventType::RouterCompleted, |e| {
            e.with_step_name(&self.name)
                .with_content(output.content.clone())
                .with_metadata("selected_steps", selected)
                .with_metadata("success", output.success)
        });
        Ok(output)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;
    use crate::test_support::{ctx, text_step};
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Classifier {}

        #[async_trait]
        impl Selector for Classifier {
            async fn select(
                &self,
                input: &StepInput,
                ctx: &RunContext,
                candidates: &[String],
            ) -> Result<Vec<String>>;
        }
    }

    fn router_with(selector: Arc<dyn Selector>) -> Router {
        Router::with_selector("dispatch", selector)
            .route(text_step("billing", "refund issued"))
            .route(text_step("tech", "restart the router"))
            .route(Step::function(
                "escalate",
                |input: StepInput, _ctx: RunContext| async move {
                    Ok(format!(
                        "escalated: {}",
                        input.previous_content_as_string().unwrap_or_default()
                    ))
                },
            ))
    }

    #[tokio::test]
    async fn test_selector_sees_candidates_and_picks_one() {
        let mut classifier = MockClassifier::new();
        classifier
            .expect_select()
            .times(1)
            .returning(|_, _, candidates| {
                assert_eq!(candidates, ["billing", "tech", "escalate"]);
                Ok(vec!["tech".to_string()])
            });

        let router = router_with(Arc::new(classifier));
        let output = router
            .execute(&StepInput::new("my wifi is down"), &ctx())
            .await
            .unwrap();

        assert_eq!(output.content_text().as_deref(), Some("restart the router"));
        assert_eq!(output.metadata["selected_steps"], json!(["tech"]));
        assert_eq!(output.children.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_routes_chain_in_selection_order() {
        let router = router_with(Arc::new(FnSelector::new(|_input, _candidates| {
            Ok(vec!["billing".to_string(), "escalate".to_string()])
        })));
        let output = router.execute(&StepInput::new("refund?"), &ctx()).await.unwrap();

        assert_eq!(
            output.content_text().as_deref(),
            Some("escalated: refund issued")
        );
        let names: Vec<_> = output.children.iter().map(|c| c.step_name.as_str()).collect();
        assert_eq!(names, vec!["billing", "escalate"]);
    }

    #[tokio::test]
    async fn test_empty_selection_passes_through() {
        let router = Router::new("dispatch", |_input, _candidates| Ok(Vec::new()))
            .route(text_step("billing", "refund issued"));
        let input = StepInput::new("hi").next_input(&StepOutput::new("greeting"));
        let output = router.execute(&input, &ctx()).await.unwrap();

        assert!(output.success);
        assert_eq!(output.content_text().as_deref(), Some("greeting"));
        assert_eq!(output.metadata["selected_steps"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_route_is_fatal() {
        let router = Router::new("dispatch", |_input, _candidates| {
            Ok(vec!["legal".to_string()])
        })
        .route(text_step("billing", "refund issued"));

        let err = router
            .execute(&StepInput::new("x"), &ctx())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Predicate evaluation failed in 'dispatch': unknown route 'legal'"
        );
    }

    #[tokio::test]
    async fn test_selector_error_is_fatal() {
        let mut classifier = MockClassifier::new();
        classifier
            .expect_select()
            .returning(|_, _, _| Err(Error::ProcessingFailed("rate limited".to_string())));

        let err = router_with(Arc::new(classifier))
            .execute(&StepInput::new("x"), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
