//! Predicate-gated branch

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

/// Decides which branch of a [`Condition`] runs
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn evaluate(&self, input: &StepInput, ctx: &RunContext) -> Result<bool>;
}

/// Predicate backed by a synchronous closure
pub struct FnPredicate<F>(F);

impl<F> FnPredicate<F>
where
    F: Fn(&StepInput) -> Result<bool> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&StepInput) -> Result<bool> + Send + Sync,
{
    async fn evaluate(&self, input: &StepInput, _ctx: &RunContext) -> Result<bool> {
        (self.0)(input)
    }
}

/// Attribute a predicate/selector failure to the composite that owns it
pub(crate) fn predicate_failure(step: &str, err: Error) -> Error {
    match err {
        Error::Cancelled | Error::PredicateEvaluation { .. } => err,
        other => Error::predicate(step, other.to_string()),
    }
}

/// Runs `on_true` or `on_false` depending on a predicate
///
/// The predicate is evaluated exactly once per execution and only the
/// selected branch runs. A failing predicate is fatal to the run. When the
/// selected branch is empty the incoming `previous_step_content` passes
/// through unchanged.
#[derive(Clone)]
pub struct Condition {
    name: String,
    description: Option<String>,
    predicate: Arc<dyn Predicate>,
    on_true: Vec<Node>,
    on_false: Vec<Node>,
}

impl Condition {
    /// Condition evaluating a synchronous closure
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&StepInput) -> Result<bool> + Send + Sync + 'static,
    {
        Self::with_predicate(name, Arc::new(FnPredicate::new(predicate)))
    }

    /// Condition evaluating an arbitrary (possibly async) predicate
    pub fn with_predicate(name: impl Into<String>, predicate: Arc<dyn Predicate>) -> Self {
        Self {
            name: name.into(),
            description: None,
            predicate,
            on_true: Vec::new(),
            on_false: Vec::new(),
        }
    }

    /// Append a node to the branch taken when the predicate holds
    pub fn then(mut self, node: impl Into<Node>) -> Self {
        self.on_true.push(node.into());
        self
    }

    /// Append a node to the branch taken when the predicate does not hold
    pub fn otherwise(mut self, node: impl Into<Node>) -> Self {
        self.on_false.push(node.into());
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

    pub fn on_true(&self) -> &[Node] {
        &self.on_true
    }

    pub fn on_false(&self) -> &[Node] {
        &self.on_false
    }
}

#[async_trait]
impl Runnable for Condition {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput> {
        ctx.check_cancelled()?;
        ctx.emit(WorkflowEventType::ConditionStarted, |e| {
            e.with_step_name(&self.name)
        });

        let holds = match self.predicate.evaluate(input, ctx.run()).await {
            Ok(holds) => holds,
            Err(err) => {
                let err = predicate_failure(&self.name, err);
                error!(condition = %self.name, error = %err, "Condition predicate failed");
                return Err(err);
            }
        };
        debug!(condition = %self.name, result = holds, "Condition evaluated");

        let branch = if holds { &self.on_true } else { &self.on_false };
        let mut output = if branch.is_empty() {
            StepOutput {
                content: input.previous_step_content.clone(),
                ..StepOutput::empty(&self.name)
            }
        } else {
            run_sequence(branch, input, ctx, true)
                .await?
                .into_aggregate(&self.name)
        };
        output
            .metadata
            .insert("condition_result".to_string(), holds.into());

        ctx.emit(WorkflowEventType::ConditionCompleted, |e| {
            e.with_step_name(&self.name)
                .with_content(output.content.clone())
                .with_metadata("condition_result", holds)
                .with_metadata("success", output.success)
        });
        Ok(output)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("name", &self.name)
            .field("on_true", &self.on_true)
            .field("on_false", &self.on_false)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;
    use crate::test_support::{ctx, text_step};
    use agent_core::Content;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_step(name: &'static str, calls: Arc<AtomicUsize>) -> Step {
        Step::function(name, move |_input: StepInput, _ctx: RunContext| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{name}-out"))
            }
        })
    }

    #[tokio::test]
    async fn test_only_selected_branch_runs() {
        let true_calls = Arc::new(AtomicUsize::new(0));
        let false_calls = Arc::new(AtomicUsize::new(0));
        let predicate_calls = Arc::new(AtomicUsize::new(0));

        let condition = {
            let predicate_calls = predicate_calls.clone();
            Condition::new("gate", move |_input| {
                predicate_calls.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
        }
        .then(counting_step("t", true_calls.clone()))
        .otherwise(counting_step("f", false_calls.clone()));

        for _ in 0..3 {
            let output = condition.execute(&StepInput::new("x"), &ctx()).await.unwrap();
            assert_eq!(output.content_text().as_deref(), Some("t-out"));
            assert_eq!(output.metadata["condition_result"], json!(true));
        }

        assert_eq!(predicate_calls.load(Ordering::SeqCst), 3);
        assert_eq!(true_calls.load(Ordering::SeqCst), 3);
        assert_eq!(false_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_branch_passes_content_through() {
        let condition = Condition::new("gate", |input| {
            Ok(input.message_as_string().contains("urgent"))
        })
        .then(text_step("escalate", "paged"));

        let input = StepInput::new("routine").next_input(&StepOutput::new("summary"));
        let output = condition.execute(&input, &ctx()).await.unwrap();

        assert!(output.success);
        assert_eq!(output.content, Some(Content::text("summary")));
        assert!(output.children.is_empty());
        assert_eq!(output.metadata["condition_result"], json!(false));
    }

    #[tokio::test]
    async fn test_predicate_error_is_fatal() {
        let condition = Condition::new("gate", |_input| {
            Err(Error::Generic("classifier unavailable".to_string()))
        })
        .then(text_step("t", "never"));

        let err = condition
            .execute(&StepInput::new("x"), &ctx())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Predicate evaluation failed in 'gate': classifier unavailable"
        );
    }
}
