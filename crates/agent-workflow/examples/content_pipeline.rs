//! Example demonstrating a content pipeline built from workflow composites
//!
//! This example shows how to:
//! 1. Fan out research to several sources with `Parallel`
//! 2. Refine a draft with a bounded `Loop`
//! 3. Gate publication with a `Condition` and pick a channel with a `Router`
//! 4. Stream lifecycle events while the workflow runs
//!
//! The agents here are stand-ins; swap in real LLM-backed agents as needed.
//!
//! ## To run this example:
//! ```bash
//! AGENT_LOG_FILTER=agent_workflow=debug cargo run -p agent-workflow --example content_pipeline
//! ```

use agent_core::{Agent, Result, RunContext, StepInput, StepOutput};
use agent_utils::{Config, init_tracing_with};
use agent_workflow::{
    Condition, Loop, Parallel, RunOverrides, RunRequest, Router, Step, Steps, Workflow,
    WorkflowEventType,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// Pretends to be an editor model: tightens whatever it is given
struct Editor;

#[async_trait]
impl Agent for Editor {
    async fn process(&self, input: String, context: &RunContext) -> Result<String> {
        let revision = context
            .session_state()
            .update(|state| {
                let next = state
                    .get("revision")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0)
                    + 1;
                state.insert("revision".to_string(), next.into());
                next
            });
        Ok(format!("[rev {revision}] {}", input.lines().last().unwrap_or_default()))
    }

    fn name(&self) -> &str {
        "editor"
    }
}

fn source(name: &'static str) -> Step {
    Step::function(name, move |input: StepInput, _ctx: RunContext| async move {
        Ok(format!("{name} notes on {}", input.message_as_string()))
    })
}

fn build_workflow() -> Result<Workflow> {
    let research = Parallel::new("research")
        .add(source("web"))
        .add(source("papers"))
        .add(source("interviews"));

    let refine = Loop::new("refine")
        .add(Step::agent(Arc::new(Editor)))
        .end_condition(|outputs| {
            Ok(outputs
                .last()
                .and_then(StepOutput::content_text)
                .is_some_and(|text| text.starts_with("[rev 3]")))
        })
        .max_iterations(5);

    let publish = Condition::new("ready_to_publish", |input| {
        Ok(input
            .previous_content_as_string()
            .is_some_and(|text| !text.is_empty()))
    })
    .then(
        Router::new("channel", |input, candidates| {
            let wants_social = input.message_as_string().len() < 40;
            let pick = if wants_social { "social" } else { "blog" };
            Ok(candidates.iter().filter(|c| *c == pick).cloned().collect())
        })
        .route(Step::function("blog", |input: StepInput, _ctx: RunContext| async move {
            Ok(format!("blog post: {}", input.previous_content_as_string().unwrap_or_default()))
        }))
        .route(Step::function("social", |input: StepInput, _ctx: RunContext| async move {
            Ok(format!("thread: {}", input.previous_content_as_string().unwrap_or_default()))
        })),
    );

    Workflow::builder("content_pipeline")
        .description("Research, draft, refine, and publish an article")
        .add(research)
        .add(Steps::new("drafting").add(refine))
        .add(publish)
        .build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing_with(&config.logging)?;

    println!("=== Content Pipeline Example ===\n");

    let workflow = build_workflow()?;

    // Streaming run
    let request = RunRequest::new("ownership in Rust")
        .with_user_id("example-user")
        .with_overrides(RunOverrides::new().with_loop_max_iterations("refine", 4));
    let mut events = workflow.run_stream(request)?;
    while let Some(event) = events.next().await {
        let step = event.step_name.as_deref().unwrap_or("-");
        match event.event_type {
            WorkflowEventType::Completed => {
                let text = event.content.map(|c| c.to_text()).unwrap_or_default();
                println!("\n✓ completed: {text}");
            }
            WorkflowEventType::Error => {
                println!("\n✗ failed: {}", event.error.unwrap_or_default());
            }
            other => println!("  {other:<26} {step}"),
        }
    }

    // Blocking-style run returning the aggregate
    let output = workflow.run("a much longer topic about async runtimes in Rust").await?;
    println!("\nFinal output: {}", output.content_text().unwrap_or_default());
    println!(
        "Revisions recorded in session state: {}",
        workflow.session_state().get("revision").unwrap_or_default()
    );

    Ok(())
}
