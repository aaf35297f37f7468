//! Built-in unit adapters: plain functions and agents

use agent_core::{
    Agent, Content, Error, Result, RunContext, StepInput, StepOutput, Unit, UnitEvent, UnitKind,
    UnitStream,
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;

/// Unit backed by an async function
///
/// The function receives owned copies of the input and context so it can
/// move them into its future.
pub struct FunctionUnit<F> {
    name: String,
    f: F,
}

impl<F> FunctionUnit<F> {
    pub fn new<Fut, O>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepInput, RunContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Into<StepOutput> + 'static,
    {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut, O> Unit for FunctionUnit<F>
where
    F: Fn(StepInput, RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send + 'static,
    O: Into<StepOutput> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StepInput, ctx: &RunContext) -> Result<StepOutput> {
        let output = (self.f)(input.clone(), ctx.clone()).await?;
        Ok(output.into())
    }
}

/// Unit backed by a function returning a stream of partial content
pub struct StreamingFunctionUnit<F> {
    name: String,
    f: F,
}

impl<F> StreamingFunctionUnit<F> {
    pub fn new<S>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepInput, RunContext) -> S + Send + Sync,
        S: Stream<Item = Result<UnitEvent>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, S> Unit for StreamingFunctionUnit<F>
where
    F: Fn(StepInput, RunContext) -> S + Send + Sync,
    S: Stream<Item = Result<UnitEvent>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StepInput, ctx: &RunContext) -> Result<StepOutput> {
        let mut stream = self.stream(input, ctx);
        let mut collector = PartialCollector::default();
        while let Some(event) = stream.next().await {
            if let Some(output) = collector.push(event?) {
                return Ok(output);
            }
        }
        collector.finish(&self.name)
    }

    fn stream<'a>(&'a self, input: &'a StepInput, ctx: &'a RunContext) -> UnitStream<'a> {
        (self.f)(input.clone(), ctx.clone()).boxed()
    }
}

/// Accumulates partial text until a unit yields its final output
#[derive(Debug, Default)]
pub(crate) struct PartialCollector {
    text: String,
    partials: usize,
}

impl PartialCollector {
    /// Record an event; returns the final output once it arrives
    pub(crate) fn push(&mut self, event: UnitEvent) -> Option<StepOutput> {
        match event {
            UnitEvent::Partial(content) => {
                self.text.push_str(&content.to_text());
                self.partials += 1;
                None
            }
            UnitEvent::Output(output) => Some(output),
        }
    }

    /// Output for a stream that ended without a final output
    pub(crate) fn finish(self, unit_name: &str) -> Result<StepOutput> {
        if self.partials == 0 {
            return Err(Error::unit(unit_name, "unit produced no output"));
        }
        Ok(StepOutput::new(Content::Text(self.text)))
    }
}

/// Unit backed by an [`Agent`]
///
/// The agent receives the preceding step's content, or the original message
/// when nothing ran before it.
pub struct AgentUnit {
    agent: Arc<dyn Agent>,
    kind: UnitKind,
}

impl AgentUnit {
    pub fn agent(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            kind: UnitKind::Agent,
        }
    }

    pub fn team(team: Arc<dyn Agent>) -> Self {
        Self {
            agent: team,
            kind: UnitKind::Team,
        }
    }
}

#[async_trait]
impl Unit for AgentUnit {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn kind(&self) -> UnitKind {
        self.kind
    }

    async fn execute(&self, input: &StepInput, ctx: &RunContext) -> Result<StepOutput> {
        let message = input
            .previous_content_as_string()
            .unwrap_or_else(|| input.message_as_string());
        let reply = self.agent.process(message, ctx).await?;
        Ok(StepOutput::new(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio_test::{assert_err, assert_ok};

    struct Shout;

    #[async_trait]
    impl Agent for Shout {
        async fn process(&self, input: String, _context: &RunContext) -> Result<String> {
            Ok(input.to_uppercase())
        }

        fn name(&self) -> &str {
            "shout"
        }
    }

    #[tokio::test]
    async fn test_function_unit() {
        let unit = FunctionUnit::new("greet", |input: StepInput, _ctx: RunContext| async move {
            Ok(format!("hello {}", input.message_as_string()))
        });
        let output = assert_ok!(unit.execute(&StepInput::new("bob"), &RunContext::new("s")).await);
        assert_eq!(output.content_text().as_deref(), Some("hello bob"));
        assert_eq!(unit.kind(), UnitKind::Function);
    }

    #[tokio::test]
    async fn test_agent_unit_prefers_previous_content() {
        let unit = AgentUnit::agent(Arc::new(Shout));
        let ctx = RunContext::new("s");

        let fresh = unit.execute(&StepInput::new("topic"), &ctx).await.unwrap();
        assert_eq!(fresh.content_text().as_deref(), Some("TOPIC"));

        let chained = StepInput::new("topic").next_input(&StepOutput::new("draft"));
        let output = unit.execute(&chained, &ctx).await.unwrap();
        assert_eq!(output.content_text().as_deref(), Some("DRAFT"));
        assert_eq!(AgentUnit::team(Arc::new(Shout)).kind(), UnitKind::Team);
    }

    #[tokio::test]
    async fn test_streaming_unit_concatenates_partials() {
        let unit = StreamingFunctionUnit::new("typist", |_input: StepInput, _ctx: RunContext| {
            stream::iter(vec![
                Ok(UnitEvent::Partial(Content::text("ab"))),
                Ok(UnitEvent::Partial(Content::text("cd"))),
            ])
        });
        let output = unit
            .execute(&StepInput::new("x"), &RunContext::new("s"))
            .await
            .unwrap();
        assert_eq!(output.content_text().as_deref(), Some("abcd"));
    }

    #[tokio::test]
    async fn test_streaming_unit_without_output_fails() {
        let unit = StreamingFunctionUnit::new("mute", |_input: StepInput, _ctx: RunContext| {
            stream::iter(Vec::<Result<UnitEvent>>::new())
        });
        assert_err!(unit.execute(&StepInput::new("x"), &RunContext::new("s")).await);
    }
}
