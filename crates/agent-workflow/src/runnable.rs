//! The uniform capability implemented by every node

use crate::context::ExecutionContext;
use crate::event::{EventSink, WorkflowEvent};
use agent_core::{Result, StepInput, StepOutput};
use async_trait::async_trait;
use futures::future::Either;
use futures::stream::BoxStream;

/// An item of a node's event stream
#[derive(Debug)]
pub enum StreamItem {
    /// A lifecycle event emitted while the node runs
    Event(WorkflowEvent),
    /// The node's final result; always the last item
    Output(Result<StepOutput>),
}

/// Something the engine can execute: a leaf step or any composite
#[async_trait]
pub trait Runnable: Send + Sync {
    fn name(&self) -> &str;

    /// Run to completion and return the (aggregate) output
    ///
    /// A failed unit shows up as an output with `success == false`.
    /// `Err` is reserved for fatal conditions: predicate failures and
    /// cancellation.
    async fn execute(&self, input: &StepInput, ctx: &ExecutionContext) -> Result<StepOutput>;

    /// Run, yielding lifecycle events followed by the final output
    fn stream<'a>(
        &'a self,
        input: &'a StepInput,
        ctx: &'a ExecutionContext,
    ) -> BoxStream<'a, StreamItem> {
        stream_runnable(self, input, ctx)
    }
}

/// Drive `runnable.execute` while forwarding the events it emits
pub(crate) fn stream_runnable<'a, R: Runnable + ?Sized>(
    runnable: &'a R,
    input: &'a StepInput,
    ctx: &'a ExecutionContext,
) -> BoxStream<'a, StreamItem> {
    Box::pin(async_stream::stream! {
        let (sink, mut rx) = EventSink::channel();
        let scoped = ctx.with_sink(sink);
        let mut run = runnable.execute(input, &scoped);

        let result = loop {
            let next = tokio::select! {
                biased;
                event = rx.recv() => Either::Left(event),
                result = &mut run => Either::Right(result),
            };
            match next {
                Either::Left(Some(event)) => yield StreamItem::Event(event),
                Either::Left(None) => break (&mut run).await,
                Either::Right(result) => break result,
            }
        };

        while let Ok(event) = rx.try_recv() {
            yield StreamItem::Event(event);
        }
        yield StreamItem::Output(result);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WorkflowEventType;
    use crate::steps::Steps;
    use crate::test_support::{ctx, text_step};
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_yields_events_then_output() {
        let steps = Steps::new("chain")
            .add(text_step("a", "a-out"))
            .add(text_step("b", "b-out"));
        let input = StepInput::new("go");
        let ctx = ctx();

        let items: Vec<StreamItem> = steps.stream(&input, &ctx).collect().await;
        let (last, events) = items.split_last().unwrap();

        let types: Vec<_> = events
            .iter()
            .map(|item| match item {
                StreamItem::Event(event) => event.event_type,
                StreamItem::Output(_) => panic!("output before the end"),
            })
            .collect();
        assert_eq!(
            types,
            vec![
                WorkflowEventType::StepsStarted,
                WorkflowEventType::StepStarted,
                WorkflowEventType::StepCompleted,
                WorkflowEventType::StepStarted,
                WorkflowEventType::StepCompleted,
                WorkflowEventType::StepsCompleted,
            ]
        );
        match last {
            StreamItem::Output(Ok(output)) => {
                assert_eq!(output.content_text().as_deref(), Some("b-out"));
            }
            other => panic!("unexpected final item: {other:?}"),
        }
        // the caller's context is left without a sink
        assert!(!ctx.is_streaming());
    }
}
