//! The opaque unit contract
//!
//! A unit is the computational core of a leaf step: an agent call, a team
//! call, or a plain function. The engine only ever calls `execute` or
//! `stream` and never looks inside.

use crate::{Content, Result, RunContext, StepInput, StepOutput};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of unit a step wraps, recorded in output metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Agent,
    Team,
    Function,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Team => "team",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item produced by a streaming unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitEvent {
    /// Partial content (e.g. a token chunk)
    Partial(Content),
    /// The final output; nothing follows it
    Output(StepOutput),
}

/// Stream of unit events ending in at most one `Output`
pub type UnitStream<'a> = BoxStream<'a, Result<UnitEvent>>;

/// Contract every unit satisfies
#[async_trait]
pub trait Unit: Send + Sync {
    /// Name used for the step when none is given explicitly
    fn name(&self) -> &str;

    fn kind(&self) -> UnitKind {
        UnitKind::Function
    }

    /// Run to completion
    async fn execute(&self, input: &StepInput, ctx: &RunContext) -> Result<StepOutput>;

    /// Run, yielding partial content before the final output
    ///
    /// The default implementation yields the result of `execute` once.
    fn stream<'a>(&'a self, input: &'a StepInput, ctx: &'a RunContext) -> UnitStream<'a> {
        stream::once(self.execute(input, ctx))
            .map(|result| result.map(UnitEvent::Output))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tokio_test::assert_ok;

    struct Echo;

    #[async_trait]
    impl Unit for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, input: &StepInput, _ctx: &RunContext) -> Result<StepOutput> {
            Ok(StepOutput::new(input.message_as_string()))
        }
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_output() {
        let ctx = RunContext::new("sess");
        let input = StepInput::new("ping");
        let events: Vec<UnitEvent> = assert_ok!(Echo.stream(&input, &ctx).try_collect().await);

        assert_eq!(events, vec![UnitEvent::Output(StepOutput::new("ping"))]);
        assert_eq!(Echo.kind(), UnitKind::Function);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(UnitKind::Team.to_string(), "team");
        assert_eq!(serde_json::to_string(&UnitKind::Agent).unwrap(), "\"agent\"");
    }
}
