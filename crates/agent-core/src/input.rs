//! Step input envelope

use crate::{Content, Media, Metadata, StepOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input handed to a step or composite
///
/// A unit never mutates the input it receives. Composites derive a child's
/// input from upstream outputs through [`StepInput::next_input`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    /// The original task payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Content>,

    /// Content of the immediately preceding unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_step_content: Option<Content>,

    /// Every prior output in the current scope, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_step_outputs: Vec<StepOutput>,

    /// Free-form side channel
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub additional_data: Metadata,

    /// Media threaded alongside the text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
}

impl StepInput {
    /// Create an input carrying only a message
    pub fn new(message: impl Into<Content>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Attach side-channel data
    pub fn with_additional_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    /// Attach a media reference
    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    /// The message rendered as text (empty when absent)
    pub fn message_as_string(&self) -> String {
        self.message.as_ref().map(Content::to_text).unwrap_or_default()
    }

    /// Content of the preceding unit rendered as text
    pub fn previous_content_as_string(&self) -> Option<String> {
        self.previous_step_content.as_ref().map(Content::to_text)
    }

    /// Most recent prior output produced by `step_name`
    pub fn get_step_output(&self, step_name: &str) -> Option<&StepOutput> {
        self.previous_step_outputs
            .iter()
            .rev()
            .find(|o| o.step_name == step_name)
    }

    /// Content produced by `step_name`
    ///
    /// An aggregate with constituent outputs (a parallel group) yields a
    /// structured map of child name to child content.
    pub fn get_step_content(&self, step_name: &str) -> Option<Content> {
        let output = self.get_step_output(step_name)?;
        if output.children.is_empty() {
            return output.content.clone();
        }

        let map = output
            .children
            .iter()
            .filter_map(|child| {
                child
                    .content
                    .as_ref()
                    .map(|c| (child.step_name.clone(), c.to_value()))
            })
            .collect::<serde_json::Map<_, _>>();
        Some(Content::Structured(Value::Object(map)))
    }

    /// Content of the last prior output, if any
    pub fn get_last_step_content(&self) -> Option<&Content> {
        self.previous_step_outputs
            .last()
            .and_then(|o| o.content.as_ref())
    }

    /// Contents of every prior output, in execution order
    pub fn get_all_previous_content(&self) -> Vec<&Content> {
        self.previous_step_outputs
            .iter()
            .filter_map(|o| o.content.as_ref())
            .collect()
    }

    /// Prior contents rendered as `=== name ===` blocks
    pub fn previous_content_summary(&self) -> String {
        self.previous_step_outputs
            .iter()
            .filter_map(|o| {
                o.content
                    .as_ref()
                    .map(|c| format!("=== {} ===\n{}", o.step_name, c.to_text()))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Input for the unit that runs after `output`
    ///
    /// Keeps the message and side channel, makes `output` the preceding
    /// content, and appends it (and its media) to the history.
    pub fn next_input(&self, output: &StepOutput) -> StepInput {
        let mut next = self.clone();
        next.previous_step_content = output.content.clone();
        next.previous_step_outputs.push(output.clone());
        next.media.extend(output.media.iter().cloned());
        next
    }
}

impl From<&str> for StepInput {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for StepInput {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<Content> for StepInput {
    fn from(message: Content) -> Self {
        Self::new(message)
    }
}
