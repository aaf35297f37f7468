//! Step output envelope

use crate::{Content, Media, StepMetrics};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form metadata attached to envelopes and events
pub type Metadata = serde_json::Map<String, Value>;

/// Result produced by a step or composite
///
/// A failed output (`success == false`) always carries a non-empty `error`;
/// its `content` may be partial or absent. Aggregates produced by composites
/// keep their constituent outputs in `children`, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Name of the step or composite that produced this output
    pub step_name: String,

    /// Primary result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    /// Whether the step succeeded
    pub success: bool,

    /// Error text, present iff `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Free-form metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Metadata,

    /// Attachments produced by the step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,

    /// Constituent outputs of an aggregate
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StepOutput>,

    /// Request that the enclosing sequence stop after this output
    #[serde(default)]
    pub stop: bool,

    /// Timing recorded by the leaf step that produced this output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
}

impl Default for StepOutput {
    fn default() -> Self {
        Self {
            step_name: String::new(),
            content: None,
            success: true,
            error: None,
            metadata: Metadata::new(),
            media: Vec::new(),
            children: Vec::new(),
            stop: false,
            metrics: None,
        }
    }
}

impl StepOutput {
    /// Create a successful output with content
    ///
    /// The step name is filled in by the step that returns it.
    pub fn new(content: impl Into<Content>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Create a successful output without content
    pub fn empty(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            ..Self::default()
        }
    }

    /// Create a failed output
    pub fn failure(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::empty(step_name).into_failure(error)
    }

    /// Set the step name
    pub fn with_step_name(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = step_name.into();
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach a media reference
    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    /// Attach constituent outputs
    pub fn with_children(mut self, children: Vec<StepOutput>) -> Self {
        self.children = children;
        self
    }

    /// Ask the enclosing sequence to stop after this output
    pub fn stop_workflow(mut self) -> Self {
        self.stop = true;
        self
    }

    /// Mark this output failed, keeping any partial content
    pub fn into_failure(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        self.success = false;
        self.error = Some(if error.trim().is_empty() {
            format!("step '{}' failed", self.step_name)
        } else {
            error
        });
        self
    }

    /// Content rendered as text, if any
    pub fn content_text(&self) -> Option<String> {
        self.content.as_ref().map(Content::to_text)
    }

    /// Whether this output failed
    pub fn is_failure(&self) -> bool {
        !self.success
    }

    /// Find a constituent output by step name
    pub fn child(&self, step_name: &str) -> Option<&StepOutput> {
        self.children.iter().find(|c| c.step_name == step_name)
    }
}

impl From<Content> for StepOutput {
    fn from(content: Content) -> Self {
        Self::new(content)
    }
}

impl From<String> for StepOutput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for StepOutput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<Value> for StepOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_always_has_error() {
        let output = StepOutput::failure("writer", "");
        assert!(output.is_failure());
        assert_eq!(output.error.as_deref(), Some("step 'writer' failed"));

        let output = StepOutput::new("partial draft").into_failure("timeout");
        assert_eq!(output.content_text().as_deref(), Some("partial draft"));
        assert_eq!(output.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_builders() {
        let output = StepOutput::new(json!({"score": 9}))
            .with_step_name("grader")
            .with_metadata("executor_type", "function")
            .stop_workflow();

        assert_eq!(output.step_name, "grader");
        assert!(output.success);
        assert!(output.stop);
        assert_eq!(output.metadata["executor_type"], json!("function"));
    }

    #[test]
    fn test_child_lookup() {
        let aggregate = StepOutput::empty("fan_out").with_children(vec![
            StepOutput::new("a").with_step_name("first"),
            StepOutput::new("b").with_step_name("second"),
        ]);
        assert_eq!(
            aggregate.child("second").and_then(StepOutput::content_text),
            Some("b".to_string())
        );
        assert!(aggregate.child("third").is_none());
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let value = serde_json::to_value(StepOutput::new("hi").with_step_name("s")).unwrap();
        assert_eq!(
            value,
            json!({"step_name": "s", "content": "hi", "success": true, "stop": false})
        );
    }
}
