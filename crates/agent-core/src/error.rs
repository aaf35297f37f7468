//! Error types for agent-core

use thiserror::Error;

/// Result type alias for agent-core
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for workflow and unit operations
#[derive(Error, Debug)]
pub enum Error {
    /// Generic error message
    #[error("{0}")]
    Generic(String),

    /// A workflow, composite, or runtime could not be constructed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// A unit (agent, team, or function) failed while processing its input
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// A wrapped unit raised or returned a failure
    #[error("Step '{step}' failed: {message}")]
    UnitExecution {
        /// Name of the step whose unit failed
        step: String,
        /// Failure description
        message: String,
    },

    /// A condition predicate, router selector, or loop end condition failed
    #[error("Predicate evaluation failed in '{step}': {message}")]
    PredicateEvaluation {
        /// Name of the composite that owns the predicate
        step: String,
        /// Failure description
        message: String,
    },

    /// The run was cancelled before it could finish
    #[error("Workflow run cancelled")]
    Cancelled,

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a unit execution error
    pub fn unit(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnitExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create a predicate evaluation error
    pub fn predicate(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PredicateEvaluation {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error must abort the whole run regardless of `fail_fast`
    ///
    /// Unit failures are converted into failed outputs by the leaf step;
    /// broken predicates and cancellation are never absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PredicateEvaluation { .. } | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unit("writer", "model unavailable");
        assert_eq!(err.to_string(), "Step 'writer' failed: model unavailable");

        let err = Error::predicate("is_tech", "missing topic");
        assert_eq!(
            err.to_string(),
            "Predicate evaluation failed in 'is_tech': missing topic"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Cancelled.is_fatal());
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::predicate("router", "boom").is_fatal());
        assert!(!Error::unit("step", "boom").is_fatal());
        assert!(!Error::ProcessingFailed("boom".to_string()).is_fatal());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
