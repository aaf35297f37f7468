//! Core abstractions for agent-rs workflows
//!
//! This crate defines the data envelopes threaded between workflow units,
//! the opaque unit contract, the shared session state, and the error types
//! used throughout the workflow engine.

pub mod agent;
pub mod content;
pub mod context;
pub mod error;
pub mod input;
pub mod media;
pub mod metrics;
pub mod output;
pub mod session;
pub mod unit;

pub use agent::Agent;
pub use content::Content;
pub use context::RunContext;
pub use error::{Error, Result};
pub use input::StepInput;
pub use media::{Media, MediaKind};
pub use metrics::StepMetrics;
pub use output::{Metadata, StepOutput};
pub use session::SessionState;
pub use unit::{Unit, UnitEvent, UnitKind, UnitStream};
