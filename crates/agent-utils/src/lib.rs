//! Shared utilities for agent-rs
//!
//! This crate provides common functionality used across the agent-rs workspace:
//! tracing setup and configuration loading.

pub mod config;
pub mod logging;

pub use config::{Config, LogFormat, LoggingConfig, load_json};
pub use logging::init_tracing_with;
