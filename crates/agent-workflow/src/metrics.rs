//! Run-level metrics aggregated from leaf steps

use agent_core::{StepMetrics, StepOutput};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing of the leaf steps in a run's output tree, in tree order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    /// Number of leaf steps in the output tree; a loop contributes its final iteration
    pub total_steps: usize,
    pub steps: Vec<StepMetrics>,
    /// Wall-clock time of the whole run, in milliseconds
    pub duration_ms: u64,
}

impl WorkflowMetrics {
    /// Collect metrics from the output tree of a finished run
    pub fn collect(output: &StepOutput, elapsed: Duration) -> Self {
        let mut steps = Vec::new();
        gather(output, &mut steps);
        Self {
            total_steps: steps.len(),
            steps,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Metrics of the last execution of `step_name`
    pub fn step(&self, step_name: &str) -> Option<&StepMetrics> {
        self.steps.iter().rev().find(|m| m.step_name == step_name)
    }
}

fn gather(output: &StepOutput, steps: &mut Vec<StepMetrics>) {
    if let Some(metrics) = &output.metrics {
        steps.push(metrics.clone());
    }
    for child in &output.children {
        gather(child, steps);
    }
}
