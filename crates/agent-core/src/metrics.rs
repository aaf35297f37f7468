//! Execution metrics recorded by leaf steps

use crate::UnitKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing of one leaf step execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Step that ran
    pub step_name: String,

    /// Kind of unit the step wraps
    pub executor_type: UnitKind,

    /// Name of the wrapped unit
    pub executor_name: String,

    /// Wall-clock time spent in the unit, in milliseconds
    pub duration_ms: u64,
}

impl StepMetrics {
    pub fn new(
        step_name: impl Into<String>,
        executor_type: UnitKind,
        executor_name: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            executor_type,
            executor_name: executor_name.into(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metrics_serialization() {
        let metrics = StepMetrics::new(
            "writer",
            UnitKind::Agent,
            "editor",
            Duration::from_micros(42_700),
        );

        assert_eq!(metrics.duration_ms, 42);
        assert_eq!(metrics.duration(), Duration::from_millis(42));
        assert_eq!(
            serde_json::to_value(&metrics).unwrap(),
            json!({
                "step_name": "writer",
                "executor_type": "agent",
                "executor_name": "editor",
                "duration_ms": 42
            })
        );
    }
}
