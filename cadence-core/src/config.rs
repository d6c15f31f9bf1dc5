//! Engine configuration.
//!
//! All fields have defaults, so an empty JSON object is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`NodesManager`](crate::NodesManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Period between ticks for [`IntervalFrameSource`](crate::frame::IntervalFrameSource),
    /// in milliseconds.
    pub frame_interval_ms: f64,

    /// Maximum nesting of node evaluations before a pass is abandoned.
    ///
    /// The registry does not detect cycles; this bound turns a cyclic graph
    /// into a logged error instead of a stack overflow.
    pub max_evaluation_depth: usize,

    /// Initial capacity reserved for the event and callback queues.
    pub queue_capacity: usize,
}

impl EngineConfig {
    /// Parse a config from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The tick period as a [`Duration`].
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(self.frame_interval_ms.max(0.0) / 1000.0)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 1000.0 / 60.0,
            max_evaluation_depth: 512,
            queue_capacity: 16,
        }
    }
}
