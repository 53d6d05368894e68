use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::GraphError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Number of deleted blocks kept for `restore_deleted_block`.
    pub undo_history_length: usize,
    pub tick_rate_hz: f64,
    /// Values at or above this count as "on" for impulse detection.
    pub trigger_threshold: f64,
    pub impulse_duration_secs: f64,
    /// Re-entrant notifications a block may receive in one dispatch wave
    /// before the rest are dropped.
    pub max_deferred_events: usize,
    pub warn_on_feedback_loops: bool,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            undo_history_length: 5,
            tick_rate_hz: 50.0,
            trigger_threshold: 1.0 / 256.0,
            impulse_duration_secs: 0.1,
            max_deferred_events: 64,
            warn_on_feedback_loops: true,
        }
    }
}

impl GraphSettings {
    /// Builds settings from string key/value pairs (e.g. an on-disk
    /// settings table). Missing or unparsable entries keep their defaults.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            undo_history_length: map
                .get("undo_history_length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.undo_history_length),
            tick_rate_hz: map
                .get("tick_rate_hz")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| *v > 0.0)
                .unwrap_or(defaults.tick_rate_hz),
            trigger_threshold: map
                .get("trigger_threshold")
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(defaults.trigger_threshold),
            impulse_duration_secs: map
                .get("impulse_duration_secs")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| *v >= 0.0)
                .unwrap_or(defaults.impulse_duration_secs),
            max_deferred_events: map
                .get("max_deferred_events")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_deferred_events),
            warn_on_feedback_loops: map
                .get("warn_on_feedback_loops")
                .map(|v| v == "true")
                .unwrap_or(defaults.warn_on_feedback_loops),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let settings: GraphSettings = serde_json::from_str(json)?;
        if settings.tick_rate_hz <= 0.0 {
            return Err(GraphError::ParseError(format!(
                "tick_rate_hz must be positive, got {}",
                settings.tick_rate_hz
            )));
        }
        Ok(settings)
    }

    pub fn tick_interval_secs(&self) -> f64 {
        1.0 / self.tick_rate_hz
    }
}
