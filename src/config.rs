//! Engine configuration.
//!
//! Every tunable has a default, so a config file only needs to name what it
//! changes:
//!
//! ```
//! use practicelib::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{ "scheduler": { "fallback_bpm": 90.0 } }"#).unwrap();
//! assert_eq!(config.scheduler.fallback_bpm, 90.0);
//! assert_eq!(config.timeline.max_notes_per_step, 32);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PracticeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeline: TimelineLimits,
    pub form: FormConfig,
    pub looping: LoopConfig,
    pub scheduler: SchedulerConfig,
}

/// Memory bounds for pathological or malformed scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineLimits {
    pub max_notes_per_step: usize,
    pub max_steps: usize,
}

impl Default for TimelineLimits {
    fn default() -> Self {
        Self {
            max_notes_per_step: 32,
            max_steps: 50_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// Hard ceiling on traversal steps in `generate_play_order`.
    pub max_iterations: usize,
    /// Abort on any revisit of a full traversal state, in addition to the
    /// alternating-measure heuristic.
    pub strict_cycle_detection: bool,
    /// Honor To Coda once a D.C./D.S. jump has been taken. Off by default:
    /// To Coda is inert until the caller enables coda jumps.
    pub coda_after_jump: bool,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            strict_cycle_detection: true,
            coda_after_jump: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Toggles arriving closer than this to the last accepted toggle are ignored.
    pub toggle_debounce_ms: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            toggle_debounce_ms: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub minimum_delay_ms: f64,
    pub fallback_bpm: f64,
    /// How early an audio-clock timer hands over to its final short timer.
    pub lookahead_ms: f64,
    pub breathing: BreathingRoom,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            minimum_delay_ms: 50.0,
            fallback_bpm: 120.0,
            lookahead_ms: 25.0,
            breathing: BreathingRoom::default(),
        }
    }
}

/// Extra time added after a step before auto-advancing, by musical context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathingRoom {
    pub fermata_ms: f64,
    pub phrase_end_ms: f64,
    pub barline_end_ms: f64,
    pub default_ms: f64,
}

impl Default for BreathingRoom {
    fn default() -> Self {
        Self {
            fermata_ms: 200.0,
            phrase_end_ms: 100.0,
            barline_end_ms: 60.0,
            default_ms: 40.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, PracticeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PracticeError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PracticeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, PracticeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_is_all_defaults() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_sections_keep_sibling_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "scheduler": { "breathing": { "fermata_ms": 350 } }, "form": { "max_iterations": 64 } }"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.breathing.fermata_ms, 350.0);
        assert_eq!(config.scheduler.breathing.default_ms, 40.0);
        assert_eq!(config.scheduler.minimum_delay_ms, 50.0);
        assert_eq!(config.form.max_iterations, 64);
        assert!(config.form.strict_cycle_detection);
        assert!(!config.form.coda_after_jump);
    }

    #[test]
    fn json_round_trip_preserves_values() {
        let mut config = EngineConfig::default();
        config.looping.toggle_debounce_ms = 80.0;
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            EngineConfig::from_json("{ timeline: "),
            Err(PracticeError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/practice.json"),
            Err(PracticeError::Io { .. })
        ));
    }
}
