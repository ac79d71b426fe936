//! Engine configuration
//!
//! Every threshold, window and cadence used by the detection modules lives
//! here. All sections default to the values the engine ships with, so a
//! partial JSON document only overrides what it names.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::DetectError;

/// Motion classification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Minimum spacing between accepted samples (ms)
    pub sample_interval_ms: u64,
    /// Samples averaged per classification
    pub window_size: usize,
    /// Average net acceleration below this is `still` (m/s²)
    pub still_below: f64,
    /// Average net acceleration below this (and above `still_below`) is `walking`
    pub walking_below: f64,
    /// Time a new classification must persist before it is committed (ms)
    pub dwell_ms: u64,
    /// Gravity magnitude subtracted from the raw vector norm (m/s²)
    pub gravity: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 200,
            window_size: 15,
            still_below: 0.8,
            walking_below: 3.5,
            dwell_ms: 3000,
            gravity: 9.81,
        }
    }
}

/// Ambient noise classification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Cadence requested from the microphone backend (ms)
    pub sample_interval_ms: u64,
    pub window_size: usize,
    pub quiet_below: f64,
    pub moderate_below: f64,
    pub dwell_ms: u64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 500,
            window_size: 10,
            quiet_below: 15.0,
            moderate_below: 45.0,
            dwell_ms: 8000,
        }
    }
}

/// Geofence and travel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub geofence_radius_m: f64,
    /// Displacement between consecutive fixes that counts as travel
    pub significant_move_m: f64,
    /// Activity suggested when leaving a saved place
    pub left_place_activity: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            geofence_radius_m: 150.0,
            significant_move_m: 500.0,
            left_place_activity: "Driving".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub away_threshold_ms: u64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            away_threshold_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InactivityConfig {
    /// Delay before the first nudge (ms)
    pub threshold_ms: u64,
    /// Cadence of the nudges that follow (ms)
    pub repeat_ms: u64,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 90 * 60 * 1000,
            repeat_ms: 30 * 60 * 1000,
        }
    }
}

/// Time-of-day pattern mining settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
    /// Half-width of the matching window around the current time of day
    pub window_minutes: u32,
    /// Days of history required before any suggestion
    pub min_days: usize,
    pub min_occurrences: usize,
    /// Share of days (0-1) the top activity must reach
    pub min_frequency: f64,
    /// Offset used to read wall-clock time; `None` uses the device offset
    pub utc_offset_minutes: Option<i32>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10_000,
            interval_ms: 15 * 60 * 1000,
            window_minutes: 30,
            min_days: 3,
            min_occurrences: 3,
            min_frequency: 0.30,
            utc_offset_minutes: None,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub motion: MotionConfig,
    pub noise: NoiseConfig,
    pub location: LocationConfig,
    pub screen: ScreenConfig,
    pub inactivity: InactivityConfig,
    pub patterns: PatternConfig,
}

impl DetectionConfig {
    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self, DetectError> {
        let config: DetectionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, DetectError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn to_json_pretty(&self) -> Result<String, DetectError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings the classifiers cannot work with
    pub fn validate(&self) -> Result<(), DetectError> {
        let invalid = |msg: &str| Err(DetectError::InvalidConfig(msg.to_string()));

        if self.motion.window_size == 0 || self.noise.window_size == 0 {
            return invalid("window_size must be greater than zero");
        }
        if self.motion.still_below >= self.motion.walking_below {
            return invalid("motion.still_below must be below motion.walking_below");
        }
        if self.noise.quiet_below >= self.noise.moderate_below {
            return invalid("noise.quiet_below must be below noise.moderate_below");
        }
        if self.location.geofence_radius_m <= 0.0 || self.location.significant_move_m <= 0.0 {
            return invalid("location distances must be positive");
        }
        if self.inactivity.threshold_ms == 0
            || self.inactivity.repeat_ms == 0
            || self.patterns.interval_ms == 0
        {
            return invalid("timer intervals must be greater than zero");
        }
        let timers = [
            self.inactivity.threshold_ms,
            self.inactivity.repeat_ms,
            self.patterns.initial_delay_ms,
            self.patterns.interval_ms,
        ];
        if timers.iter().any(|ms| *ms > MAX_TIMER_MS) {
            return invalid("timer intervals and delays must be at most one day");
        }
        if let Some(offset) = self.patterns.utc_offset_minutes {
            if !(-1439..=1439).contains(&offset) {
                return invalid("patterns.utc_offset_minutes must be within one day");
            }
        }
        if !(0.0..=1.0).contains(&self.patterns.min_frequency) {
            return invalid("patterns.min_frequency must be within 0..=1");
        }
        Ok(())
    }
}

/// Upper bound for inactivity and pattern timer settings (one day)
pub const MAX_TIMER_MS: u64 = 24 * 60 * 60 * 1000;

/// Convert a millisecond setting into a chrono duration
pub(crate) fn millis(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(i64::MAX as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.motion.window_size, 15);
        assert_eq!(config.noise.dwell_ms, 8000);
        assert_eq!(config.inactivity.threshold_ms, 5_400_000);
    }

    #[test]
    fn test_partial_json_overrides_only_named_fields() {
        let json = r#"{"motion": {"dwell_ms": 1000}, "patterns": {"min_days": 5}}"#;
        let config = DetectionConfig::from_json(json).unwrap();

        assert_eq!(config.motion.dwell_ms, 1000);
        assert_eq!(config.motion.window_size, 15);
        assert_eq!(config.patterns.min_days, 5);
        assert_eq!(config.location, LocationConfig::default());
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let result = DetectionConfig::from_json(r#"{"noise": {"quiet_below": 50}}"#);
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_out_of_range_timers() {
        let result =
            DetectionConfig::from_json(r#"{"inactivity": {"threshold_ms": 18446744073709551615}}"#);
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));

        let result = DetectionConfig::from_json(r#"{"patterns": {"interval_ms": 86400001}}"#);
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));

        let result = DetectionConfig::from_json(r#"{"patterns": {"initial_delay_ms": 86400000}}"#);
        assert!(result.is_ok());
    }

    #[test]
    fn test_rejects_empty_window() {
        let result = DetectionConfig::from_json(r#"{"motion": {"window_size": 0}}"#);
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = DetectionConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(DetectionConfig::from_json(&json).unwrap(), config);
    }
}
