//! Replay input schema
//!
//! A day of host activity can be recorded as newline-delimited JSON and fed
//! back through an engine. Each line carries its timestamp and one action:
//!
//! ```text
//! {"at":"2024-05-01T08:00:00Z","type":"enable","module":"motion"}
//! {"at":"2024-05-01T08:00:00.200Z","type":"motion","x":0.1,"y":0.0,"z":9.8}
//! {"at":"2024-05-01T08:00:01Z","type":"noise","bins":[12,40,7]}
//! {"at":"2024-05-01T08:00:02Z","type":"position","lat":51.5,"lng":-0.12}
//! {"at":"2024-05-01T08:05:00Z","type":"visibility","hidden":true}
//! {"at":"2024-05-01T08:06:00Z","type":"intention"}
//! {"at":"2024-05-01T08:07:00Z","type":"save_place","name":"Home","activity":"Wake Up"}
//! {"at":"2024-05-01T08:08:00Z","type":"acquisition","module":"noise","granted":false,"reason":"Permission denied"}
//! {"at":"2024-05-01T09:30:00Z","type":"tick"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::DetectionEngine;
use crate::error::{AcquisitionError, DetectError};
use crate::modules::AccelerationSample;
use crate::types::{ModuleKind, Position};

/// Replay format identifier
pub const REPLAY_SCHEMA: &str = "smart_detect.replay.v1";

fn default_true() -> bool {
    true
}

/// One timestamped host action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub action: ReplayAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayAction {
    /// Turn a module on (default) or off
    Enable {
        module: ModuleKind,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    /// Accelerometer reading including gravity
    Motion { x: f64, y: f64, z: f64 },
    /// Microphone frame: either raw frequency bins or a reduced level
    Noise {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bins: Option<Vec<u8>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<f64>,
    },
    Position { lat: f64, lng: f64 },
    Visibility { hidden: bool },
    /// The user recorded an intention
    Intention,
    /// Save a place at the given coordinates, or at the current fix when omitted
    SavePlace {
        name: String,
        #[serde(default)]
        activity: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lat: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lng: Option<f64>,
    },
    RemovePlace { name: String },
    /// Outcome of a pending sensor acquisition
    Acquisition {
        module: ModuleKind,
        granted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Only advance the clock
    Tick,
}

impl ReplayRecord {
    pub fn new(at: DateTime<Utc>, action: ReplayAction) -> Self {
        Self { at, action }
    }

    pub fn from_json(json: &str) -> Result<Self, DetectError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Run due timers up to `at`, then perform the action
    pub fn apply(&self, engine: &mut DetectionEngine) -> Result<(), DetectError> {
        let now = self.at;
        engine.advance(now);

        match &self.action {
            ReplayAction::Enable { module, enabled } => {
                engine.set_module_enabled(now, *module, *enabled)
            }
            ReplayAction::Motion { x, y, z } => {
                engine.push_motion(now, AccelerationSample::new(*x, *y, *z))
            }
            ReplayAction::Noise { bins, level } => match (bins, level) {
                (Some(bins), _) => engine.push_noise_spectrum(now, bins),
                (None, Some(level)) => engine.push_noise_level(now, *level),
                (None, None) => {
                    return Err(DetectError::InvalidInput(
                        "noise record needs either bins or level".to_string(),
                    ))
                }
            },
            ReplayAction::Position { lat, lng } => {
                engine.push_position(now, Position::new(*lat, *lng))
            }
            ReplayAction::Visibility { hidden } => engine.push_visibility(now, *hidden),
            ReplayAction::Intention => engine.notify_intention_recorded(now),
            ReplayAction::SavePlace {
                name,
                activity,
                lat,
                lng,
            } => {
                match (lat, lng) {
                    (Some(lat), Some(lng)) => {
                        engine.add_place(name, Position::new(*lat, *lng), activity)?
                    }
                    (None, None) => engine.save_current_position_as_place(name, activity)?,
                    _ => {
                        return Err(DetectError::InvalidInput(
                            "save_place needs both lat and lng, or neither".to_string(),
                        ))
                    }
                };
            }
            ReplayAction::RemovePlace { name } => {
                engine.remove_place(name);
            }
            ReplayAction::Acquisition {
                module,
                granted,
                reason,
            } => {
                let result = if *granted {
                    Ok(())
                } else {
                    Err(AcquisitionError::PermissionDenied(
                        reason.clone().unwrap_or_else(|| "Permission denied".to_string()),
                    ))
                };
                engine.complete_acquisition(now, *module, result);
            }
            ReplayAction::Tick => {}
        }
        Ok(())
    }
}

/// Parse newline-delimited replay records, skipping blank lines
pub fn parse_ndjson(ndjson: &str) -> Result<Vec<ReplayRecord>, DetectError> {
    let mut records = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ReplayRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                return Err(DetectError::InvalidInput(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(records)
}
