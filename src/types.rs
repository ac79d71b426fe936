//! Core types for the Smart Detect engine
//!
//! This module defines the data that flows out of the detection modules:
//! module identifiers, classifications, saved places, detection events and
//! the status snapshot returned to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DetectError;

/// Detection module identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Motion,
    Location,
    Screen,
    Inactivity,
    #[serde(alias = "mic")]
    Noise,
    Patterns,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 6] = [
        ModuleKind::Motion,
        ModuleKind::Location,
        ModuleKind::Screen,
        ModuleKind::Inactivity,
        ModuleKind::Noise,
        ModuleKind::Patterns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Motion => "motion",
            ModuleKind::Location => "location",
            ModuleKind::Screen => "screen",
            ModuleKind::Inactivity => "inactivity",
            ModuleKind::Noise => "noise",
            ModuleKind::Patterns => "patterns",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "motion" => Ok(ModuleKind::Motion),
            "location" => Ok(ModuleKind::Location),
            "screen" => Ok(ModuleKind::Screen),
            "inactivity" => Ok(ModuleKind::Inactivity),
            "noise" | "mic" => Ok(ModuleKind::Noise),
            "patterns" => Ok(ModuleKind::Patterns),
            other => Err(DetectError::UnknownModule(other.to_string())),
        }
    }
}

/// Acquisition lifecycle of a module
///
/// `Off -> Acquiring -> Active | Unavailable`. Modules without a sensor
/// (screen, inactivity, patterns) go straight from `Off` to `Active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
    Off,
    Acquiring,
    Active,
    Unavailable { reason: String },
}

impl Availability {
    pub fn is_active(&self) -> bool {
        matches!(self, Availability::Active)
    }
}

impl Default for Availability {
    fn default() -> Self {
        Availability::Off
    }
}

/// Committed motion classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    Unknown,
    Still,
    Walking,
    Active,
}

impl MotionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionState::Unknown => "unknown",
            MotionState::Still => "still",
            MotionState::Walking => "walking",
            MotionState::Active => "active",
        }
    }
}

/// Committed ambient noise classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseLevel {
    Unknown,
    Quiet,
    Moderate,
    Loud,
}

impl NoiseLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseLevel::Unknown => "unknown",
            NoiseLevel::Quiet => "quiet",
            NoiseLevel::Moderate => "moderate",
            NoiseLevel::Loud => "loud",
        }
    }
}

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A saved place used for geofencing.
///
/// Serialized with the field names of the persisted places list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// Unique name of the place
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    /// Activity suggested on arrival; empty when none
    #[serde(default, alias = "suggestedActivity")]
    pub activity: String,
}

impl Place {
    pub fn new(name: impl Into<String>, position: Position, activity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lat: position.lat,
            lng: position.lng,
            activity: activity.into(),
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lng)
    }

    /// Suggested activity, `None` when the place has none
    pub fn suggested_activity(&self) -> Option<&str> {
        if self.activity.is_empty() {
            None
        } else {
            Some(self.activity.as_str())
        }
    }
}

/// Kind of a detection event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MotionChange,
    LocationArrived,
    LocationLeft,
    LocationMoved,
    ScreenReturn,
    Inactivity,
    NoiseChange,
    PatternMatch,
    /// A module started sampling
    Started(ModuleKind),
    /// A module could not acquire its sensor
    Unavailable(ModuleKind),
}

impl EventKind {
    pub fn name(&self) -> String {
        match self {
            EventKind::MotionChange => "motion_change".to_string(),
            EventKind::LocationArrived => "location_arrived".to_string(),
            EventKind::LocationLeft => "location_left".to_string(),
            EventKind::LocationMoved => "location_moved".to_string(),
            EventKind::ScreenReturn => "screen_return".to_string(),
            EventKind::Inactivity => "inactivity".to_string(),
            EventKind::NoiseChange => "noise_change".to_string(),
            EventKind::PatternMatch => "pattern_match".to_string(),
            EventKind::Started(module) => format!("{}_started", module.as_str()),
            EventKind::Unavailable(module) => format!("{}_unavailable", module.as_str()),
        }
    }

    /// Lifecycle kinds are meant for logs and status displays, not banners
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, EventKind::Started(_) | EventKind::Unavailable(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

/// Kind-specific event fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventDetails {
    MotionChange {
        from: MotionState,
        to: MotionState,
        /// Window average that triggered the commit
        confidence: f64,
    },
    NoiseChange {
        from: NoiseLevel,
        to: NoiseLevel,
        /// Rounded window average
        level: i64,
    },
    LocationArrived {
        place: String,
        previous_place: Option<String>,
    },
    LocationLeft {
        place: String,
    },
    LocationMoved {
        distance_m: i64,
        from: Position,
        to: Position,
    },
    ScreenReturn {
        away_minutes: i64,
    },
    Inactivity {
        minutes: i64,
    },
    PatternMatch {
        activity: String,
        frequency_pct: i64,
        count: usize,
        total_days: usize,
        time_of_day: String,
    },
    Lifecycle {
        module: ModuleKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// A committed detection, delivered once to the registered sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_activity: Option<String>,
    #[serde(flatten)]
    pub details: EventDetails,
}

impl DetectionEvent {
    pub fn new(
        kind: EventKind,
        at: DateTime<Utc>,
        message: impl Into<String>,
        suggested_activity: Option<String>,
        details: EventDetails,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            at,
            message: message.into(),
            suggested_activity,
            details,
        }
    }

    pub fn started(module: ModuleKind, at: DateTime<Utc>) -> Self {
        Self::new(
            EventKind::Started(module),
            at,
            format!("{} detection started", module),
            None,
            EventDetails::Lifecycle {
                module,
                reason: None,
            },
        )
    }

    pub fn unavailable(module: ModuleKind, at: DateTime<Utc>, reason: &str) -> Self {
        Self::new(
            EventKind::Unavailable(module),
            at,
            format!("{} detection unavailable: {}", module, reason),
            None,
            EventDetails::Lifecycle {
                module,
                reason: Some(reason.to_string()),
            },
        )
    }
}

// ============================================================================
// Status snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionStatus {
    pub enabled: bool,
    pub availability: Availability,
    pub state: MotionState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoiseStatus {
    pub enabled: bool,
    pub availability: Availability,
    pub state: NoiseLevel,
    /// Rounded mean of the buffered samples, 0 when empty
    pub level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationStatus {
    pub enabled: bool,
    pub availability: Availability,
    pub current_place: Option<String>,
    pub last_position: Option<Position>,
    pub saved_places: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenStatus {
    pub enabled: bool,
    pub availability: Availability,
    pub hidden_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InactivityStatus {
    pub enabled: bool,
    pub availability: Availability,
    pub minutes_since_intention: i64,
    pub next_nudge_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternStatus {
    pub enabled: bool,
    pub availability: Availability,
    pub next_evaluation_at: Option<DateTime<Utc>>,
}

/// Side-effect-free view of every module
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub motion: MotionStatus,
    pub location: LocationStatus,
    pub screen: ScreenStatus,
    pub inactivity: InactivityStatus,
    pub noise: NoiseStatus,
    pub patterns: PatternStatus,
}
