//! Screen return detection
//!
//! Pure duration rule: remember when the app went to the background and, on
//! return, report absences longer than the threshold.

use chrono::{DateTime, Utc};

use super::DetectionModule;
use crate::config::{millis, ScreenConfig};
use crate::types::{
    Availability, DetectionEvent, EventDetails, EventKind, ModuleKind, ScreenStatus,
};

pub struct ScreenModule {
    config: ScreenConfig,
    enabled: bool,
    hidden_since: Option<DateTime<Utc>>,
}

impl ScreenModule {
    pub fn new(config: ScreenConfig) -> Self {
        Self {
            config,
            enabled: false,
            hidden_since: None,
        }
    }

    pub fn hidden_since(&self) -> Option<DateTime<Utc>> {
        self.hidden_since
    }

    /// Record a visibility change. `hidden == true` means backgrounded.
    pub fn on_visibility(&mut self, now: DateTime<Utc>, hidden: bool) -> Option<DetectionEvent> {
        if !self.enabled {
            return None;
        }
        if hidden {
            self.hidden_since = Some(now);
            return None;
        }

        let since = self.hidden_since.take()?;
        let away = now - since;
        if away <= millis(self.config.away_threshold_ms) {
            return None;
        }

        let minutes = (away.num_milliseconds() as f64 / 60_000.0).round() as i64;
        Some(DetectionEvent::new(
            EventKind::ScreenReturn,
            now,
            format!(
                "Welcome back! You were away for {} min. New segment?",
                minutes
            ),
            return_suggestion(minutes).map(str::to_string),
            EventDetails::ScreenReturn {
                away_minutes: minutes,
            },
        ))
    }

    pub fn status(&self) -> ScreenStatus {
        ScreenStatus {
            enabled: self.enabled,
            availability: self.availability(),
            hidden_since: self.hidden_since,
        }
    }
}

impl DetectionModule for ScreenModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Screen
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn availability(&self) -> Availability {
        if self.enabled {
            Availability::Active
        } else {
            Availability::Off
        }
    }

    fn enable(&mut self, now: DateTime<Utc>) -> Option<DetectionEvent> {
        if self.enabled {
            return None;
        }
        self.enabled = true;
        self.hidden_since = None;
        Some(DetectionEvent::started(ModuleKind::Screen, now))
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.hidden_since = None;
    }
}

/// Activity suggested after an absence of `minutes`
pub fn return_suggestion(minutes: i64) -> Option<&'static str> {
    if minutes > 60 {
        Some("Break")
    } else if minutes > 30 {
        None
    } else if minutes > 10 {
        Some("Break")
    } else {
        None
    }
}
