//! Motion classification
//!
//! Accelerometer samples are throttled, reduced to net acceleration
//! (`|norm(x, y, z) - g|`) and averaged over a sliding window. The window
//! average is bucketed into still / walking / active and debounced before a
//! change is reported.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{DetectionModule, SensorLink};
use crate::buffer::SampleBuffer;
use crate::config::{millis, MotionConfig};
use crate::debounce::{BaselinePolicy, DebouncedClassifier};
use crate::error::AcquisitionError;
use crate::platform::SensorBackend;
use crate::types::{
    Availability, DetectionEvent, EventDetails, EventKind, ModuleKind, MotionState, MotionStatus,
};

/// Raw accelerometer reading including gravity (m/s²)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerationSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Deviation of the vector norm from gravity
    pub fn net_acceleration(&self, gravity: f64) -> f64 {
        let magnitude = (self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        (magnitude - gravity).abs()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

pub struct MotionModule {
    config: MotionConfig,
    link: SensorLink,
    enabled: bool,
    buffer: SampleBuffer,
    classifier: DebouncedClassifier<MotionState>,
    last_accepted: Option<DateTime<Utc>>,
}

impl MotionModule {
    pub fn new(config: MotionConfig, backend: Box<dyn SensorBackend>) -> Self {
        let buffer = SampleBuffer::new(config.window_size);
        let classifier =
            DebouncedClassifier::new(millis(config.dwell_ms), BaselinePolicy::Debounced);
        Self {
            link: SensorLink::new(ModuleKind::Motion, backend),
            config,
            enabled: false,
            buffer,
            classifier,
            last_accepted: None,
        }
    }

    /// Committed classification
    pub fn state(&self) -> MotionState {
        self.classifier.committed().unwrap_or(MotionState::Unknown)
    }

    pub fn classify(&self, average: f64) -> MotionState {
        if average < self.config.still_below {
            MotionState::Still
        } else if average < self.config.walking_below {
            MotionState::Walking
        } else {
            MotionState::Active
        }
    }

    /// Feed one accelerometer reading.
    ///
    /// Samples arriving closer together than the sampling interval are
    /// dropped, as are samples while the sensor is not active.
    pub fn on_sample(
        &mut self,
        now: DateTime<Utc>,
        sample: AccelerationSample,
    ) -> Option<DetectionEvent> {
        if !self.link.is_active() {
            return None;
        }
        if !sample.is_finite() {
            debug!("dropping non-finite motion sample {:?}", sample);
            return None;
        }
        if let Some(last) = self.last_accepted {
            if now - last < millis(self.config.sample_interval_ms) {
                return None;
            }
        }
        self.last_accepted = Some(now);

        self.buffer.push(sample.net_acceleration(self.config.gravity));
        let average = self.buffer.average()?;
        let state = self.classify(average);

        let transition = self.classifier.observe(state, now)?;
        let (message, activity) = motion_suggestion(transition.from, transition.to);
        Some(DetectionEvent::new(
            EventKind::MotionChange,
            now,
            message,
            activity.map(str::to_string),
            EventDetails::MotionChange {
                from: transition.from,
                to: transition.to,
                confidence: average,
            },
        ))
    }

    pub fn status(&self) -> MotionStatus {
        MotionStatus {
            enabled: self.enabled,
            availability: self.link.availability().clone(),
            state: self.state(),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.classifier.reset();
        self.last_accepted = None;
    }
}

impl DetectionModule for MotionModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Motion
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn availability(&self) -> Availability {
        self.link.availability().clone()
    }

    fn enable(&mut self, now: DateTime<Utc>) -> Option<DetectionEvent> {
        self.enabled = true;
        if self.link.is_engaged() {
            return None;
        }
        self.reset();
        self.link.acquire(Some(self.config.sample_interval_ms), now)
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.link.release();
        self.reset();
    }

    fn complete_acquisition(
        &mut self,
        result: Result<(), AcquisitionError>,
        now: DateTime<Utc>,
    ) -> Option<DetectionEvent> {
        self.link.complete(result, now)
    }
}

/// Banner text and suggested activity for a committed motion change
pub fn motion_suggestion(from: MotionState, to: MotionState) -> (String, Option<&'static str>) {
    use MotionState::*;

    let (message, activity) = match (from, to) {
        (Still, Walking) => ("You started moving! Where are you headed?", Some("Walking")),
        (Still, Active) => ("Activity detected! Are you exercising?", Some("Exercise")),
        (Walking, Still) => ("You've stopped. Arrived somewhere new?", None),
        (Walking, Active) => (
            "Picking up the pace! Setting an exercise intention?",
            Some("Exercise"),
        ),
        (Active, Still) => ("Workout done? Time for a recovery intention.", Some("Break")),
        (Active, Walking) => ("Slowing down. Cool-down walk?", Some("Walking")),
        _ => {
            return (
                format!("Activity changed from {} to {}", from.as_str(), to.as_str()),
                None,
            )
        }
    };
    (message.to_string(), activity)
}
