//! Ambient noise classification
//!
//! The host pushes either the microphone's frequency-bin magnitudes or an
//! already reduced level. Levels are averaged over a short window and
//! bucketed into quiet / moderate / loud. The first bucket is adopted as the
//! baseline straight away; later changes must hold for the dwell time.

use chrono::{DateTime, Utc};
use log::debug;

use super::{DetectionModule, SensorLink};
use crate::buffer::SampleBuffer;
use crate::config::{millis, NoiseConfig};
use crate::debounce::{BaselinePolicy, DebouncedClassifier};
use crate::error::AcquisitionError;
use crate::platform::SensorBackend;
use crate::types::{
    Availability, DetectionEvent, EventDetails, EventKind, ModuleKind, NoiseLevel, NoiseStatus,
};

/// Root mean square of the frequency-bin magnitudes, 0 for an empty frame
pub fn spectrum_rms(bins: &[u8]) -> f64 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: f64 = bins.iter().map(|&b| f64::from(b) * f64::from(b)).sum();
    (sum / bins.len() as f64).sqrt()
}

pub struct NoiseModule {
    config: NoiseConfig,
    link: SensorLink,
    enabled: bool,
    buffer: SampleBuffer,
    classifier: DebouncedClassifier<NoiseLevel>,
}

impl NoiseModule {
    pub fn new(config: NoiseConfig, backend: Box<dyn SensorBackend>) -> Self {
        let buffer = SampleBuffer::new(config.window_size);
        let classifier =
            DebouncedClassifier::new(millis(config.dwell_ms), BaselinePolicy::Immediate);
        Self {
            link: SensorLink::new(ModuleKind::Noise, backend),
            config,
            enabled: false,
            buffer,
            classifier,
        }
    }

    pub fn state(&self) -> NoiseLevel {
        self.classifier.committed().unwrap_or(NoiseLevel::Unknown)
    }

    /// Rounded mean of whatever is buffered, 0 when nothing is
    pub fn level(&self) -> i64 {
        self.buffer
            .partial_average()
            .map(|avg| avg.round() as i64)
            .unwrap_or(0)
    }

    pub fn classify(&self, average: f64) -> NoiseLevel {
        if average < self.config.quiet_below {
            NoiseLevel::Quiet
        } else if average < self.config.moderate_below {
            NoiseLevel::Moderate
        } else {
            NoiseLevel::Loud
        }
    }

    /// Feed one frame of frequency-bin magnitudes
    pub fn on_spectrum(&mut self, now: DateTime<Utc>, bins: &[u8]) -> Option<DetectionEvent> {
        self.on_level(now, spectrum_rms(bins))
    }

    /// Feed one precomputed loudness level
    pub fn on_level(&mut self, now: DateTime<Utc>, level: f64) -> Option<DetectionEvent> {
        if !self.link.is_active() {
            return None;
        }
        if !level.is_finite() {
            debug!("dropping non-finite noise level {}", level);
            return None;
        }

        self.buffer.push(level);
        let average = self.buffer.average()?;
        let state = self.classify(average);

        let transition = self.classifier.observe(state, now)?;
        let (message, activity) = noise_suggestion(transition.from, transition.to);
        Some(DetectionEvent::new(
            EventKind::NoiseChange,
            now,
            message,
            activity.map(str::to_string),
            EventDetails::NoiseChange {
                from: transition.from,
                to: transition.to,
                level: average.round() as i64,
            },
        ))
    }

    pub fn status(&self) -> NoiseStatus {
        NoiseStatus {
            enabled: self.enabled,
            availability: self.link.availability().clone(),
            state: self.state(),
            level: self.level(),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.classifier.reset();
    }
}

impl DetectionModule for NoiseModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Noise
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

/// Banner text and suggested activity for a committed noise change
pub fn noise_suggestion(from: NoiseLevel, to: NoiseLevel) -> (String, Option<&'static str>) {
    use NoiseLevel::*;

    let (message, activity) = match (from, to) {
        (Quiet, Moderate) => ("Your environment got noisier. New setting?", None),
        (Quiet, Loud) => (
            "It's getting loud! Are you in a social setting?",
            Some("Social Event"),
        ),
        (Moderate, Quiet) => ("It's quiet now. Time for focused work?", Some("Deep Focus")),
        (Moderate, Loud) => ("Noise level rising! Meeting or social time?", Some("Meeting")),
        (Loud, Quiet) => ("It's calm now. Perfect for reflection.", Some("Break")),
        (Loud, Moderate) => ("Things are calming down. What's next?", None),
        _ => {
            return (
                format!("Environment changed from {} to {}", from.as_str(), to.as_str()),
                None,
            )
        }
    };
    (message.to_string(), activity)
}
