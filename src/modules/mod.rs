//! Detection modules
//!
//! Each module owns its state, classifies its own samples and returns the
//! events it commits; the engine forwards them to the bus. Modules never
//! see each other.
//!
//! Pipeline: backend → host pushes samples → module buffer → classifier → event

pub mod inactivity;
pub mod location;
pub mod motion;
pub mod noise;
pub mod pattern;
pub mod screen;

pub use inactivity::InactivityModule;
pub use location::{LocationModule, PlaceBook};
pub use motion::{AccelerationSample, MotionModule};
pub use noise::{spectrum_rms, NoiseModule};
pub use pattern::{detect_pattern, tally_time_window, PatternMatch, PatternModule, PatternTally};
pub use screen::ScreenModule;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::error::AcquisitionError;
use crate::platform::{Acquisition, SamplingRequest, SensorBackend};
use crate::types::{Availability, DetectionEvent, ModuleKind};

/// Lifecycle shared by every module
pub trait DetectionModule {
    fn kind(&self) -> ModuleKind;

    fn is_enabled(&self) -> bool;

    fn availability(&self) -> Availability;

    /// Start sampling. Returns the lifecycle event, if any.
    ///
    /// Enabling a module that is already active or acquiring does nothing;
    /// enabling an unavailable module retries acquisition.
    fn enable(&mut self, now: DateTime<Utc>) -> Option<DetectionEvent>;

    /// Stop sampling, release the sensor and forget all runtime state
    fn disable(&mut self);

    /// Fire any timer that is due at `now`
    fn poll(&mut self, _now: DateTime<Utc>) -> Option<DetectionEvent> {
        None
    }

    /// Outcome of a pending acquisition reported by the host
    fn complete_acquisition(
        &mut self,
        _result: Result<(), AcquisitionError>,
        _now: DateTime<Utc>,
    ) -> Option<DetectionEvent> {
        None
    }
}

/// First `due + k * period` (k >= 1) strictly after `now`.
///
/// `None` when that time is out of range; the timer is then disarmed.
pub(crate) fn roll_past(
    due: DateTime<Utc>,
    period: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let period_ms = period.num_milliseconds().max(1);
    let behind_ms = (now - due).num_milliseconds().max(0);
    let steps = behind_ms / period_ms + 1;
    let offset = steps.checked_mul(period_ms)?;
    due.checked_add_signed(Duration::milliseconds(offset))
}

/// A module's handle on its sensor backend and acquisition state
pub(crate) struct SensorLink {
    module: ModuleKind,
    backend: Box<dyn SensorBackend>,
    availability: Availability,
    holding: bool,
}

impl SensorLink {
    pub(crate) fn new(module: ModuleKind, backend: Box<dyn SensorBackend>) -> Self {
        Self {
            module,
            backend,
            availability: Availability::Off,
            holding: false,
        }
    }

    pub(crate) fn availability(&self) -> &Availability {
        &self.availability
    }

    pub(crate) fn is_active(&self) -> bool {
        self.availability.is_active()
    }

    /// Active or waiting on the host
    pub(crate) fn is_engaged(&self) -> bool {
        matches!(
            self.availability,
            Availability::Active | Availability::Acquiring
        )
    }

    pub(crate) fn acquire(
        &mut self,
        interval_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Option<DetectionEvent> {
        let request = SamplingRequest {
            module: self.module,
            interval_ms,
        };

        match self.backend.start(&request) {
            Acquisition::Granted => {
                self.holding = true;
                self.availability = Availability::Active;
                Some(DetectionEvent::started(self.module, now))
            }
            Acquisition::Pending => {
                self.holding = true;
                self.availability = Availability::Acquiring;
                None
            }
            Acquisition::Failed(err) => self.fail(err, now),
        }
    }

    pub(crate) fn complete(
        &mut self,
        result: Result<(), AcquisitionError>,
        now: DateTime<Utc>,
    ) -> Option<DetectionEvent> {
        if self.availability != Availability::Acquiring {
            debug!(
                "ignoring acquisition result for {} in state {:?}",
                self.module, self.availability
            );
            return None;
        }

        match result {
            Ok(()) => {
                self.availability = Availability::Active;
                Some(DetectionEvent::started(self.module, now))
            }
            Err(err) => {
                self.stop_backend();
                self.fail(err, now)
            }
        }
    }

    pub(crate) fn release(&mut self) {
        self.stop_backend();
        self.availability = Availability::Off;
    }

    fn fail(&mut self, err: AcquisitionError, now: DateTime<Utc>) -> Option<DetectionEvent> {
        self.availability = Availability::Unavailable {
            reason: err.reason().to_string(),
        };
        Some(DetectionEvent::unavailable(self.module, now, err.reason()))
    }

    fn stop_backend(&mut self) {
        if self.holding {
            self.backend.stop();
            self.holding = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::StaticBackend;
    use crate::test_support::at;
    use crate::types::EventKind;

    #[test]
    fn test_pending_then_denied_releases_backend() {
        let backend = StaticBackend::pending();
        let calls = backend.calls();
        let mut link = SensorLink::new(ModuleKind::Noise, Box::new(backend));

        assert!(link.acquire(Some(500), at(0)).is_none());
        assert_eq!(link.availability(), &Availability::Acquiring);
        assert_eq!(calls.open(), 1);

        let event = link
            .complete(
                Err(AcquisitionError::PermissionDenied("Permission denied".into())),
                at(10),
            )
            .unwrap();
        assert_eq!(event.kind, EventKind::Unavailable(ModuleKind::Noise));
        assert_eq!(calls.open(), 0);
        assert!(!link.is_engaged());
    }

    #[test]
    fn test_late_completion_is_ignored() {
        let mut link = SensorLink::new(ModuleKind::Motion, Box::new(StaticBackend::granted()));
        link.acquire(None, at(0));
        assert!(link.complete(Ok(()), at(5)).is_none());
        assert!(link.is_active());
    }

    #[test]
    fn test_roll_past_skips_missed_periods() {
        let period = Duration::minutes(30);
        assert_eq!(roll_past(at(0), period, at(0)), Some(at(1_800_000)));
        assert_eq!(roll_past(at(0), period, at(1_800_000)), Some(at(3_600_000)));
        assert_eq!(roll_past(at(0), period, at(6_100_000)), Some(at(7_200_000)));
    }

    #[test]
    fn test_roll_past_large_gap_is_constant_time() {
        let period = Duration::milliseconds(1);
        let now = at(0) + Duration::days(365 * 100);
        let next = roll_past(at(0), period, now).unwrap();
        assert_eq!(next, now + Duration::milliseconds(1));
    }

    #[test]
    fn test_roll_past_out_of_range_disarms() {
        let now = DateTime::<Utc>::MAX_UTC - Duration::minutes(1);
        assert_eq!(roll_past(now, Duration::minutes(30), now), None);
    }

    #[test]
    fn test_release_is_idempotent() {
        let backend = StaticBackend::granted();
        let calls = backend.calls();
        let mut link = SensorLink::new(ModuleKind::Location, Box::new(backend));

        link.acquire(None, at(0));
        link.release();
        link.release();
        assert_eq!(calls.stops(), 1);
        assert_eq!(link.availability(), &Availability::Off);
    }
}
