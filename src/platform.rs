//! Platform capability seam
//!
//! Each sensor module talks to its hardware through a [`SensorBackend`]. The
//! backend only opens and releases the subscription; samples are pushed into
//! the engine by the host, so classification stays platform independent and
//! can be driven entirely by synthetic input.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::AcquisitionError;
use crate::types::ModuleKind;

/// What a module asks of its backend when it is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingRequest {
    pub module: ModuleKind,
    /// Desired sample cadence, when the module has one
    pub interval_ms: Option<u64>,
}

/// Result of asking a backend to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Subscription is open, samples may flow
    Granted,
    /// Permission prompt or stream setup in flight; the host reports the
    /// outcome through `DetectionEngine::complete_acquisition`
    Pending,
    Failed(AcquisitionError),
}

/// A cancellable sensor subscription
pub trait SensorBackend {
    fn start(&mut self, request: &SamplingRequest) -> Acquisition;

    /// Release the subscription. Called once per successful or pending start.
    fn stop(&mut self);
}

/// Shared start/stop counters for a backend
#[derive(Debug, Clone, Default)]
pub struct BackendCalls {
    attempts: Rc<Cell<u32>>,
    starts: Rc<Cell<u32>>,
    stops: Rc<Cell<u32>>,
}

impl BackendCalls {
    /// Every call to `start`, including failed ones
    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    /// Starts that opened (or began opening) a subscription
    pub fn starts(&self) -> u32 {
        self.starts.get()
    }

    pub fn stops(&self) -> u32 {
        self.stops.get()
    }

    /// Subscriptions currently held open
    pub fn open(&self) -> u32 {
        self.starts.get().saturating_sub(self.stops.get())
    }

    fn record_attempt(&self) {
        self.attempts.set(self.attempts.get() + 1);
    }

    fn record_start(&self) {
        self.starts.set(self.starts.get() + 1);
    }

    fn record_stop(&self) {
        self.stops.set(self.stops.get() + 1);
    }
}

/// Backend with a fixed acquisition outcome
#[derive(Debug, Clone)]
pub struct StaticBackend {
    outcome: Acquisition,
    calls: BackendCalls,
}

impl StaticBackend {
    pub fn new(outcome: Acquisition) -> Self {
        Self {
            outcome,
            calls: BackendCalls::default(),
        }
    }

    pub fn granted() -> Self {
        Self::new(Acquisition::Granted)
    }

    pub fn pending() -> Self {
        Self::new(Acquisition::Pending)
    }

    pub fn denied(reason: &str) -> Self {
        Self::new(Acquisition::Failed(AcquisitionError::PermissionDenied(
            reason.to_string(),
        )))
    }

    pub fn unsupported(reason: &str) -> Self {
        Self::new(Acquisition::Failed(AcquisitionError::Unsupported(
            reason.to_string(),
        )))
    }

    /// Handle observing this backend's start/stop calls
    pub fn calls(&self) -> BackendCalls {
        self.calls.clone()
    }
}

impl SensorBackend for StaticBackend {
    fn start(&mut self, _request: &SamplingRequest) -> Acquisition {
        self.calls.record_attempt();
        if matches!(self.outcome, Acquisition::Failed(_)) {
            return self.outcome.clone();
        }
        self.calls.record_start();
        self.outcome.clone()
    }

    fn stop(&mut self) {
        self.calls.record_stop();
    }
}

/// Backend for hosts that own acquisition themselves (FFI, replay with
/// explicit `acquisition` records). Every start is pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredBackend;

impl SensorBackend for DeferredBackend {
    fn start(&mut self, _request: &SamplingRequest) -> Acquisition {
        Acquisition::Pending
    }

    fn stop(&mut self) {}
}

/// Backends for the three sensor-backed modules
pub struct SensorBackends {
    pub motion: Box<dyn SensorBackend>,
    pub noise: Box<dyn SensorBackend>,
    pub location: Box<dyn SensorBackend>,
}

impl SensorBackends {
    /// Every sensor grants immediately
    pub fn granted() -> Self {
        Self {
            motion: Box::new(StaticBackend::granted()),
            noise: Box::new(StaticBackend::granted()),
            location: Box::new(StaticBackend::granted()),
        }
    }

    /// Every sensor waits for the host to report acquisition
    pub fn deferred() -> Self {
        Self {
            motion: Box::new(DeferredBackend),
            noise: Box::new(DeferredBackend),
            location: Box::new(DeferredBackend),
        }
    }
}

impl Default for SensorBackends {
    fn default() -> Self {
        Self::granted()
    }
}
