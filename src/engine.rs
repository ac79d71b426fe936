//! Detection engine
//!
//! Composes the six modules behind one host-facing API. The host pushes
//! samples and visibility changes, calls [`DetectionEngine::advance`] to run
//! due timers, and receives every committed event through the sink it
//! registered with [`DetectionEngine::initialize`].

use chrono::{DateTime, Utc};
use log::debug;
use std::rc::Rc;

use crate::bus::DetectionBus;
use crate::config::DetectionConfig;
use crate::error::{AcquisitionError, DetectError};
use crate::modules::{
    AccelerationSample, DetectionModule, InactivityModule, LocationModule, MotionModule,
    NoiseModule, PatternModule, ScreenModule,
};
use crate::platform::SensorBackends;
use crate::store::{KeyValueStore, MemoryStore};
use crate::types::{
    DetectionEvent, ModuleKind, MotionState, NoiseLevel, Place, Position, StatusSnapshot,
};

pub struct DetectionEngine {
    config: DetectionConfig,
    bus: DetectionBus,
    motion: MotionModule,
    location: LocationModule,
    screen: ScreenModule,
    inactivity: InactivityModule,
    noise: NoiseModule,
    patterns: PatternModule,
}

impl DetectionEngine {
    /// Create an engine with every module disabled.
    ///
    /// # Arguments
    /// * `config` - Thresholds and cadences, validated here
    /// * `store` - Holds saved places and the host's history log
    /// * `backends` - Sensor subscriptions for motion, noise and location
    ///
    /// # Example
    /// ```ignore
    /// let store = Rc::new(MemoryStore::new());
    /// let backends = SensorBackends::granted();
    /// let mut engine = DetectionEngine::new(DetectionConfig::default(), store, backends)?;
    /// engine.initialize(|event| println!("{}", event.message));
    /// engine.set_module_enabled(now, ModuleKind::Motion, true);
    /// ```
    pub fn new(
        config: DetectionConfig,
        store: Rc<dyn KeyValueStore>,
        backends: SensorBackends,
    ) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self::assemble(config, store, backends))
    }

    /// Default configuration, in-memory store, sensors that always grant
    pub fn in_memory() -> Self {
        Self::assemble(
            DetectionConfig::default(),
            Rc::new(MemoryStore::new()),
            SensorBackends::granted(),
        )
    }

    fn assemble(
        config: DetectionConfig,
        store: Rc<dyn KeyValueStore>,
        backends: SensorBackends,
    ) -> Self {
        Self {
            motion: MotionModule::new(config.motion.clone(), backends.motion),
            location: LocationModule::new(
                config.location.clone(),
                backends.location,
                Rc::clone(&store),
            ),
            screen: ScreenModule::new(config.screen.clone()),
            inactivity: InactivityModule::new(config.inactivity.clone()),
            noise: NoiseModule::new(config.noise.clone(), backends.noise),
            patterns: PatternModule::new(config.patterns.clone(), store),
            bus: DetectionBus::new(),
            config,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Register the event consumer, replacing any previous one
    pub fn initialize(&mut self, sink: impl FnMut(&DetectionEvent) + 'static) {
        self.bus.set_sink(Box::new(sink));
    }

    /// Events dispatched since construction
    pub fn dispatched(&self) -> u64 {
        self.bus.dispatched()
    }

    /// Enable or disable one module. Repeating the current setting does nothing.
    pub fn set_module_enabled(&mut self, now: DateTime<Utc>, module: ModuleKind, enabled: bool) {
        debug!("set {} enabled={}", module, enabled);
        let target = self.module_mut(module);
        let event = if enabled {
            target.enable(now)
        } else {
            if target.is_enabled() {
                target.disable();
            }
            None
        };
        self.bus.emit_all(event);
    }

    /// Same as [`set_module_enabled`](Self::set_module_enabled), by module name
    pub fn set_module_enabled_by_name(
        &mut self,
        now: DateTime<Utc>,
        name: &str,
        enabled: bool,
    ) -> Result<(), DetectError> {
        let module: ModuleKind = name.parse()?;
        self.set_module_enabled(now, module, enabled);
        Ok(())
    }

    pub fn is_enabled(&self, module: ModuleKind) -> bool {
        self.module(module).is_enabled()
    }

    /// Report the outcome of a sensor acquisition that started as pending
    pub fn complete_acquisition(
        &mut self,
        now: DateTime<Utc>,
        module: ModuleKind,
        result: Result<(), AcquisitionError>,
    ) {
        let event = self.module_mut(module).complete_acquisition(result, now);
        self.bus.emit_all(event);
    }

    /// Disable every module
    pub fn shutdown(&mut self) {
        for module in ModuleKind::ALL {
            let target = self.module_mut(module);
            if target.is_enabled() {
                target.disable();
            }
        }
    }

    // ------------------------------------------------------------------
    // Host input
    // ------------------------------------------------------------------

    pub fn push_motion(&mut self, now: DateTime<Utc>, sample: AccelerationSample) {
        let event = self.motion.on_sample(now, sample);
        self.bus.emit_all(event);
    }

    pub fn push_noise_spectrum(&mut self, now: DateTime<Utc>, bins: &[u8]) {
        let event = self.noise.on_spectrum(now, bins);
        self.bus.emit_all(event);
    }

    pub fn push_noise_level(&mut self, now: DateTime<Utc>, level: f64) {
        let event = self.noise.on_level(now, level);
        self.bus.emit_all(event);
    }

    pub fn push_position(&mut self, now: DateTime<Utc>, position: Position) {
        let events = self.location.on_position(now, position);
        self.bus.emit_all(events);
    }

    /// `hidden == true` when the app moves to the background
    pub fn push_visibility(&mut self, now: DateTime<Utc>, hidden: bool) {
        let event = self.screen.on_visibility(now, hidden);
        self.bus.emit_all(event);
    }

    /// The host recorded a new intention; restarts the inactivity countdown
    pub fn notify_intention_recorded(&mut self, now: DateTime<Utc>) {
        self.inactivity.notify_intention(now);
    }

    /// Run every timer that is due at `now`
    pub fn advance(&mut self, now: DateTime<Utc>) {
        let inactivity = self.inactivity.poll(now);
        self.bus.emit_all(inactivity);
        let pattern = self.patterns.poll(now);
        self.bus.emit_all(pattern);
    }

    /// Check for a time-of-day pattern right away, independent of the schedule
    pub fn evaluate_patterns(&mut self, now: DateTime<Utc>) {
        let event = self.patterns.evaluate(now);
        self.bus.emit_all(event);
    }

    // ------------------------------------------------------------------
    // Saved places
    // ------------------------------------------------------------------

    /// Save the latest position fix as a named place
    pub fn save_current_position_as_place(
        &mut self,
        name: &str,
        activity: &str,
    ) -> Result<Place, DetectError> {
        self.location.save_current_position(name, activity)
    }

    pub fn add_place(
        &mut self,
        name: &str,
        position: Position,
        activity: &str,
    ) -> Result<Place, DetectError> {
        self.location.add_place(name, position, activity)
    }

    /// Returns whether a place with this name existed
    pub fn remove_place(&mut self, name: &str) -> bool {
        self.location.remove_place(name)
    }

    pub fn list_places(&self) -> Vec<Place> {
        self.location.places().places().to_vec()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn current_position(&self) -> Option<Position> {
        self.location.last_position()
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion.state()
    }

    pub fn noise_state(&self) -> NoiseLevel {
        self.noise.state()
    }

    /// Rounded mean of the buffered noise samples, 0 when empty
    pub fn noise_level(&self) -> i64 {
        self.noise.level()
    }

    pub fn status(&self, now: DateTime<Utc>) -> StatusSnapshot {
        StatusSnapshot {
            motion: self.motion.status(),
            location: self.location.status(),
            screen: self.screen.status(),
            inactivity: self.inactivity.status(now),
            noise: self.noise.status(),
            patterns: self.patterns.status(),
        }
    }

    fn module(&self, module: ModuleKind) -> &dyn DetectionModule {
        match module {
            ModuleKind::Motion => &self.motion,
            ModuleKind::Location => &self.location,
            ModuleKind::Screen => &self.screen,
            ModuleKind::Inactivity => &self.inactivity,
            ModuleKind::Noise => &self.noise,
            ModuleKind::Patterns => &self.patterns,
        }
    }

    fn module_mut(&mut self, module: ModuleKind) -> &mut dyn DetectionModule {
        match module {
            ModuleKind::Motion => &mut self.motion,
            ModuleKind::Location => &mut self.location,
            ModuleKind::Screen => &mut self.screen,
            ModuleKind::Inactivity => &mut self.inactivity,
            ModuleKind::Noise => &mut self.noise,
            ModuleKind::Patterns => &mut self.patterns,
        }
    }
}

impl Default for DetectionEngine {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset_north;
    use crate::history::{HistoryEntry, HistoryLog};
    use crate::platform::StaticBackend;
    use crate::store::APP_STATE_KEY;
    use crate::test_support::at;
    use crate::types::{Availability, EventDetails, EventKind};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    const MINUTE: i64 = 60_000;

    struct Harness {
        engine: DetectionEngine,
        store: MemoryStore,
        events: Rc<RefCell<Vec<DetectionEvent>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_backends(SensorBackends::granted())
        }

        fn with_backends(backends: SensorBackends) -> Self {
            let store = MemoryStore::new();
            let mut config = DetectionConfig::default();
            config.patterns.utc_offset_minutes = Some(0);
            let mut engine =
                DetectionEngine::new(config, Rc::new(store.clone()), backends).unwrap();

            let events = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&events);
            engine.initialize(move |event| sink.borrow_mut().push(event.clone()));

            Self {
                engine,
                store,
                events,
            }
        }

        fn kinds(&self) -> Vec<EventKind> {
            self.events.borrow().iter().map(|e| e.kind).collect()
        }

        fn take(&self) -> Vec<DetectionEvent> {
            self.events.borrow_mut().drain(..).collect()
        }
    }

    #[test]
    fn test_enable_emits_started_once() {
        let mut h = Harness::new();
        h.engine.set_module_enabled(at(0), ModuleKind::Motion, true);
        h.engine.set_module_enabled(at(1), ModuleKind::Motion, true);
        h.engine.set_module_enabled(at(2), ModuleKind::Screen, true);

        assert_eq!(
            h.kinds(),
            vec![
                EventKind::Started(ModuleKind::Motion),
                EventKind::Started(ModuleKind::Screen)
            ]
        );
        assert!(h.engine.is_enabled(ModuleKind::Motion));
        assert!(!h.engine.is_enabled(ModuleKind::Noise));
    }

    #[test]
    fn test_unknown_module_name() {
        let mut h = Harness::new();
        let result = h.engine.set_module_enabled_by_name(at(0), "compass", true);
        assert!(matches!(result, Err(DetectError::UnknownModule(_))));
        h.engine
            .set_module_enabled_by_name(at(0), "mic", true)
            .unwrap();
        assert!(h.engine.is_enabled(ModuleKind::Noise));
    }

    #[test]
    fn test_denied_microphone_reports_unavailable() {
        let mut backends = SensorBackends::granted();
        backends.noise = Box::new(StaticBackend::denied("Permission denied"));
        let mut h = Harness::with_backends(backends);

        h.engine.set_module_enabled(at(0), ModuleKind::Noise, true);
        for i in 0..20 {
            h.engine.push_noise_level(at(i * 500), 80.0);
        }

        let events = h.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Unavailable(ModuleKind::Noise));
        assert_eq!(
            h.engine.status(at(0)).noise.availability,
            Availability::Unavailable {
                reason: "Permission denied".to_string()
            }
        );
    }

    #[test]
    fn test_unsupported_sensor_retried_on_enable() {
        let backend = StaticBackend::unsupported("DeviceMotionEvent not supported");
        let calls = backend.calls();
        let mut backends = SensorBackends::granted();
        backends.motion = Box::new(backend);
        let mut h = Harness::with_backends(backends);

        h.engine.set_module_enabled(at(0), ModuleKind::Motion, true);
        let events = h.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Unavailable(ModuleKind::Motion));
        assert_eq!(
            events[0].details,
            EventDetails::Lifecycle {
                module: ModuleKind::Motion,
                reason: Some("DeviceMotionEvent not supported".to_string())
            }
        );

        // Samples while unavailable never reach the classifier
        for i in 0..40 {
            let x = if i % 2 == 0 { 6.0 } else { -6.0 };
            h.engine
                .push_motion(at(i * 250), AccelerationSample::new(x, 0.0, 9.81));
        }
        assert!(h.take().is_empty());
        assert_eq!(h.engine.motion_state(), MotionState::Unknown);

        // Enabling again asks the platform again; still no subscription opened
        h.engine.set_module_enabled(at(20_000), ModuleKind::Motion, true);
        assert_eq!(calls.attempts(), 2);
        assert_eq!(calls.open(), 0);
        assert_eq!(h.kinds(), vec![EventKind::Unavailable(ModuleKind::Motion)]);
        assert_eq!(
            h.engine.status(at(20_000)).motion.availability,
            Availability::Unavailable {
                reason: "DeviceMotionEvent not supported".to_string()
            }
        );
    }

    #[test]
    fn test_pending_acquisition_completed_by_host() {
        let mut h = Harness::with_backends(SensorBackends::deferred());
        h.engine.set_module_enabled(at(0), ModuleKind::Location, true);
        assert!(h.kinds().is_empty());

        // Fixes before the grant are dropped
        h.engine.push_position(at(100), Position::new(1.0, 1.0));
        assert_eq!(h.engine.current_position(), None);

        h.engine.complete_acquisition(at(200), ModuleKind::Location, Ok(()));
        h.engine.push_position(at(300), Position::new(1.0, 1.0));
        assert_eq!(h.kinds(), vec![EventKind::Started(ModuleKind::Location)]);
        assert_eq!(h.engine.current_position(), Some(Position::new(1.0, 1.0)));
    }

    #[test]
    fn test_home_round_trip() {
        let mut h = Harness::new();
        h.engine.set_module_enabled(at(0), ModuleKind::Location, true);
        let home = Position::new(51.5007, -0.1246);
        h.engine.push_position(at(0), home);

        let saved = h
            .engine
            .save_current_position_as_place("Home", "Wake Up")
            .unwrap();
        assert_eq!(saved.position(), home);
        assert_eq!(
            h.engine.list_places(),
            vec![Place::new("Home", home, "Wake Up")]
        );

        assert!(h.engine.remove_place("Home"));
        assert!(h.engine.list_places().is_empty());
    }

    #[test]
    fn test_places_survive_engine_restart() {
        let h = Harness::new();
        let mut engine = h.engine;
        engine
            .add_place("Gym", Position::new(10.0, 10.0), "Exercise")
            .unwrap();

        let reopened = DetectionEngine::new(
            DetectionConfig::default(),
            Rc::new(h.store.clone()),
            SensorBackends::granted(),
        )
        .unwrap();
        assert_eq!(reopened.list_places().len(), 1);
        assert_eq!(reopened.list_places()[0].activity, "Exercise");
    }

    #[test]
    fn test_arrival_and_departure() {
        let mut h = Harness::new();
        let home = Position::new(40.7128, -74.0060);
        h.engine.add_place("Home", home, "Wake Up").unwrap();
        h.engine.set_module_enabled(at(0), ModuleKind::Location, true);
        h.take();

        h.engine.push_position(at(0), offset_north(home, 50.0));
        h.engine.push_position(at(MINUTE), offset_north(home, 60.0));
        h.engine.push_position(at(2 * MINUTE), offset_north(home, 400.0));

        let events = h.take();
        assert_eq!(
            events.iter().map(|e| e.kind).collect::<Vec<_>>(),
            vec![EventKind::LocationArrived, EventKind::LocationLeft]
        );
        assert_eq!(events[0].suggested_activity.as_deref(), Some("Wake Up"));
    }

    #[test]
    fn test_motion_still_then_walking() {
        let mut h = Harness::new();
        h.engine.set_module_enabled(at(0), ModuleKind::Motion, true);
        h.take();

        let still = AccelerationSample::new(0.0, 0.0, 9.9);
        let walking = AccelerationSample::new(0.0, 0.0, 12.0);
        let mut t = 0;
        for _ in 0..40 {
            h.engine.push_motion(at(t), still);
            t += 200;
        }
        assert!(h.kinds().is_empty());
        assert_eq!(h.engine.motion_state(), MotionState::Still);

        for _ in 0..60 {
            h.engine.push_motion(at(t), walking);
            t += 200;
        }
        assert_eq!(h.kinds(), vec![EventKind::MotionChange]);
        assert_eq!(h.engine.motion_state(), MotionState::Walking);
    }

    #[test]
    fn test_screen_return_through_engine() {
        let mut h = Harness::new();
        h.engine.set_module_enabled(at(0), ModuleKind::Screen, true);
        h.take();

        h.engine.push_visibility(at(0), true);
        h.engine.push_visibility(at(4 * MINUTE), false);
        assert!(h.kinds().is_empty());

        h.engine.push_visibility(at(5 * MINUTE), true);
        h.engine.push_visibility(at(11 * MINUTE), false);
        let events = h.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details, EventDetails::ScreenReturn { away_minutes: 6 });
    }

    #[test]
    fn test_inactivity_schedule() {
        let mut h = Harness::new();
        h.engine.set_module_enabled(at(0), ModuleKind::Inactivity, true);
        h.take();

        let mut fired_at = Vec::new();
        for minute in 1..=150 {
            h.engine.advance(at(minute * MINUTE));
            if !h.take().is_empty() {
                fired_at.push(minute);
            }
        }
        assert_eq!(fired_at, vec![90, 120, 150]);
    }

    #[test]
    fn test_intention_resets_inactivity() {
        let mut h = Harness::new();
        h.engine.set_module_enabled(at(0), ModuleKind::Inactivity, true);
        h.take();

        h.engine.advance(at(80 * MINUTE));
        h.engine.notify_intention_recorded(at(80 * MINUTE));
        h.engine.advance(at(100 * MINUTE));
        assert!(h.kinds().is_empty());
        assert_eq!(h.engine.status(at(100 * MINUTE)).inactivity.minutes_since_intention, 20);

        h.engine.advance(at(170 * MINUTE));
        assert_eq!(h.kinds(), vec![EventKind::Inactivity]);
    }

    #[test]
    fn test_disable_cancels_timers() {
        let mut h = Harness::new();
        h.engine.set_module_enabled(at(0), ModuleKind::Inactivity, true);
        h.engine.set_module_enabled(at(0), ModuleKind::Patterns, true);
        h.take();

        h.engine.set_module_enabled(at(MINUTE), ModuleKind::Inactivity, false);
        h.engine.set_module_enabled(at(MINUTE), ModuleKind::Patterns, false);
        h.engine.advance(at(500 * MINUTE));
        assert!(h.kinds().is_empty());

        let status = h.engine.status(at(500 * MINUTE));
        assert_eq!(status.inactivity.next_nudge_at, None);
        assert_eq!(status.patterns.next_evaluation_at, None);
    }

    #[test]
    fn test_pattern_evaluation_reads_host_history() {
        let mut h = Harness::new();
        let mut log = HistoryLog::new();
        for day in 1..=10 {
            let key = format!("2024-05-{:02}", day);
            let (activity, ts) = if day <= 3 {
                ("Exercise", format!("{}T07:10:00Z", key))
            } else {
                ("Deep Focus", format!("{}T14:00:00Z", key))
            };
            log.push(&key, HistoryEntry::new(activity, &ts));
        }
        h.store
            .save(APP_STATE_KEY, &log.to_app_state_json().unwrap())
            .unwrap();

        let now: DateTime<Utc> = "2024-05-11T07:00:00Z".parse().unwrap();
        h.engine.set_module_enabled(now, ModuleKind::Patterns, true);
        h.take();

        // Initial delay, then the first scheduled scan
        h.engine.advance(now + chrono::Duration::seconds(5));
        assert!(h.kinds().is_empty());
        h.engine.advance(now + chrono::Duration::seconds(10));

        let events = h.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].suggested_activity.as_deref(), Some("Exercise"));
        match &events[0].details {
            EventDetails::PatternMatch {
                frequency_pct,
                count,
                total_days,
                ..
            } => {
                assert_eq!((*frequency_pct, *count, *total_days), (30, 3, 10));
            }
            other => panic!("unexpected details: {other:?}"),
        }

        // On-demand evaluation uses the same rules
        h.engine.evaluate_patterns(now);
        assert_eq!(h.kinds(), vec![EventKind::PatternMatch]);
    }

    #[test]
    fn test_shutdown_releases_sensors() {
        let motion = StaticBackend::granted();
        let noise = StaticBackend::granted();
        let motion_calls = motion.calls();
        let noise_calls = noise.calls();
        let mut backends = SensorBackends::granted();
        backends.motion = Box::new(motion);
        backends.noise = Box::new(noise);
        let mut h = Harness::with_backends(backends);

        h.engine.set_module_enabled(at(0), ModuleKind::Motion, true);
        h.engine.set_module_enabled(at(0), ModuleKind::Noise, true);
        h.engine.shutdown();

        assert_eq!(motion_calls.open(), 0);
        assert_eq!(noise_calls.open(), 0);
        for module in ModuleKind::ALL {
            assert!(!h.engine.is_enabled(module));
        }
    }

    #[test]
    fn test_noise_level_query() {
        let mut h = Harness::new();
        assert_eq!(h.engine.noise_level(), 0);
        h.engine.set_module_enabled(at(0), ModuleKind::Noise, true);
        h.engine.push_noise_spectrum(at(0), &[20; 16]);
        h.engine.push_noise_spectrum(at(500), &[31; 16]);
        assert_eq!(h.engine.noise_level(), 26);
        assert_eq!(h.engine.noise_state(), NoiseLevel::Unknown);
    }
}
