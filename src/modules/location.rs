//! Location awareness
//!
//! Two independent checks run on every position fix:
//!
//! - travel: consecutive fixes further apart than the significant distance
//!   produce a `location_moved` event
//! - geofence: the nearest saved place within the radius becomes the
//!   current place; entering, leaving or switching places is reported
//!
//! Saved places live in a [`PlaceBook`] persisted through the key-value
//! store.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::rc::Rc;

use super::{DetectionModule, SensorLink};
use crate::config::LocationConfig;
use crate::error::{AcquisitionError, DetectError};
use crate::geo::haversine_distance;
use crate::platform::SensorBackend;
use crate::store::{KeyValueStore, PLACES_KEY};
use crate::types::{
    Availability, DetectionEvent, EventDetails, EventKind, LocationStatus, ModuleKind, Place,
    Position,
};

/// Saved places with write-through persistence
pub struct PlaceBook {
    places: Vec<Place>,
    store: Rc<dyn KeyValueStore>,
}

impl PlaceBook {
    /// Load the persisted list. Unreadable data starts an empty book.
    pub fn load(store: Rc<dyn KeyValueStore>) -> Self {
        let places = match store.load(PLACES_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!("ignoring unreadable saved places: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("failed to read saved places: {}", e);
                Vec::new()
            }
        };
        Self { places, store }
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Place> {
        self.places.iter().find(|p| p.name == name)
    }

    /// Insert a place; an existing place with the same name is replaced
    pub fn insert(&mut self, place: Place) {
        match self.places.iter_mut().find(|p| p.name == place.name) {
            Some(existing) => *existing = place,
            None => self.places.push(place),
        }
        self.persist();
    }

    /// Remove the place with this name, returning whether one existed
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(index) = self.places.iter().position(|p| p.name == name) else {
            return false;
        };
        self.places.remove(index);
        self.persist();
        true
    }

    /// Nearest place strictly inside `radius_m`, earlier places win ties
    pub fn nearest_within(&self, position: Position, radius_m: f64) -> Option<&Place> {
        let mut best: Option<(&Place, f64)> = None;
        for place in &self.places {
            let distance = haversine_distance(position, place.position());
            if distance >= radius_m {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((place, distance));
            }
        }
        best.map(|(place, _)| place)
    }

    fn persist(&self) {
        let result = serde_json::to_string(&self.places)
            .map_err(DetectError::from)
            .and_then(|json| self.store.save(PLACES_KEY, &json));
        if let Err(e) = result {
            warn!("failed to persist saved places: {}", e);
        }
    }
}

pub struct LocationModule {
    config: LocationConfig,
    link: SensorLink,
    enabled: bool,
    book: PlaceBook,
    last_position: Option<Position>,
    current_place: Option<Place>,
}

impl LocationModule {
    pub fn new(
        config: LocationConfig,
        backend: Box<dyn SensorBackend>,
        store: Rc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            link: SensorLink::new(ModuleKind::Location, backend),
            config,
            enabled: false,
            book: PlaceBook::load(store),
            last_position: None,
            current_place: None,
        }
    }

    pub fn places(&self) -> &PlaceBook {
        &self.book
    }

    pub fn last_position(&self) -> Option<Position> {
        self.last_position
    }

    pub fn current_place(&self) -> Option<&Place> {
        self.current_place.as_ref()
    }

    pub fn add_place(
        &mut self,
        name: &str,
        position: Position,
        activity: &str,
    ) -> Result<Place, DetectError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DetectError::InvalidInput("place name must not be empty".to_string()));
        }
        if !position.lat.is_finite() || !position.lng.is_finite() {
            return Err(DetectError::InvalidInput(format!(
                "invalid coordinates for {}: {}, {}",
                name, position.lat, position.lng
            )));
        }
        let place = Place::new(name, position, activity);
        self.book.insert(place.clone());
        Ok(place)
    }

    /// Save the latest fix under `name`
    pub fn save_current_position(
        &mut self,
        name: &str,
        activity: &str,
    ) -> Result<Place, DetectError> {
        let position = self.last_position.ok_or(DetectError::NoPosition)?;
        self.add_place(name, position, activity)
    }

    pub fn remove_place(&mut self, name: &str) -> bool {
        self.book.remove(name)
    }

    /// Process one position fix
    pub fn on_position(&mut self, now: DateTime<Utc>, position: Position) -> Vec<DetectionEvent> {
        let mut events = Vec::new();
        if !self.link.is_active() {
            return events;
        }
        if !position.lat.is_finite() || !position.lng.is_finite() {
            debug!("dropping invalid position {:?}", position);
            return events;
        }

        if let Some(last) = self.last_position {
            let distance = haversine_distance(last, position);
            if distance > self.config.significant_move_m {
                let meters = distance.round() as i64;
                events.push(DetectionEvent::new(
                    EventKind::LocationMoved,
                    now,
                    format!("You've traveled {}m. New segment?", meters),
                    None,
                    EventDetails::LocationMoved {
                        distance_m: meters,
                        from: last,
                        to: position,
                    },
                ));
            }
        }
        self.last_position = Some(position);

        events.extend(self.check_place(now, position));
        events
    }

    fn check_place(&mut self, now: DateTime<Utc>, position: Position) -> Option<DetectionEvent> {
        let found = self
            .book
            .nearest_within(position, self.config.geofence_radius_m)
            .cloned();

        match (found, self.current_place.take()) {
            (Some(place), Some(current)) if place.name == current.name => {
                self.current_place = Some(current);
                None
            }
            (Some(place), previous) => {
                let event = DetectionEvent::new(
                    EventKind::LocationArrived,
                    now,
                    format!("You've arrived at {}! Set your intention.", place.name),
                    place.suggested_activity().map(str::to_string),
                    EventDetails::LocationArrived {
                        place: place.name.clone(),
                        previous_place: previous.map(|p| p.name),
                    },
                );
                self.current_place = Some(place);
                Some(event)
            }
            (None, Some(left)) => Some(DetectionEvent::new(
                EventKind::LocationLeft,
                now,
                format!("You've left {}. What's next?", left.name),
                Some(self.config.left_place_activity.clone()),
                EventDetails::LocationLeft { place: left.name },
            )),
            (None, None) => None,
        }
    }

    pub fn status(&self) -> LocationStatus {
        LocationStatus {
            enabled: self.enabled,
            availability: self.link.availability().clone(),
            current_place: self.current_place.as_ref().map(|p| p.name.clone()),
            last_position: self.last_position,
            saved_places: self.book.len(),
        }
    }

    fn reset(&mut self) {
        self.last_position = None;
        self.current_place = None;
    }
}

impl DetectionModule for LocationModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Location
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
        self.link.acquire(None, now)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset_north;
    use crate::platform::StaticBackend;
    use crate::store::MemoryStore;
    use crate::test_support::at;
    use pretty_assertions::assert_eq;

    const HOME: Position = Position {
        lat: 37.7749,
        lng: -122.4194,
    };

    fn module_with(store: &MemoryStore) -> LocationModule {
        let mut module = LocationModule::new(
            LocationConfig::default(),
            Box::new(StaticBackend::granted()),
            Rc::new(store.clone()),
        );
        module.enable(at(0));
        module
    }

    fn kinds(events: &[DetectionEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_geofence_boundary_is_strict() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        module.add_place("Home", HOME, "Wake Up").unwrap();

        let inside = module.on_position(at(0), offset_north(HOME, 149.9));
        assert_eq!(kinds(&inside), vec![EventKind::LocationArrived]);
        assert_eq!(inside[0].suggested_activity.as_deref(), Some("Wake Up"));

        let outside = module.on_position(at(1000), offset_north(HOME, 150.0001));
        assert_eq!(kinds(&outside), vec![EventKind::LocationLeft]);
        assert_eq!(outside[0].suggested_activity.as_deref(), Some("Driving"));
    }

    #[test]
    fn test_staying_inside_is_silent() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        module.add_place("Home", HOME, "").unwrap();

        let first = module.on_position(at(0), HOME);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].suggested_activity, None);
        for i in 1..5 {
            let events = module.on_position(at(i * 1000), offset_north(HOME, 10.0 * i as f64));
            assert!(events.is_empty());
        }
        assert_eq!(module.current_place().map(|p| p.name.as_str()), Some("Home"));
    }

    #[test]
    fn test_switching_places_records_previous() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        let cafe = offset_north(HOME, 250.0);
        module.add_place("Home", HOME, "Wake Up").unwrap();
        module.add_place("Cafe", cafe, "Deep Focus").unwrap();

        module.on_position(at(0), HOME);
        let events = module.on_position(at(60_000), cafe);
        assert_eq!(kinds(&events), vec![EventKind::LocationArrived]);
        match &events[0].details {
            EventDetails::LocationArrived {
                place,
                previous_place,
            } => {
                assert_eq!(place, "Cafe");
                assert_eq!(previous_place.as_deref(), Some("Home"));
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn test_nearest_place_wins() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        module.add_place("Far", offset_north(HOME, 120.0), "").unwrap();
        module.add_place("Near", offset_north(HOME, 20.0), "").unwrap();

        module.on_position(at(0), HOME);
        assert_eq!(module.current_place().map(|p| p.name.as_str()), Some("Near"));
    }

    #[test]
    fn test_significant_move_comes_before_arrival() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        let office = offset_north(HOME, 2000.0);
        module.add_place("Office", office, "Meeting").unwrap();

        assert!(module.on_position(at(0), HOME).is_empty());
        let events = module.on_position(at(600_000), office);
        assert_eq!(
            kinds(&events),
            vec![EventKind::LocationMoved, EventKind::LocationArrived]
        );
        match &events[0].details {
            EventDetails::LocationMoved { distance_m, .. } => assert_eq!(*distance_m, 2000),
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn test_small_hops_are_not_travel() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        module.on_position(at(0), HOME);
        let events = module.on_position(at(1000), offset_north(HOME, 499.0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_save_and_remove_round_trip() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);

        assert!(matches!(
            module.save_current_position("Home", "Wake Up"),
            Err(DetectError::NoPosition)
        ));

        module.on_position(at(0), HOME);
        let saved = module.save_current_position("Home", "Wake Up").unwrap();
        assert_eq!(saved.position(), HOME);
        assert_eq!(module.places().get("Home").map(|p| p.activity.as_str()), Some("Wake Up"));

        // Persisted for the next engine
        let reloaded = PlaceBook::load(Rc::new(store.clone()));
        assert_eq!(reloaded.places(), module.places().places());

        assert!(module.remove_place("Home"));
        assert!(module.places().get("Home").is_none());
        assert!(!module.remove_place("Home"));
        assert!(PlaceBook::load(Rc::new(store)).is_empty());
    }

    #[test]
    fn test_duplicate_name_replaces_entry() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        module.add_place("Gym", HOME, "Exercise").unwrap();
        module.add_place("Gym", offset_north(HOME, 1000.0), "Walking").unwrap();

        assert_eq!(module.places().len(), 1);
        assert_eq!(module.places().places()[0].activity, "Walking");
    }

    #[test]
    fn test_blank_name_rejected() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        assert!(matches!(
            module.add_place("  ", HOME, ""),
            Err(DetectError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_corrupt_places_start_empty() {
        let store = MemoryStore::new();
        store.save(PLACES_KEY, "not json").unwrap();
        let book = PlaceBook::load(Rc::new(store));
        assert!(book.is_empty());
    }

    #[test]
    fn test_disable_forgets_position() {
        let store = MemoryStore::new();
        let mut module = module_with(&store);
        module.on_position(at(0), HOME);
        module.disable();

        assert_eq!(module.last_position(), None);
        assert!(module.on_position(at(1000), HOME).is_empty());
        assert_eq!(module.last_position(), None);
    }
}
