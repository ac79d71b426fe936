//! Replay a synthetic morning through the detection engine.
//!
//! Run with `cargo run --example replay_day`.

use chrono::{DateTime, Duration, Utc};
use std::rc::Rc;

use smart_detect::geo::offset_north;
use smart_detect::store::APP_STATE_KEY;
use smart_detect::{
    DetectError, DetectionConfig, DetectionEngine, EventRecorder, HistoryEntry, HistoryLog,
    KeyValueStore, MemoryStore, ModuleKind, Position, ReplayAction, ReplayRecord, SensorBackends,
};

fn main() -> Result<(), DetectError> {
    let start: DateTime<Utc> = "2024-05-01T07:00:00Z"
        .parse()
        .map_err(|e| DetectError::InvalidInput(format!("{}", e)))?;

    // Three earlier mornings with "Stretch" logged around 07:10
    let store = MemoryStore::new();
    let mut history = HistoryLog::new();
    for day in ["2024-04-28", "2024-04-29", "2024-04-30"] {
        history.push(day, HistoryEntry::new("Stretch", &format!("{}T07:10:00Z", day)));
    }
    store.save(APP_STATE_KEY, &history.to_app_state_json()?)?;

    let mut config = DetectionConfig::default();
    config.patterns.utc_offset_minutes = Some(0);

    let mut engine = DetectionEngine::new(config, Rc::new(store), SensorBackends::granted())?;
    let recorder = EventRecorder::new();
    engine.initialize(recorder.sink());

    let home = Position::new(51.5007, -0.1246);
    let cafe = offset_north(home, 800.0);

    let mut records = Vec::new();
    for module in ModuleKind::ALL {
        records.push(ReplayRecord::new(
            start,
            ReplayAction::Enable {
                module,
                enabled: true,
            },
        ));
    }
    records.push(ReplayRecord::new(
        start + Duration::seconds(1),
        ReplayAction::SavePlace {
            name: "Home".to_string(),
            activity: "Wake Up".to_string(),
            lat: Some(home.lat),
            lng: Some(home.lng),
        },
    ));
    records.push(ReplayRecord::new(
        start + Duration::seconds(2),
        ReplayAction::Position {
            lat: home.lat,
            lng: home.lng,
        },
    ));

    // A walk: vigorous readings every 250 ms for ten seconds
    for i in 0..40 {
        let wobble = if i % 2 == 0 { 6.0 } else { -6.0 };
        records.push(ReplayRecord::new(
            start + Duration::minutes(5) + Duration::milliseconds(250 * i),
            ReplayAction::Motion {
                x: wobble,
                y: 0.0,
                z: 9.81,
            },
        ));
    }

    records.push(ReplayRecord::new(
        start + Duration::minutes(20),
        ReplayAction::Position {
            lat: cafe.lat,
            lng: cafe.lng,
        },
    ));
    records.push(ReplayRecord::new(
        start + Duration::minutes(25),
        ReplayAction::Visibility { hidden: true },
    ));
    records.push(ReplayRecord::new(
        start + Duration::minutes(45),
        ReplayAction::Visibility { hidden: false },
    ));
    records.push(ReplayRecord::new(
        start + Duration::minutes(100),
        ReplayAction::Tick,
    ));

    for record in &records {
        record.apply(&mut engine)?;
    }
    engine.shutdown();

    for event in recorder.take() {
        println!(
            "{}  {:<20} {}",
            event.at.format("%H:%M:%S"),
            event.kind,
            event.message
        );
    }

    Ok(())
}
