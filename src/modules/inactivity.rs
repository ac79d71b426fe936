//! Inactivity nudges
//!
//! Counts down from the last recorded intention. The first nudge fires
//! after the threshold, later ones on the shorter repeat cadence until the
//! host records a new intention.

use chrono::{DateTime, Duration, Utc};

use super::{roll_past, DetectionModule};
use crate::config::{millis, InactivityConfig};
use crate::types::{
    Availability, DetectionEvent, EventDetails, EventKind, InactivityStatus, ModuleKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Waiting out the initial threshold
    Threshold,
    Repeating,
}

pub struct InactivityModule {
    config: InactivityConfig,
    enabled: bool,
    last_intention: Option<DateTime<Utc>>,
    next_due: Option<DateTime<Utc>>,
    stage: Stage,
}

impl InactivityModule {
    pub fn new(config: InactivityConfig) -> Self {
        Self {
            config,
            enabled: false,
            last_intention: None,
            next_due: None,
            stage: Stage::Threshold,
        }
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due
    }

    /// Whole minutes since the last intention (or since enabling)
    pub fn minutes_since_intention(&self, now: DateTime<Utc>) -> i64 {
        self.last_intention
            .map(|at| round_minutes(now - at))
            .unwrap_or(0)
    }

    /// A new intention was recorded; the countdown restarts from zero
    pub fn notify_intention(&mut self, now: DateTime<Utc>) {
        self.last_intention = Some(now);
        if self.enabled {
            self.arm(now);
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> InactivityStatus {
        InactivityStatus {
            enabled: self.enabled,
            availability: self.availability(),
            minutes_since_intention: self.minutes_since_intention(now),
            next_nudge_at: self.next_due,
        }
    }

    fn arm(&mut self, now: DateTime<Utc>) {
        self.stage = Stage::Threshold;
        self.next_due = now.checked_add_signed(millis(self.config.threshold_ms));
    }
}

impl DetectionModule for InactivityModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Inactivity
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
        self.last_intention = Some(now);
        self.arm(now);
        Some(DetectionEvent::started(ModuleKind::Inactivity, now))
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.next_due = None;
        self.stage = Stage::Threshold;
    }

    /// Fire at most one nudge; due times missed in between are skipped
    fn poll(&mut self, now: DateTime<Utc>) -> Option<DetectionEvent> {
        let due = self.next_due.filter(|due| *due <= now)?;

        let (minutes, message) = match self.stage {
            Stage::Threshold => {
                let minutes = round_minutes(millis(self.config.threshold_ms));
                (
                    minutes,
                    format!(
                        "It's been {} minutes since your last intention. What are you doing now?",
                        minutes
                    ),
                )
            }
            Stage::Repeating => {
                let minutes = self
                    .last_intention
                    .map(|at| round_minutes(now - at))
                    .unwrap_or(0);
                (
                    minutes,
                    format!("{} minutes without an intention. Pause and refocus?", minutes),
                )
            }
        };

        self.next_due = roll_past(due, millis(self.config.repeat_ms), now);
        self.stage = Stage::Repeating;

        Some(DetectionEvent::new(
            EventKind::Inactivity,
            now,
            message,
            None,
            EventDetails::Inactivity { minutes },
        ))
    }
}

fn round_minutes(elapsed: Duration) -> i64 {
    (elapsed.num_milliseconds() as f64 / 60_000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::at;
    use pretty_assertions::assert_eq;

    const MINUTE: i64 = 60_000;

    fn enabled_module() -> InactivityModule {
        let mut module = InactivityModule::new(InactivityConfig::default());
        module.enable(at(0));
        module
    }

    /// Step the clock one minute at a time and collect nudge minutes
    fn run(module: &mut InactivityModule, from_min: i64, to_min: i64) -> Vec<(i64, i64)> {
        (from_min..=to_min)
            .filter_map(|m| {
                module.poll(at(m * MINUTE)).map(|e| match e.details {
                    EventDetails::Inactivity { minutes } => (m, minutes),
                    other => panic!("unexpected details: {other:?}"),
                })
            })
            .collect()
    }

    #[test]
    fn test_first_nudge_then_repeats() {
        let mut module = enabled_module();
        let fired = run(&mut module, 0, 150);
        assert_eq!(fired, vec![(90, 90), (120, 120), (150, 150)]);
    }

    #[test]
    fn test_intention_rearms_from_zero() {
        let mut module = enabled_module();
        run(&mut module, 0, 100);
        module.notify_intention(at(100 * MINUTE));

        assert_eq!(module.next_due(), Some(at(190 * MINUTE)));
        let fired = run(&mut module, 101, 220);
        assert_eq!(fired, vec![(190, 90), (220, 120)]);
    }

    #[test]
    fn test_missed_periods_coalesce() {
        let mut module = enabled_module();
        let event = module.poll(at(200 * MINUTE)).unwrap();
        assert_eq!(event.details, EventDetails::Inactivity { minutes: 90 });
        assert_eq!(event.at, at(200 * MINUTE));
        assert_eq!(module.next_due(), Some(at(210 * MINUTE)));
        assert!(module.poll(at(200 * MINUTE)).is_none());
    }

    #[test]
    fn test_unrepresentable_threshold_disarms() {
        let config = InactivityConfig {
            threshold_ms: u64::MAX,
            ..InactivityConfig::default()
        };
        let mut module = InactivityModule::new(config);

        let event = module.enable(at(0)).unwrap();
        assert_eq!(event.kind, EventKind::Started(ModuleKind::Inactivity));
        assert_eq!(module.next_due(), None);
        assert!(module.poll(at(1_000 * MINUTE)).is_none());
    }

    #[test]
    fn test_disable_cancels_without_emitting() {
        let mut module = enabled_module();
        run(&mut module, 0, 89);
        module.disable();
        assert!(run(&mut module, 90, 300).is_empty());
        assert_eq!(module.next_due(), None);
    }

    #[test]
    fn test_intention_while_disabled_is_remembered() {
        let mut module = InactivityModule::new(InactivityConfig::default());
        module.notify_intention(at(0));
        assert_eq!(module.next_due(), None);
        assert_eq!(module.minutes_since_intention(at(42 * MINUTE)), 42);
    }
}
