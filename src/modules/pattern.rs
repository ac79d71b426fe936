//! Time-of-day pattern learning
//!
//! Every evaluation re-reads the host's history log, counts which
//! activities were recorded within a window around the current wall-clock
//! time on any day, and suggests the most common one when it shows up often
//! enough. Too little history or an unreadable log simply means "no
//! pattern".

use chrono::{DateTime, FixedOffset, Local, Timelike, Utc};
use log::{debug, warn};
use std::rc::Rc;

use super::{roll_past, DetectionModule};
use crate::config::{millis, PatternConfig};
use crate::history::HistoryLog;
use crate::store::KeyValueStore;
use crate::types::{
    Availability, DetectionEvent, EventDetails, EventKind, ModuleKind, PatternStatus,
};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Activity counts around one time of day
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternTally {
    /// Days present in the log, including days without matches
    pub total_days: usize,
    /// Counts in first-seen order
    pub counts: Vec<(String, usize)>,
}

impl PatternTally {
    fn record(&mut self, activity: &str) {
        match self.counts.iter_mut().find(|(name, _)| name == activity) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((activity.to_string(), 1)),
        }
    }

    /// Most frequent activity; the first one seen wins ties
    pub fn top(&self) -> Option<(&str, usize)> {
        let mut best: Option<(&str, usize)> = None;
        for (name, count) in &self.counts {
            if best.map_or(true, |(_, c)| *count > c) {
                best = Some((name.as_str(), *count));
            }
        }
        best
    }
}

/// A suggestion backed by history
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub activity: String,
    pub count: usize,
    pub total_days: usize,
    /// `count / total_days`
    pub frequency: f64,
    pub time_of_day: &'static str,
}

impl PatternMatch {
    pub fn frequency_pct(&self) -> i64 {
        (self.frequency * 100.0).round() as i64
    }

    pub fn to_event(&self, now: DateTime<Utc>) -> DetectionEvent {
        let pct = self.frequency_pct();
        DetectionEvent::new(
            EventKind::PatternMatch,
            now,
            format!(
                "You often do \"{}\" around this time ({}% of days). Set an intention?",
                self.activity, pct
            ),
            Some(self.activity.clone()),
            EventDetails::PatternMatch {
                activity: self.activity.clone(),
                frequency_pct: pct,
                count: self.count,
                total_days: self.total_days,
                time_of_day: self.time_of_day.to_string(),
            },
        )
    }
}

/// Count activities recorded within `window_minutes` of `minute_of_day`.
///
/// Entry times are read in `offset`; the distance wraps around midnight.
pub fn tally_time_window(
    log: &HistoryLog,
    minute_of_day: u32,
    window_minutes: u32,
    offset: FixedOffset,
) -> PatternTally {
    let mut tally = PatternTally {
        total_days: log.day_count(),
        counts: Vec::new(),
    };

    for (_, entries) in log.days() {
        for entry in entries {
            let Some(activity) = entry.activity.as_deref().filter(|a| !a.trim().is_empty())
            else {
                continue;
            };
            let Some(recorded) = entry.recorded_at() else {
                continue;
            };
            let local = recorded.with_timezone(&offset);
            let minutes = local.hour() * 60 + local.minute();
            if circular_distance(minutes, minute_of_day) <= window_minutes {
                tally.record(activity);
            }
        }
    }
    tally
}

/// Evaluate the log at `now`, returning a match when the thresholds pass
pub fn detect_pattern(
    log: &HistoryLog,
    now: DateTime<Utc>,
    config: &PatternConfig,
) -> Option<PatternMatch> {
    if log.day_count() < config.min_days {
        debug!(
            "pattern check skipped: {} of {} days of history",
            log.day_count(),
            config.min_days
        );
        return None;
    }

    let offset = local_offset(config, now);
    let local_now = now.with_timezone(&offset);
    let tally = tally_time_window(
        log,
        local_now.hour() * 60 + local_now.minute(),
        config.window_minutes,
        offset,
    );

    let (activity, count) = tally.top()?;
    let frequency = count as f64 / tally.total_days as f64;
    if frequency < config.min_frequency || count < config.min_occurrences {
        debug!(
            "no pattern: top {:?} seen {} times over {} days",
            activity, count, tally.total_days
        );
        return None;
    }

    Some(PatternMatch {
        activity: activity.to_string(),
        count,
        total_days: tally.total_days,
        frequency,
        time_of_day: time_of_day(local_now.hour()),
    })
}

pub fn time_of_day(hour: u32) -> &'static str {
    if hour < 12 {
        "morning"
    } else if hour < 17 {
        "afternoon"
    } else {
        "evening"
    }
}

/// Offset used to read wall-clock time
pub fn local_offset(config: &PatternConfig, now: DateTime<Utc>) -> FixedOffset {
    config
        .utc_offset_minutes
        .and_then(|minutes| minutes.checked_mul(60))
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| *now.with_timezone(&Local).offset())
}

fn circular_distance(a: u32, b: u32) -> u32 {
    let d = a.abs_diff(b) % MINUTES_PER_DAY;
    d.min(MINUTES_PER_DAY - d)
}

pub struct PatternModule {
    config: PatternConfig,
    store: Rc<dyn KeyValueStore>,
    enabled: bool,
    next_due: Option<DateTime<Utc>>,
}

impl PatternModule {
    pub fn new(config: PatternConfig, store: Rc<dyn KeyValueStore>) -> Self {
        Self {
            config,
            store,
            enabled: false,
            next_due: None,
        }
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due
    }

    /// Read the history and check for a pattern right now
    pub fn evaluate(&self, now: DateTime<Utc>) -> Option<DetectionEvent> {
        let log = match HistoryLog::load(self.store.as_ref()) {
            Ok(log) => log,
            Err(e) => {
                warn!("history unreadable, treating as empty: {}", e);
                return None;
            }
        };
        detect_pattern(&log, now, &self.config).map(|m| m.to_event(now))
    }

    pub fn status(&self) -> PatternStatus {
        PatternStatus {
            enabled: self.enabled,
            availability: self.availability(),
            next_evaluation_at: self.next_due,
        }
    }
}

impl DetectionModule for PatternModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Patterns
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
        self.next_due = now.checked_add_signed(millis(self.config.initial_delay_ms));
        Some(DetectionEvent::started(ModuleKind::Patterns, now))
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.next_due = None;
    }

    fn poll(&mut self, now: DateTime<Utc>) -> Option<DetectionEvent> {
        let due = self.next_due.filter(|due| *due <= now)?;

        self.next_due = roll_past(due, millis(self.config.interval_ms), now);

        self.evaluate(now)
    }
}
