//! Debounced state transitions
//!
//! Turns an instantaneous classification into a confirmed transition. A new
//! state must be observed continuously for the dwell time before it is
//! committed, and each committed change is reported exactly once. The first
//! state committed out of "unknown" is never reported.

use chrono::{DateTime, Duration, Utc};

/// How the first classification is adopted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselinePolicy {
    /// The first state goes through the same dwell as any other change
    Debounced,
    /// The first state becomes the baseline as soon as it is seen
    Immediate,
}

/// A committed change between two known states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

/// Dwell-time debouncer over any small state enum
#[derive(Debug, Clone)]
pub struct DebouncedClassifier<S> {
    committed: Option<S>,
    pending: Option<(S, DateTime<Utc>)>,
    dwell: Duration,
    baseline: BaselinePolicy,
}

impl<S: Copy + PartialEq> DebouncedClassifier<S> {
    pub fn new(dwell: Duration, baseline: BaselinePolicy) -> Self {
        Self {
            committed: None,
            pending: None,
            dwell,
            baseline,
        }
    }

    /// Currently committed state, `None` while unknown
    pub fn committed(&self) -> Option<S> {
        self.committed
    }

    pub fn pending(&self) -> Option<S> {
        self.pending.map(|(state, _)| state)
    }

    pub fn pending_since(&self) -> Option<DateTime<Utc>> {
        self.pending.map(|(_, since)| since)
    }

    /// Feed this tick's classification.
    ///
    /// Returns a transition only when a sustained change away from a known
    /// state is committed.
    pub fn observe(&mut self, state: S, now: DateTime<Utc>) -> Option<Transition<S>> {
        if self.committed.is_none() && self.baseline == BaselinePolicy::Immediate {
            self.committed = Some(state);
            self.pending = None;
            return None;
        }

        if self.committed == Some(state) {
            self.pending = None;
            return None;
        }

        match self.pending {
            Some((candidate, since)) if candidate == state => {
                if now - since < self.dwell {
                    return None;
                }
                let previous = self.committed.replace(state);
                self.pending = None;
                previous.map(|from| Transition { from, to: state })
            }
            _ => {
                self.pending = Some((state, now));
                None
            }
        }
    }

    /// Forget everything, back to unknown
    pub fn reset(&mut self) {
        self.committed = None;
        self.pending = None;
    }
}
