//! Fixed-size sliding sample window
//!
//! Modules only classify once their window is full, so `average()` reports
//! "not ready" until `capacity` samples have arrived.

use std::collections::VecDeque;

/// Sliding window of the most recent samples
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleBuffer {
    /// Create an empty buffer holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once the window is full
    pub fn push(&mut self, value: f64) {
        self.samples.push_back(value);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.samples.len() >= self.capacity
    }

    /// Mean of the window, `None` until the window is full
    pub fn average(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Self::mean(&self.samples)
    }

    /// Mean of whatever is buffered, `None` when empty
    pub fn partial_average(&self) -> Option<f64> {
        Self::mean(&self.samples)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    fn mean(queue: &VecDeque<f64>) -> Option<f64> {
        if queue.is_empty() {
            return None;
        }
        let sum: f64 = queue.iter().sum();
        Some(sum / queue.len() as f64)
    }
}
