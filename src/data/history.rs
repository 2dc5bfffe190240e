//! Bounded per-server history for trend indicators.

use std::collections::VecDeque;

use super::entity::{Metric, Sample};

/// Number of samples kept per server.
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// A fixed-capacity FIFO of samples for one server.
///
/// Appending at capacity evicts the oldest sample. Trends are a single-step
/// delta between the two most recent samples, not a slope over the window.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// Create an empty buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sample, evicting the oldest one when full.
    pub fn append(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// `last - second_to_last` for the metric, or 0 with fewer than 2 samples.
    pub fn trend(&self, metric: Metric) -> f64 {
        let len = self.samples.len();
        if len < 2 {
            return 0.0;
        }
        self.samples[len - 1].value(metric) - self.samples[len - 2].value(metric)
    }

    /// The most recent sample.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Values of a metric, oldest first.
    pub fn values(&self, metric: Metric) -> Vec<f64> {
        self.samples.iter().map(|s| s.value(metric)).collect()
    }

    /// Samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
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
}
