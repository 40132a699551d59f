//! Fixed-capacity sliding window of samples.

use std::collections::VecDeque;

/// Default number of samples kept by a [`SlidingWindow`].
pub const DEFAULT_WINDOW_SIZE: usize = 60;

/// Average and maximum over the current window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub average: f64,
    pub maximum: f64,
}

/// FIFO window of the most recent `capacity` samples.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SlidingWindow {
    /// Create an empty window. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, dropping the oldest ones beyond capacity.
    pub fn record(&mut self, value: f64) {
        self.samples.push_back(value);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Average and maximum of the window; both are zero when it is empty.
    #[must_use]
    pub fn summary(&self) -> Summary {
        if self.samples.is_empty() {
            return Summary::default();
        }
        let sum: f64 = self.samples.iter().sum();
        let maximum = self
            .samples
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        Summary {
            average: sum / self.samples.len() as f64,
            maximum,
        }
    }

    /// Samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary_is_zero() {
        let window = SlidingWindow::default();
        let summary = window.summary();
        assert_eq!(summary.average, 0.0);
        assert_eq!(summary.maximum, 0.0);
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let mut window = SlidingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            window.record(v);
        }
        assert_eq!(window.iter().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);

        let summary = window.summary();
        assert_eq!(summary.average, 4.0);
        assert_eq!(summary.maximum, 5.0);
    }

    #[test]
    fn test_length_tracks_min_of_calls_and_capacity() {
        let capacity = 5;
        let mut window = SlidingWindow::new(capacity);
        let mut recorded = Vec::new();

        for i in 0..12 {
            let v = f64::from(i) * 1.5 - 4.0;
            window.record(v);
            recorded.push(v);

            assert_eq!(window.len(), recorded.len().min(capacity));
            let expected = &recorded[recorded.len().saturating_sub(capacity)..];
            assert_eq!(window.iter().collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn test_negative_samples() {
        let mut window = SlidingWindow::new(4);
        window.record(-0.5);
        window.record(-0.25);
        let summary = window.summary();
        assert_eq!(summary.maximum, -0.25);
        assert_eq!(summary.average, -0.375);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut window = SlidingWindow::new(0);
        window.record(1.0);
        window.record(2.0);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.iter().collect::<Vec<_>>(), vec![2.0]);
    }
}
