//! Bounded sample buffer
//!
//! A `SeriesBuffer` holds at most `capacity` samples, oldest first. Pushing
//! into a full buffer evicts from the front.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A single (timestamp, value) point in a series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Sample stamped with the current time
    pub fn now(value: f64) -> Self {
        Self::new(Utc::now().timestamp_millis(), value)
    }
}

/// Direction of the latest sample relative to the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// FIFO ring of samples with a fixed capacity
#[derive(Debug, Clone)]
pub struct SeriesBuffer {
    capacity: usize,
    samples: VecDeque<Sample>,
    /// Changed since the last history snapshot
    dirty: bool,
}

impl SeriesBuffer {
    /// Create an empty buffer. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            dirty: false,
        }
    }

    /// Create a buffer pre-filled from a snapshot, keeping the newest
    /// `capacity` samples
    pub fn restore(capacity: usize, samples: Vec<Sample>) -> Self {
        let mut buffer = Self::new(capacity);
        buffer.extend(samples);
        buffer.dirty = false;
        buffer
    }

    /// Append a sample, evicting the oldest while over capacity
    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.dirty = true;
    }

    pub fn extend(&mut self, samples: impl IntoIterator<Item = Sample>) {
        for sample in samples {
            self.push(sample);
        }
    }

    /// Samples, oldest first
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    pub fn trend(&self) -> Option<Trend> {
        let mut newest = self.samples.iter().rev();
        let last = newest.next()?;
        let previous = newest.next()?;

        Some(if last.value > previous.value {
            Trend::Up
        } else if last.value < previous.value {
            Trend::Down
        } else {
            Trend::Flat
        })
    }

    pub fn clear(&mut self) {
        if !self.samples.is_empty() {
            self.samples.clear();
            self.dirty = true;
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = SeriesBuffer::new(20);
        for i in 0..25 {
            buffer.push(Sample::new(i, i as f64));
        }

        let samples = buffer.samples();
        assert_eq!(samples.len(), 20);
        assert_eq!(samples.first().unwrap().timestamp, 5);
        assert_eq!(samples.last().unwrap().timestamp, 24);
        assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_zero_capacity_bumped() {
        let mut buffer = SeriesBuffer::new(0);
        buffer.push(Sample::new(1, 1.0));
        buffer.push(Sample::new(2, 2.0));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.samples(), vec![Sample::new(2, 2.0)]);
    }

    #[test]
    fn test_trend() {
        let mut buffer = SeriesBuffer::new(10);
        assert_eq!(buffer.trend(), None);

        buffer.push(Sample::new(1, 10.0));
        assert_eq!(buffer.trend(), None);

        buffer.push(Sample::new(2, 12.0));
        assert_eq!(buffer.trend(), Some(Trend::Up));

        buffer.push(Sample::new(3, 11.0));
        assert_eq!(buffer.trend(), Some(Trend::Down));

        buffer.push(Sample::new(4, 11.0));
        assert_eq!(buffer.trend(), Some(Trend::Flat));
        assert_eq!(buffer.latest(), Some(Sample::new(4, 11.0)));
    }

    #[test]
    fn test_restore_truncates_and_is_clean() {
        let samples: Vec<Sample> = (0..8).map(|i| Sample::new(i, i as f64)).collect();
        let buffer = SeriesBuffer::restore(5, samples);

        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.samples()[0].timestamp, 3);
        assert!(!buffer.is_dirty());
    }

    #[test]
    fn test_dirty_tracking() {
        let mut buffer = SeriesBuffer::new(3);
        assert!(!buffer.is_dirty());

        buffer.clear();
        assert!(!buffer.is_dirty());

        buffer.push(Sample::new(1, 1.0));
        assert!(buffer.is_dirty());

        buffer.mark_clean();
        buffer.clear();
        assert!(buffer.is_dirty());
        assert!(buffer.is_empty());
    }
}
