//! Fixed-capacity time series of resource samples
//! One ring per instance; a single writer and many concurrent readers.
//! Readers always receive copies, never views into the storage.

use crate::constants::sampler::DEFAULT_RING_CAPACITY;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::SystemTime;

/// One resource measurement of a live instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: SystemTime,
    pub cpu_percent: f32,
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    pub mem_percent: f32,
    pub thread_count: i64,
    /// -1 when the platform cannot report file descriptor counts
    pub fd_count: i64,
}

impl ResourceSample {
    #[cfg(test)]
    pub fn test_sample(cpu_percent: f32) -> Self {
        Self {
            timestamp: SystemTime::now(),
            cpu_percent,
            rss_bytes: 0,
            vms_bytes: 0,
            mem_percent: 0.0,
            thread_count: 1,
            fd_count: -1,
        }
    }
}

/// Ring storage. Oldest samples are overwritten in place once full.
#[derive(Debug)]
struct Ring {
    samples: Vec<ResourceSample>,
    capacity: usize,
    /// Index of the next write
    head: usize,
    len: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
        }
    }

    fn add(&mut self, sample: ResourceSample) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.head] = sample;
        }
        self.head = (self.head + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    /// Chronological iteration, oldest first
    fn iter_chronological(&self) -> impl Iterator<Item = &ResourceSample> {
        let start = if self.len < self.capacity { 0 } else { self.head };
        (0..self.len).map(move |i| &self.samples[(start + i) % self.capacity])
    }

    fn latest(&self) -> Option<ResourceSample> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.capacity - 1) % self.capacity;
        Some(self.samples[idx])
    }
}

/// Thread-safe fixed-capacity sample buffer for one instance
#[derive(Debug)]
pub struct TimeSeriesBuffer {
    ring: RwLock<Ring>,
}

impl TimeSeriesBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(Ring::new(capacity.max(1))),
        }
    }

    /// O(1); overwrites the oldest sample when full
    pub fn add(&self, sample: ResourceSample) {
        let mut ring = self.ring.write().unwrap_or_else(|e| e.into_inner());
        ring.add(sample);
    }

    /// Newest sample, if any
    pub fn latest(&self) -> Option<ResourceSample> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        ring.latest()
    }

    /// Samples with `timestamp >= since` in ascending order, at most `limit`.
    /// A non-positive limit means no limit beyond capacity.
    pub fn get_range(&self, since: SystemTime, limit: i64) -> Vec<ResourceSample> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        let take = if limit <= 0 { usize::MAX } else { limit as usize };
        ring.iter_chronological()
            .filter(|s| s.timestamp >= since)
            .take(take)
            .copied()
            .collect()
    }

    /// The last `n` samples in chronological order
    pub fn get_last(&self, n: usize) -> Vec<ResourceSample> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        let skip = ring.len.saturating_sub(n);
        ring.iter_chronological().skip(skip).copied().collect()
    }

    pub fn size(&self) -> usize {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        ring.len
    }

    pub fn clear(&self) {
        let mut ring = self.ring.write().unwrap_or_else(|e| e.into_inner());
        let capacity = ring.capacity;
        *ring = Ring::new(capacity);
    }
}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample_at(cpu: f32, secs: u64) -> ResourceSample {
        ResourceSample {
            timestamp: UNIX_EPOCH + Duration::from_secs(secs),
            cpu_percent: cpu,
            rss_bytes: 1024,
            vms_bytes: 2048,
            mem_percent: 0.5,
            thread_count: 2,
            fd_count: 8,
        }
    }

    #[test]
    fn test_add_and_latest() {
        let buffer = TimeSeriesBuffer::with_capacity(4);
        assert!(buffer.latest().is_none());
        buffer.add(sample_at(1.0, 1));
        buffer.add(sample_at(2.0, 2));
        assert_eq!(buffer.latest().unwrap().cpu_percent, 2.0);
        assert_eq!(buffer.size(), 2);
    }

    #[test]
    fn test_overflow_overwrites_oldest() {
        let buffer = TimeSeriesBuffer::with_capacity(3);
        for i in 0..5u64 {
            buffer.add(sample_at(i as f32, i));
        }
        assert_eq!(buffer.size(), 3);
        let last = buffer.get_last(3);
        let cpus: Vec<f32> = last.iter().map(|s| s.cpu_percent).collect();
        assert_eq!(cpus, vec![2.0, 3.0, 4.0]);
        assert_eq!(buffer.latest().unwrap().cpu_percent, 4.0);
    }

    #[test]
    fn test_get_range_since_filters() {
        let buffer = TimeSeriesBuffer::with_capacity(10);
        for i in 0..6u64 {
            buffer.add(sample_at(i as f32, i * 10));
        }
        let since = UNIX_EPOCH + Duration::from_secs(30);
        let range = buffer.get_range(since, 0);
        let cpus: Vec<f32> = range.iter().map(|s| s.cpu_percent).collect();
        assert_eq!(cpus, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_get_range_limit() {
        let buffer = TimeSeriesBuffer::with_capacity(10);
        for i in 0..6u64 {
            buffer.add(sample_at(i as f32, i));
        }
        let range = buffer.get_range(UNIX_EPOCH, 2);
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].cpu_percent, 0.0);

        // non-positive limit means everything
        assert_eq!(buffer.get_range(UNIX_EPOCH, -1).len(), 6);
    }

    #[test]
    fn test_get_last_more_than_stored() {
        let buffer = TimeSeriesBuffer::with_capacity(5);
        buffer.add(sample_at(7.0, 7));
        let last = buffer.get_last(10);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].cpu_percent, 7.0);
    }

    #[test]
    fn test_clear() {
        let buffer = TimeSeriesBuffer::with_capacity(3);
        buffer.add(sample_at(1.0, 1));
        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert!(buffer.latest().is_none());
    }

    #[test]
    fn test_concurrent_readers_one_writer() {
        use std::sync::Arc;
        use std::thread;

        let buffer = Arc::new(TimeSeriesBuffer::with_capacity(64));
        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..500u64 {
                    buffer.add(sample_at(i as f32, i));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let last = buffer.get_last(16);
                        // chronological order must hold in every snapshot
                        for pair in last.windows(2) {
                            assert!(pair[0].timestamp <= pair[1].timestamp);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(buffer.size(), 64);
    }
}
