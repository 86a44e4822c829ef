//! Resource sampler
//! A single task wakes every interval, enumerates live instances, reads
//! their usage through the resource-reader port, and writes each sample to
//! the Prometheus gauges and the per-instance ring. Rings come into being
//! on first sample and are dropped when their process goes away.

use crate::constants::sampler as defaults;
use crate::domain::ports::ResourceReader;
use crate::domain::{ResourceSample, TimeSeriesBuffer};
use crate::infrastructure::metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A live instance to sample: (process, instance id, pid)
pub type SampleTarget = (String, String, u32);

pub struct ResourceSampler {
    reader: Arc<dyn ResourceReader>,
    ring_capacity: usize,
    buffers: Mutex<HashMap<String, Arc<TimeSeriesBuffer>>>,
}

impl ResourceSampler {
    pub fn new(reader: Arc<dyn ResourceReader>) -> Self {
        Self::with_ring_capacity(reader, defaults::DEFAULT_RING_CAPACITY)
    }

    pub fn with_ring_capacity(reader: Arc<dyn ResourceReader>, ring_capacity: usize) -> Self {
        Self {
            reader,
            ring_capacity,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// One sampling pass over the given targets
    pub fn tick(&self, targets: &[SampleTarget]) {
        let pids: Vec<u32> = targets.iter().map(|(_, _, pid)| *pid).collect();
        self.reader.refresh(&pids);

        for (process, instance_id, pid) in targets {
            let Some(sample) = self.reader.sample(*pid) else {
                debug!(instance = %instance_id, pid, "No sample for pid");
                continue;
            };
            metrics::record_sample(process, instance_id, &sample);
            self.buffer_for(instance_id).add(sample);
        }
    }

    /// The ring for an instance, created lazily on first use
    fn buffer_for(&self, instance_id: &str) -> Arc<TimeSeriesBuffer> {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(TimeSeriesBuffer::with_capacity(self.ring_capacity)))
            .clone()
    }

    /// Newest sample of an instance, if it was ever sampled
    pub fn latest(&self, instance_id: &str) -> Option<ResourceSample> {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers.get(instance_id).and_then(|b| b.latest())
    }

    /// Chronological history of an instance
    pub fn history(&self, instance_id: &str, limit: usize) -> Vec<ResourceSample> {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        match buffers.get(instance_id) {
            Some(buffer) => buffer.get_last(if limit == 0 { usize::MAX } else { limit }),
            None => Vec::new(),
        }
    }

    /// Drop the rings and gauges of an instance that is permanently gone
    pub fn forget_instance(&self, process: &str, instance_id: &str) {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        if buffers.remove(instance_id).is_some() {
            metrics::forget_instance(process, instance_id);
        }
    }

    /// Drop everything belonging to a deleted process
    pub fn forget_process(&self, process: &str) {
        let prefix = format!("{}-", process);
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        let gone: Vec<String> = buffers
            .keys()
            .filter(|id| id.starts_with(&prefix))
            .cloned()
            .collect();
        for id in gone {
            buffers.remove(&id);
            metrics::forget_instance(process, &id);
        }
    }
}

/// Run the sampling loop until cancelled. `targets` yields the live
/// instances on every tick.
pub fn spawn(
    sampler: Arc<ResourceSampler>,
    interval: Duration,
    targets: impl Fn() -> Vec<SampleTarget> + Send + 'static,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Resource sampler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
            sampler.tick(&targets());
        }
        info!("Resource sampler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::StaticResourceReader;

    fn sampler_with(sample: Option<ResourceSample>) -> ResourceSampler {
        ResourceSampler::with_ring_capacity(Arc::new(StaticResourceReader { sample }), 8)
    }

    #[test]
    fn test_tick_writes_ring() {
        let sampler = sampler_with(Some(ResourceSample::test_sample(5.0)));
        let targets = vec![("web".to_string(), "web-0".to_string(), 100)];
        sampler.tick(&targets);
        sampler.tick(&targets);

        let latest = sampler.latest("web-0").unwrap();
        assert_eq!(latest.cpu_percent, 5.0);
        assert_eq!(sampler.history("web-0", 0).len(), 2);
    }

    #[test]
    fn test_buffers_created_lazily() {
        let sampler = sampler_with(None);
        // reader yields nothing, so no ring appears
        sampler.tick(&[("web".to_string(), "web-0".to_string(), 100)]);
        assert!(sampler.latest("web-0").is_none());
        assert!(sampler.history("web-0", 0).is_empty());
    }

    #[test]
    fn test_forget_process_drops_rings() {
        let sampler = sampler_with(Some(ResourceSample::test_sample(1.0)));
        sampler.tick(&[
            ("web".to_string(), "web-0".to_string(), 100),
            ("web".to_string(), "web-1".to_string(), 101),
            ("db".to_string(), "db-0".to_string(), 102),
        ]);
        sampler.forget_process("web");
        assert!(sampler.latest("web-0").is_none());
        assert!(sampler.latest("web-1").is_none());
        assert!(sampler.latest("db-0").is_some());
    }

    #[tokio::test]
    async fn test_spawn_loop_ticks_until_cancelled() {
        let sampler = Arc::new(sampler_with(Some(ResourceSample::test_sample(2.0))));
        let cancel = CancellationToken::new();
        let handle = spawn(
            sampler.clone(),
            Duration::from_millis(20),
            || vec![("web".to_string(), "web-0".to_string(), 100)],
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(sampler.history("web-0", 0).len() >= 2);
    }
}
