//! Port for reading resource usage of live children

use crate::domain::ResourceSample;

/// Reads point-in-time resource usage for a pid.
/// Returns None when the pid is gone or the platform cannot report it.
pub trait ResourceReader: Send + Sync {
    fn sample(&self, pid: u32) -> Option<ResourceSample>;

    /// Refresh any cached system tables before a batch of `sample` calls
    fn refresh(&self, _pids: &[u32]) {}
}

/// Fixed-answer reader for tests
pub struct StaticResourceReader {
    pub sample: Option<ResourceSample>,
}

impl ResourceReader for StaticResourceReader {
    fn sample(&self, _pid: u32) -> Option<ResourceSample> {
        self.sample
    }
}
