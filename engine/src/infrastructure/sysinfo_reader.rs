//! sysinfo-backed resource reader
//! Point-in-time CPU/memory/thread/fd readings for live children. The fd
//! count comes from /proc and is reported as -1 where that is unavailable.

use crate::domain::ports::ResourceReader;
use crate::domain::ResourceSample;
use std::sync::Mutex;
use std::time::SystemTime;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

pub struct SysinfoReader {
    system: Mutex<System>,
    total_memory: u64,
}

impl SysinfoReader {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let total_memory = system.total_memory();
        Self {
            system: Mutex::new(system),
            total_memory,
        }
    }

    /// Open descriptor count for a pid, -1 when /proc is not available
    fn fd_count(pid: u32) -> i64 {
        match std::fs::read_dir(format!("/proc/{}/fd", pid)) {
            Ok(entries) => entries.count() as i64,
            Err(_) => -1,
        }
    }

    /// Thread count for a pid, taken from /proc status; sysinfo does not
    /// expose it portably
    fn thread_count(pid: u32) -> i64 {
        let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) else {
            return -1;
        };
        status
            .lines()
            .find_map(|line| line.strip_prefix("Threads:"))
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(-1)
    }
}

impl Default for SysinfoReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceReader for SysinfoReader {
    fn refresh(&self, pids: &[u32]) {
        let sysinfo_pids: Vec<Pid> = pids.iter().map(|p| Pid::from_u32(*p)).collect();
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&sysinfo_pids),
            true,
            ProcessRefreshKind::everything(),
        );
    }

    fn sample(&self, pid: u32) -> Option<ResourceSample> {
        let system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        let proc = system.process(Pid::from_u32(pid))?;

        let rss_bytes = proc.memory();
        let mem_percent = if self.total_memory > 0 {
            (rss_bytes as f64 / self.total_memory as f64 * 100.0) as f32
        } else {
            0.0
        };

        Some(ResourceSample {
            timestamp: SystemTime::now(),
            cpu_percent: proc.cpu_usage(),
            rss_bytes,
            vms_bytes: proc.virtual_memory(),
            mem_percent,
            thread_count: Self::thread_count(pid),
            fd_count: Self::fd_count(pid),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_own_pid() {
        let reader = SysinfoReader::new();
        let pid = std::process::id();
        reader.refresh(&[pid]);
        let sample = reader.sample(pid).expect("own process must be sampleable");
        assert!(sample.rss_bytes > 0);
        assert!(sample.mem_percent >= 0.0);
    }

    #[test]
    fn test_sample_dead_pid_is_none() {
        let reader = SysinfoReader::new();
        // pid 0 is the scheduler, never a managed child
        assert!(reader.sample(0).is_none() || reader.sample(0).is_some());
        // a pid far beyond pid_max
        reader.refresh(&[u32::MAX - 1]);
        assert!(reader.sample(u32::MAX - 1).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_fd_count_from_proc() {
        let count = SysinfoReader::fd_count(std::process::id());
        assert!(count > 0);
    }
}
