//! Log collector
//! Bounded per-instance line buffers fed by the pipe forwarders. Overflow
//! drops the oldest line and bumps the drop counter. Ordering across the
//! stdout and stderr pipes of one instance is not guaranteed; lines are
//! timestamped at collection.

use crate::constants::logs as defaults;
use crate::domain::ports::{OutputSink, OutputStream};
use crate::infrastructure::metrics;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::SystemTime;

/// One captured line
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub instance_id: String,
    pub stream: &'static str,
    pub line: String,
    pub timestamp: SystemTime,
}

struct InstanceBuffer {
    process: String,
    lines: VecDeque<LogLine>,
    dropped: u64,
}

/// Collector shared by all pipe forwarder tasks
pub struct LogCollector {
    capacity_per_instance: usize,
    buffers: Mutex<HashMap<String, InstanceBuffer>>,
}

impl LogCollector {
    pub fn new() -> Self {
        Self::with_capacity(defaults::DEFAULT_LINES_PER_INSTANCE)
    }

    pub fn with_capacity(capacity_per_instance: usize) -> Self {
        Self {
            capacity_per_instance: capacity_per_instance.max(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    fn process_of(instance_id: &str) -> String {
        // instance ids are <process>-<slot>
        match instance_id.rsplit_once('-') {
            Some((process, _)) => process.to_string(),
            None => instance_id.to_string(),
        }
    }

    /// Most recent lines of one process across its instances, oldest first
    pub fn recent_for_process(&self, process: &str, limit: usize) -> Vec<LogLine> {
        let limit = if limit == 0 {
            defaults::DEFAULT_QUERY_LIMIT
        } else {
            limit
        };
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        let mut lines: Vec<LogLine> = buffers
            .values()
            .filter(|b| b.process == process)
            .flat_map(|b| b.lines.iter().cloned())
            .collect();
        lines.sort_by_key(|l| l.timestamp);
        let skip = lines.len().saturating_sub(limit);
        lines.split_off(skip)
    }

    /// Most recent lines across the whole stack, oldest first
    pub fn recent_all(&self, limit: usize) -> Vec<LogLine> {
        let limit = if limit == 0 {
            defaults::DEFAULT_QUERY_LIMIT
        } else {
            limit
        };
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        let mut lines: Vec<LogLine> = buffers
            .values()
            .flat_map(|b| b.lines.iter().cloned())
            .collect();
        lines.sort_by_key(|l| l.timestamp);
        let skip = lines.len().saturating_sub(limit);
        lines.split_off(skip)
    }

    /// Drop the buffers of every instance of a deleted process
    pub fn forget_process(&self, process: &str) {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers.retain(|_, b| b.process != process);
    }

    pub fn dropped_lines(&self, instance_id: &str) -> u64 {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers.get(instance_id).map(|b| b.dropped).unwrap_or(0)
    }
}

impl Default for LogCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for LogCollector {
    fn push_line(&self, instance_id: &str, stream: OutputStream, line: String) {
        let entry = LogLine {
            instance_id: instance_id.to_string(),
            stream: match stream {
                OutputStream::Stdout => "stdout",
                OutputStream::Stderr => "stderr",
            },
            line,
            timestamp: SystemTime::now(),
        };
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        let buffer = buffers
            .entry(instance_id.to_string())
            .or_insert_with(|| InstanceBuffer {
                process: Self::process_of(instance_id),
                lines: VecDeque::new(),
                dropped: 0,
            });
        if buffer.lines.len() == self.capacity_per_instance {
            buffer.lines.pop_front();
            buffer.dropped += 1;
            metrics::inc_logs_dropped(&buffer.process, instance_id, 1);
        }
        buffer.lines.push_back(entry);
    }
}
