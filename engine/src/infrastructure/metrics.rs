//! Prometheus metrics registry
//! Process-wide singleton with an init-once lifecycle. All updates go through
//! typed functions; nothing else touches the registry. Metric names are part
//! of the compatibility contract and must not change.

use crate::domain::ResourceSample;
use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec_with_registry, register_gauge_with_registry,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, Encoder, Gauge,
    GaugeVec, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder,
};
use std::time::Duration;

struct Metrics {
    registry: Registry,
    cpu_percent: GaugeVec,
    memory_bytes: GaugeVec,
    threads: IntGaugeVec,
    fds: IntGaugeVec,
    restarts_total: IntCounterVec,
    health_checks_total: IntCounterVec,
    hook_duration_seconds: HistogramVec,
    desired_scale: IntGaugeVec,
    actual_scale: IntGaugeVec,
    manager_processes: IntGauge,
    shutdown_seconds: Gauge,
    build_info: IntGaugeVec,
    logs_dropped_total: IntCounterVec,
}

static METRICS: Lazy<Metrics> = Lazy::new(|| {
    let registry = Registry::new();
    let metrics = Metrics {
        cpu_percent: register_gauge_vec_with_registry!(
            "phpeek_pm_process_cpu_percent",
            "CPU usage of a managed instance in percent",
            &["process", "instance"],
            registry
        )
        .unwrap(),
        memory_bytes: register_gauge_vec_with_registry!(
            "phpeek_pm_process_memory_bytes",
            "Memory usage of a managed instance in bytes",
            &["process", "instance", "kind"],
            registry
        )
        .unwrap(),
        threads: register_int_gauge_vec_with_registry!(
            "phpeek_pm_process_threads",
            "Thread count of a managed instance",
            &["process", "instance"],
            registry
        )
        .unwrap(),
        fds: register_int_gauge_vec_with_registry!(
            "phpeek_pm_process_fds",
            "Open file descriptors of a managed instance",
            &["process", "instance"],
            registry
        )
        .unwrap(),
        restarts_total: register_int_counter_vec_with_registry!(
            "phpeek_pm_process_restarts_total",
            "Restarts of managed instances by reason",
            &["process", "reason"],
            registry
        )
        .unwrap(),
        health_checks_total: register_int_counter_vec_with_registry!(
            "phpeek_pm_health_checks_total",
            "Health check probes by type and result",
            &["process", "type", "result"],
            registry
        )
        .unwrap(),
        hook_duration_seconds: register_histogram_vec_with_registry!(
            "phpeek_pm_hook_duration_seconds",
            "Wall time of lifecycle hooks",
            &["hook", "type", "result"],
            registry
        )
        .unwrap(),
        desired_scale: register_int_gauge_vec_with_registry!(
            "phpeek_pm_desired_scale",
            "Desired instance count per process",
            &["process"],
            registry
        )
        .unwrap(),
        actual_scale: register_int_gauge_vec_with_registry!(
            "phpeek_pm_actual_scale",
            "Live instance count per process",
            &["process"],
            registry
        )
        .unwrap(),
        manager_processes: register_int_gauge_with_registry!(
            "phpeek_pm_manager_processes",
            "Number of managed processes",
            registry
        )
        .unwrap(),
        shutdown_seconds: register_gauge_with_registry!(
            "phpeek_pm_shutdown_seconds",
            "Duration of the last manager shutdown in seconds",
            registry
        )
        .unwrap(),
        build_info: register_int_gauge_vec_with_registry!(
            "phpeek_pm_build_info",
            "Build metadata, value is always 1",
            &["version"],
            registry
        )
        .unwrap(),
        logs_dropped_total: register_int_counter_vec_with_registry!(
            "phpeek_pm_logs_dropped_total",
            "Log lines dropped due to per-instance buffer overflow",
            &["process", "instance"],
            registry
        )
        .unwrap(),
        registry,
    };
    metrics
        .build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1);
    metrics
});

/// Record one resource sample for an instance. The fd gauge is only
/// published when the platform reports it.
pub fn record_sample(process: &str, instance: &str, sample: &ResourceSample) {
    let m = &*METRICS;
    m.cpu_percent
        .with_label_values(&[process, instance])
        .set(sample.cpu_percent as f64);
    m.memory_bytes
        .with_label_values(&[process, instance, "rss"])
        .set(sample.rss_bytes as f64);
    m.memory_bytes
        .with_label_values(&[process, instance, "vms"])
        .set(sample.vms_bytes as f64);
    m.threads
        .with_label_values(&[process, instance])
        .set(sample.thread_count);
    if sample.fd_count >= 0 {
        m.fds
            .with_label_values(&[process, instance])
            .set(sample.fd_count);
    } else {
        let _ = m.fds.remove_label_values(&[process, instance]);
    }
}

/// Drop the per-instance gauges of an instance that no longer exists
pub fn forget_instance(process: &str, instance: &str) {
    let m = &*METRICS;
    let _ = m.cpu_percent.remove_label_values(&[process, instance]);
    let _ = m.memory_bytes.remove_label_values(&[process, instance, "rss"]);
    let _ = m.memory_bytes.remove_label_values(&[process, instance, "vms"]);
    let _ = m.threads.remove_label_values(&[process, instance]);
    let _ = m.fds.remove_label_values(&[process, instance]);
}

pub fn inc_restart(process: &str, reason: &str) {
    METRICS
        .restarts_total
        .with_label_values(&[process, reason])
        .inc();
}

pub fn inc_health_check(process: &str, check_type: &str, result: &str) {
    METRICS
        .health_checks_total
        .with_label_values(&[process, check_type, result])
        .inc();
}

pub fn observe_hook_duration(hook: &str, hook_type: &str, result: &str, elapsed: Duration) {
    METRICS
        .hook_duration_seconds
        .with_label_values(&[hook, hook_type, result])
        .observe(elapsed.as_secs_f64());
}

pub fn set_scale(process: &str, desired: u32, actual: u32) {
    let m = &*METRICS;
    m.desired_scale
        .with_label_values(&[process])
        .set(desired as i64);
    m.actual_scale
        .with_label_values(&[process])
        .set(actual as i64);
}

/// Drop the per-process gauges of a deleted process
pub fn forget_process(process: &str) {
    let m = &*METRICS;
    let _ = m.desired_scale.remove_label_values(&[process]);
    let _ = m.actual_scale.remove_label_values(&[process]);
}

pub fn set_manager_processes(count: usize) {
    METRICS.manager_processes.set(count as i64);
}

pub fn set_shutdown_seconds(elapsed: Duration) {
    METRICS.shutdown_seconds.set(elapsed.as_secs_f64());
}

pub fn inc_logs_dropped(process: &str, instance: &str, dropped: u64) {
    METRICS
        .logs_dropped_total
        .with_label_values(&[process, instance])
        .inc_by(dropped);
}

/// Prometheus text exposition of the whole registry
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = METRICS.registry.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
