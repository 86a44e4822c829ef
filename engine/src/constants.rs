//! Engine-wide defaults and tuning knobs

/// Defaults for process definitions
pub mod process {
    /// Seconds a child must stay alive before it is considered running
    /// (only used when no health check is configured)
    pub const DEFAULT_MIN_HEALTHY_SEC: u64 = 1;

    /// Grace period before SIGKILL after a stop request
    pub const DEFAULT_STOP_TIMEOUT_SEC: u64 = 10;

    /// Base delay between restart attempts
    pub const DEFAULT_RESTART_DELAY_SEC: u64 = 1;

    /// Cap for the exponential restart backoff
    pub const DEFAULT_RESTART_BACKOFF_MAX_SEC: u64 = 60;

    /// Multiplier applied per consecutive failure
    pub const DEFAULT_RESTART_BACKOFF_FACTOR: f64 = 2.0;
}

/// Defaults for lifecycle hooks
pub mod hook {
    /// Deadline applied when a hook declares no timeout (or declares 0)
    pub const DEFAULT_TIMEOUT_SEC: u64 = 30;

    /// How long a timed-out hook gets between SIGTERM and SIGKILL
    pub const KILL_GRACE_SEC: u64 = 2;
}

/// Defaults for health checking
pub mod health_check {
    pub const DEFAULT_INTERVAL_SEC: u64 = 10;
    pub const DEFAULT_TIMEOUT_SEC: u64 = 5;
    pub const DEFAULT_HEALTHY_THRESHOLD: u32 = 1;
    pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;
    pub const DEFAULT_GRACE_PERIOD_SEC: u64 = 5;
}

/// Resource sampling and time-series retention
pub mod sampler {
    /// Seconds between sampling ticks
    pub const DEFAULT_INTERVAL_SEC: u64 = 5;

    /// Ring capacity per instance: one hour at the default interval
    pub const DEFAULT_RING_CAPACITY: usize = 720;
}

/// Log collection
pub mod logs {
    /// Lines retained per instance before the oldest are dropped
    pub const DEFAULT_LINES_PER_INSTANCE: usize = 1000;

    /// Default `limit` for log queries that do not specify one
    pub const DEFAULT_QUERY_LIMIT: usize = 100;
}

/// Oneshot execution history retention (bounded FIFO)
pub const ONESHOT_HISTORY_CAPACITY: usize = 200;

/// Debounce window for config file change notifications
pub const RELOAD_DEBOUNCE_MS: u64 = 500;

/// Control plane defaults
pub mod control_plane {
    /// Default TCP bind address for the REST API
    pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9180";

    /// Unix socket search order, first writable directory wins
    pub const SOCKET_SEARCH_PATHS: &[&str] = &[
        "/var/run/phpeek-pm.sock",
        "/tmp/phpeek-pm.sock",
        "/run/phpeek-pm.sock",
    ];
}

/// Environment variables consumed by the manager
pub mod env {
    pub const CONFIG_PATH: &str = "PHPEEK_PM_CONFIG";
    pub const LOG_LEVEL: &str = "PHPEEK_PM_LOG_LEVEL";

    /// Exported to every managed child
    pub const PROCESS_NAME: &str = "PHPEEK_PM_PROCESS_NAME";
    /// Exported to every managed child
    pub const INSTANCE_ID: &str = "PHPEEK_PM_INSTANCE_ID";
    /// Exported to hook children only
    pub const HOOK_NAME: &str = "PHPEEK_PM_HOOK_NAME";
}
