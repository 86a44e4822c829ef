//! REST API router configuration

use super::handlers::{
    add_process, delete_process, describe_process, health, lifecycle, list_processes,
    oneshot_history, process_logs, prometheus_metrics, reload_config, save_config, scale_process,
    stack_logs, update_process, AppState,
};
use axum::{
    routing::{delete, get, post, put},
    Router,
};

/// Build the control-plane router, shared by the TCP and the unix-socket
/// listener
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        // Process CRUD
        .route("/api/v1/processes", get(list_processes))
        .route("/api/v1/processes", post(add_process))
        .route("/api/v1/processes/:name", get(describe_process))
        .route("/api/v1/processes/:name", put(update_process))
        .route("/api/v1/processes/:name", delete(delete_process))
        // Lifecycle (start|stop|restart, plus trigger|pause|resume for
        // scheduled processes)
        .route("/api/v1/processes/:name/:action", post(lifecycle))
        .route("/api/v1/processes/:name/scale", post(scale_process))
        // Logs
        .route("/api/v1/processes/:name/logs", get(process_logs))
        .route("/api/v1/logs", get(stack_logs))
        // Config round-trip
        .route("/api/v1/config/reload", post(reload_config))
        .route("/api/v1/config/save", post(save_config))
        // Oneshot history
        .route("/api/v1/oneshot/history", get(oneshot_history))
        // Metrics exposition
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}
