//! REST API handlers
//! Thin translation between HTTP and scheduler operations. Every mutating
//! handler returns only after the operation converged; the synchronous
//! semantics are part of the control-plane contract.

use crate::application::{ProcessSnapshot, ResourceSampler, SupervisionScheduler};
use crate::domain::{DomainError, ProcessDef, ResourceSample, TriggerKind};
use crate::infrastructure::{metrics, LogCollector, LogLine};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SupervisionScheduler>,
    pub logs: Arc<LogCollector>,
    pub sampler: Arc<ResourceSampler>,
    pub started_at: Instant,
}

/// DomainError with its HTTP mapping
pub struct ApiError(DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            "config_invalid" | "dependency_missing" | "dependency_cycle" => {
                StatusCode::BAD_REQUEST
            }
            "not_found" => StatusCode::NOT_FOUND,
            "already_exists" | "state_conflict" => StatusCode::CONFLICT,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "kind": self.0.kind(),
            "message": self.0.to_string(),
            "target": self.0.target(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    limit: usize,
}

#[derive(Deserialize)]
pub struct ScaleRequest {
    desired: Option<u32>,
    delta: Option<i64>,
}

#[derive(Serialize)]
struct InstanceDetail {
    #[serde(flatten)]
    snapshot: crate::application::InstanceSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    resources: Option<ResourceSample>,
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let processes = state.scheduler.list().await.len();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "processes": processes,
    }))
}

pub async fn list_processes(State(state): State<AppState>) -> Json<Vec<ProcessSnapshot>> {
    Json(state.scheduler.list().await)
}

pub async fn describe_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let (snapshot, def) = state.scheduler.describe(&name).await?;
    let instances: Vec<InstanceDetail> = snapshot
        .instances
        .iter()
        .cloned()
        .map(|snapshot| {
            let resources = state.sampler.latest(&snapshot.id);
            InstanceDetail {
                snapshot,
                resources,
            }
        })
        .collect();
    let recent_executions = match def.process_type {
        crate::domain::ProcessType::Longrun => Vec::new(),
        _ => state.scheduler.oneshot_history_for(&name, 10),
    };
    Ok(Json(json!({
        "name": snapshot.name,
        "state": snapshot.state,
        "schedule_state": snapshot.schedule_state,
        "desired_scale": snapshot.desired_scale,
        "instances": instances,
        "config": &*def,
        "recent_executions": recent_executions,
    })))
}

pub async fn process_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<LogLine>>> {
    // 404 for unknown processes, even though the collector itself would
    // just return an empty list
    state.scheduler.describe(&name).await?;
    Ok(Json(state.logs.recent_for_process(&name, query.limit)))
}

pub async fn stack_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<LogLine>> {
    Json(state.logs.recent_all(query.limit))
}

pub async fn add_process(
    State(state): State<AppState>,
    Json(def): Json<ProcessDef>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let name = def.name.clone();
    state.scheduler.add_process(def).await?;
    Ok((StatusCode::CREATED, Json(json!({ "name": name }))))
}

pub async fn update_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut def): Json<ProcessDef>,
) -> ApiResult<Json<serde_json::Value>> {
    if def.name.is_empty() {
        def.name = name.clone();
    } else if def.name != name {
        return Err(DomainError::ConfigInvalid {
            field: "name".to_string(),
            reason: format!("body name '{}' does not match path '{}'", def.name, name),
        }
        .into());
    }
    state
        .scheduler
        .update_process(def, &CancellationToken::new())
        .await?;
    Ok(Json(json!({ "name": name })))
}

pub async fn delete_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .scheduler
        .delete_process(&name, &CancellationToken::new())
        .await?;
    Ok(Json(json!({ "name": name, "deleted": true })))
}

pub async fn lifecycle(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancel = CancellationToken::new();
    match action.as_str() {
        "start" => state.scheduler.start_process(&name, &cancel).await?,
        "stop" => state.scheduler.stop_process(&name, &cancel).await?,
        "restart" => state.scheduler.restart_process(&name, &cancel).await?,
        "trigger" => {
            state
                .scheduler
                .trigger_process(&name, TriggerKind::Manual, &cancel)
                .await?
        }
        "pause" => state.scheduler.pause_process(&name).await?,
        "resume" => state.scheduler.resume_process(&name).await?,
        _ => {
            return Err(DomainError::NotFound {
                name: format!("action {}", action),
            }
            .into());
        }
    }
    let (snapshot, _) = state.scheduler.describe(&name).await?;
    Ok(Json(json!({ "name": name, "state": snapshot.state })))
}

pub async fn scale_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ScaleRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancel = CancellationToken::new();
    match (request.desired, request.delta) {
        (Some(desired), None) => state.scheduler.set_scale(&name, desired, &cancel).await?,
        (None, Some(delta)) => state.scheduler.adjust_scale(&name, delta, &cancel).await?,
        _ => {
            return Err(DomainError::ConfigInvalid {
                field: "scale".to_string(),
                reason: "exactly one of 'desired' or 'delta' is required".to_string(),
            }
            .into());
        }
    }
    let (snapshot, _) = state.scheduler.describe(&name).await?;
    Ok(Json(json!({
        "name": name,
        "desired_scale": snapshot.desired_scale,
    })))
}

pub async fn reload_config(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state
        .scheduler
        .reload_from_disk(&CancellationToken::new())
        .await?;
    Ok(Json(json!({ "reloaded": true })))
}

pub async fn save_config(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.scheduler.save().await?;
    Ok(Json(json!({ "saved": true })))
}

pub async fn oneshot_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let records = state.scheduler.oneshot_history(query.limit);
    Json(json!({ "executions": records }))
}

pub async fn prometheus_metrics() -> ([(&'static str, &'static str); 1], String) {
    (
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
}
