//! REST API and internal peer endpoints
//!
//! Public routes live under `/v1`. Routes under `/internal/v1` carry step
//! dispatch, transaction cleanup, the cluster lock table and the cluster
//! store between management nodes.

use crate::commands::{Cluster, CreateVolumeRequest, SetOptionsRequest};
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::storage::{StoreEntries, StoreEntry, StoreKey, StorePrefix, StoreValue};
use crate::common::{KVStore, MemStore, RequestId};
use crate::transaction::{
    ErrorBody, LockBackend, LockRequest, LockResponse, MemLockBackend, StepExecutor, StepRequest,
    StepResponse,
};
use async_stream::stream;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{sse::Event as SseEvent, IntoResponse, Response, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub cluster: Cluster,
    pub executor: Arc<StepExecutor>,
    /// Lock table served to peers when this node is the lock authority
    pub lock_table: Arc<MemLockBackend>,
    /// Cluster store served to peers when this node is the lock authority
    pub store_table: Arc<MemStore>,
}

impl IntoResponse for crate::Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, crate::Error>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/volumes", get(list_volumes).post(create_volume))
        .route("/v1/volumes/:name", get(volume_info))
        .route("/v1/volumes/:name/start", post(start_volume))
        .route("/v1/volumes/:name/stop", post(stop_volume))
        .route("/v1/volumes/:name/options", post(set_options))
        .route("/v1/events", get(events_sse))
        .route("/internal/v1/txn/step", post(run_step))
        .route("/internal/v1/txn/:id/cleanup", post(cleanup_txn))
        .route("/internal/v1/locks/:name/acquire", post(lock_acquire))
        .route("/internal/v1/locks/:name/release", post(lock_release))
        .route("/internal/v1/store/get", post(store_get))
        .route("/internal/v1/store/put", post(store_put))
        .route("/internal/v1/store/delete", post(store_delete))
        .route("/internal/v1/store/list", post(store_list))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "node_id": state.cluster.node_id(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_volumes(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.cluster.list_volumes().await?))
}

async fn create_volume(
    State(state): State<AppState>,
    Json(req): Json<CreateVolumeRequest>,
) -> ApiResult<impl IntoResponse> {
    let volinfo = state.cluster.create_volume(req).await?;
    Ok((StatusCode::CREATED, Json(volinfo)))
}

async fn volume_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.cluster.volume_info(&name).await?))
}

async fn start_volume(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.cluster.start_volume(&req_id.0, &name).await?))
}

async fn stop_volume(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.cluster.stop_volume(&req_id.0, &name).await?))
}

async fn set_options(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(name): Path<String>,
    Json(req): Json<SetOptionsRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .cluster
            .set_volume_options(&req_id.0, &name, req)
            .await?,
    ))
}

/// Server-sent stream of committed state changes
async fn events_sse(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.cluster.events.subscribe();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(data) => yield Ok(SseEvent::default().data(data)),
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream)
}

// === Peer endpoints ===

async fn run_step(
    State(state): State<AppState>,
    Json(req): Json<StepRequest>,
) -> ApiResult<impl IntoResponse> {
    let ctx = state.executor.execute(&req.func, req.ctx).await?;
    Ok(Json(StepResponse { ctx }))
}

async fn cleanup_txn(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    state.executor.cleanup(id);
    StatusCode::NO_CONTENT
}

async fn lock_acquire(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<LockRequest>,
) -> ApiResult<impl IntoResponse> {
    let acquired = state.lock_table.try_lock(&name, &req.owner).await?;
    Ok(Json(LockResponse { acquired }))
}

async fn lock_release(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<LockRequest>,
) -> ApiResult<impl IntoResponse> {
    state.lock_table.unlock(&name, &req.owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn store_get(
    State(state): State<AppState>,
    Json(req): Json<StoreKey>,
) -> ApiResult<impl IntoResponse> {
    let value = state.store_table.get(&req.key).await?;
    Ok(Json(StoreValue { value }))
}

async fn store_put(
    State(state): State<AppState>,
    Json(req): Json<StoreEntry>,
) -> ApiResult<impl IntoResponse> {
    state.store_table.put(&req.key, req.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn store_delete(
    State(state): State<AppState>,
    Json(req): Json<StoreKey>,
) -> ApiResult<impl IntoResponse> {
    state.store_table.delete(&req.key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn store_list(
    State(state): State<AppState>,
    Json(req): Json<StorePrefix>,
) -> ApiResult<impl IntoResponse> {
    let entries = state
        .store_table
        .list_prefix(&req.prefix)
        .await?
        .into_iter()
        .map(|(key, value)| StoreEntry { key, value })
        .collect();
    Ok(Json(StoreEntries { entries }))
}
