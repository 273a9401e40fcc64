//! # HTTP server
//!
//! The REST surface clients dial into (§4.15, §6), grounded in
//! `other_examples/` for `axum` route/handler conventions (the teacher's
//! own stack has no HTTP server to generalize from). Every handler below
//! only resolves path/query/body and hands the real work off to
//! [`ControlPlaneWorkerPool`], matching §4.15's "never blocking the I/O
//! threads" rule; axum already runs handlers on the shared `tokio`
//! runtime, so "handing off" here means the handler itself does no
//! blocking work, not a second dispatch.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::control_plane::resources::Resources;
use crate::control_plane::worker_pool::ControlPlaneWorkerPool;
use crate::error::PraasError;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ControlPlaneWorkerPool>,
}

pub fn router(pool: Arc<ControlPlaneWorkerPool>) -> Router {
    Router::new()
        .route("/create_app", post(create_app))
        .route("/delete_app", post(delete_app))
        .route("/create_process", post(create_process))
        .route("/stop_process", post(stop_process))
        .route("/swap_process", post(swap_process))
        .route("/delete_process", post(delete_process))
        .route("/list_processes", post(list_processes))
        .route("/invoke/:app/:fname", post(invoke))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pool })
}

/// `{ reason }`, the standard error envelope for every 4xx/5xx (§4.15).
#[derive(Serialize)]
struct ErrorBody {
    reason: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { reason: self.0.to_string() })).into_response()
    }
}

struct ApiError(PraasError);

impl From<PraasError> for ApiError {
    fn from(e: PraasError) -> Self {
        ApiError(e)
    }
}

#[derive(Deserialize)]
struct AppQuery {
    name: String,
}

#[derive(Deserialize)]
struct ProcessQuery {
    app: String,
    name: String,
}

#[derive(Deserialize)]
struct AppListQuery {
    app: String,
}

#[derive(Deserialize)]
struct CreateAppBody {
    cloud_resource_name: String,
}

async fn create_app(
    State(state): State<AppState>,
    Query(q): Query<AppQuery>,
    Json(body): Json<CreateAppBody>,
) -> Result<StatusCode, ApiError> {
    state.pool.create_application(&q.name, &body.cloud_resource_name)?;
    Ok(StatusCode::OK)
}

async fn delete_app(State(state): State<AppState>, Query(q): Query<AppQuery>) -> Result<StatusCode, ApiError> {
    state.pool.delete_application(&q.name)?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct CreateProcessResponse {
    ip: String,
    port: u16,
}

async fn create_process(
    State(state): State<AppState>,
    Query(q): Query<ProcessQuery>,
    Json(resources): Json<Resources>,
) -> Result<Json<CreateProcessResponse>, ApiError> {
    let instance = state.pool.create_process(&q.app, &q.name, resources).await?;
    Ok(Json(CreateProcessResponse {
        ip: instance.ip_address,
        port: instance.port,
    }))
}

async fn stop_process(State(state): State<AppState>, Query(q): Query<ProcessQuery>) -> Result<StatusCode, ApiError> {
    state.pool.stop_process(&q.app, &q.name)?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct SwapProcessResponse {
    swap_size: i32,
    swap_time_ms: f64,
}

async fn swap_process(
    State(state): State<AppState>,
    Query(q): Query<ProcessQuery>,
) -> Result<Json<SwapProcessResponse>, ApiError> {
    let (swap_size, swap_time_ms) = state.pool.swap_process(&q.app, &q.name).await?;
    Ok(Json(SwapProcessResponse { swap_size, swap_time_ms }))
}

async fn delete_process(State(state): State<AppState>, Query(q): Query<ProcessQuery>) -> Result<StatusCode, ApiError> {
    state.pool.delete_process(&q.app, &q.name)?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct ListProcessesResponse {
    active: Vec<String>,
    swapped: Vec<String>,
}

async fn list_processes(
    State(state): State<AppState>,
    Query(q): Query<AppListQuery>,
) -> Result<Json<ListProcessesResponse>, ApiError> {
    let (active, swapped) = state.pool.list_processes(&q.app)?;
    Ok(Json(ListProcessesResponse { active, swapped }))
}

#[derive(Serialize)]
struct InvocationResponse {
    function: String,
    return_code: i32,
    result: Vec<u8>,
}

async fn invoke(
    State(state): State<AppState>,
    Path((app, fname)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<Json<InvocationResponse>, ApiError> {
    let outcome = state.pool.handle_invocation(&app, &fname, body.to_vec()).await?;
    Ok(Json(InvocationResponse {
        function: outcome.function_name,
        return_code: outcome.return_code,
        result: outcome.result,
    }))
}
