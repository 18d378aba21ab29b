//! HTTP adapter
//!
//! Thin axum layer over [`CodeService`]. Clients are identified by a
//! `session_id` cookie; admin routes expect an `X-API-Key` header.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

use crate::error::Error;
use crate::operations::{FinishedSnapshot, OperationId, PollResult, RunningSnapshot};
use crate::sandbox::SandboxInfo;
use crate::service::{CodeRequest, CodeService, StartedOperation};

/// Shared router state
pub type AppState = Arc<CodeService>;

const SESSION_COOKIE: &str = "session_id";
const API_KEY_HEADER: &str = "x-api-key";

// ---- Error Handling ----

struct ApiError(Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidInput(_) | Error::Unsupported(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::Provision(_) | Error::ImageNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = Json(serde_json::json!({
            "success": false,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---- Cookies and headers ----

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn with_session_cookie(mut response: Response, session_id: &str, max_age: Duration) -> Response {
    let cookie = format!(
        "{}={}; HttpOnly; Max-Age={}; Path=/",
        SESSION_COOKIE,
        session_id,
        max_age.as_secs()
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

// ---- Request/Response Types ----

#[derive(Debug, Serialize)]
struct CompileResponse {
    success: bool,
    message: &'static str,
    output: String,
    output_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartedResponse {
    success: bool,
    message: &'static str,
    output: &'static str,
    started: bool,
    #[serde(flatten)]
    operation: StartedOperation,
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    execution_id: OperationId,
}

#[derive(Debug, Serialize)]
struct FinishedResponse {
    running: bool,
    completed: bool,
    #[serde(flatten)]
    snapshot: FinishedSnapshot,
}

#[derive(Debug, Serialize)]
struct RunningResponse {
    running: bool,
    completed: bool,
    #[serde(flatten)]
    snapshot: RunningSnapshot,
}

#[derive(Debug, Serialize)]
struct ContainerList {
    containers: Vec<SandboxInfo>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct CleanupParams {
    #[serde(default = "default_max_age_hours")]
    max_age_hours: u64,
}

fn default_max_age_hours() -> u64 {
    24
}

// ---- Handlers ----

async fn health(State(service): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "languages": service.languages(),
    }))
}

async fn compile(
    State(service): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CodeRequest>,
) -> ApiResult<Response> {
    let session = session_cookie(&headers);
    let (session_id, outcome) = service.compile(session.as_deref(), &request).await?;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    let body = CompileResponse {
        success: outcome.success,
        message: if outcome.success {
            "Compilation successful"
        } else {
            "Compilation failed"
        },
        output: outcome.output,
        output_path: outcome.artifact,
    };

    let max_age = service.config().server.session_cookie_max_age;
    Ok(with_session_cookie(
        (status, Json(body)).into_response(),
        &session_id,
        max_age,
    ))
}

async fn run(
    State(service): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CodeRequest>,
) -> ApiResult<Response> {
    let session = session_cookie(&headers);
    let started = service.start_run(session.as_deref(), &request).await?;
    Ok(started_response(&service, started, "Execution started in container"))
}

async fn verify(
    State(service): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CodeRequest>,
) -> ApiResult<Response> {
    let session = session_cookie(&headers);
    let started = service.start_verify(session.as_deref(), &request).await?;
    Ok(started_response(&service, started, "Verification started in container"))
}

fn started_response(service: &CodeService, started: StartedOperation, message: &'static str) -> Response {
    let session_id = started.session_id.clone();
    let body = StartedResponse {
        success: true,
        message,
        output: "",
        started: true,
        operation: started,
    };
    with_session_cookie(
        Json(body).into_response(),
        &session_id,
        service.config().server.session_cookie_max_age,
    )
}

async fn cancel(
    State(service): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Response> {
    let outcome = service.cancel(request.execution_id).await?;
    Ok(Json(outcome).into_response())
}

async fn status(State(service): State<AppState>, Path(id): Path<OperationId>) -> Response {
    match service.status(id) {
        PollResult::Finished(snapshot) => Json(FinishedResponse {
            running: false,
            completed: true,
            snapshot,
        })
        .into_response(),
        PollResult::Running(snapshot) => Json(RunningResponse {
            running: true,
            completed: false,
            snapshot,
        })
        .into_response(),
        PollResult::NotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "running": false,
                "message": "Execution not found or completed",
            })),
        )
            .into_response(),
    }
}

async fn session_info(State(service): State<AppState>, headers: HeaderMap) -> Response {
    let session = session_cookie(&headers);
    let info = match &session {
        Some(id) => service.session_info(id).await,
        None => None,
    };

    match info {
        Some(info) => Json(info).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "message": format!("No active session with id: {}", session.unwrap_or_default()),
            })),
        )
            .into_response(),
    }
}

async fn session_cleanup(State(service): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_cookie(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "message": "No session ID provided",
            })),
        )
            .into_response();
    };

    let success = service.cleanup_session(&session_id).await;
    let (status, message) = if success {
        (StatusCode::OK, "Session cleaned up successfully")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to clean up session")
    };
    (
        status,
        Json(serde_json::json!({ "success": success, "message": message })),
    )
        .into_response()
}

async fn admin_containers(
    State(service): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ContainerList>> {
    service.authorize_admin(api_key(&headers))?;
    let containers = service.admin_containers().await;
    Ok(Json(ContainerList {
        total: containers.len(),
        containers,
    }))
}

async fn admin_cleanup(
    State(service): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CleanupParams>,
) -> ApiResult<Response> {
    service.authorize_admin(api_key(&headers))?;
    debug!("Admin cleanup, max age {}h", params.max_age_hours);

    let max_age = params
        .max_age_hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            Error::InvalidInput(format!("max_age_hours out of range: {}", params.max_age_hours))
        })?;
    let report = service.admin_cleanup(max_age).await;
    Ok(Json(serde_json::json!({
        "success": true,
        "cleaned_containers": report.cleaned_containers,
        "cleaned_sessions": report.cleaned_sessions,
        "message": format!(
            "Cleaned up {} containers and {} sessions",
            report.cleaned_containers, report.cleaned_sessions
        ),
    }))
    .into_response())
}

// ---- Router ----

/// Build the HTTP router around a shared service
pub fn router(service: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/compile", post(compile))
        .route("/run", post(run))
        .route("/verify", post(verify))
        .route("/cancel", post(cancel))
        .route("/status/{id}", get(status))
        .route("/session/info", get(session_info))
        .route("/session/cleanup", post(session_cleanup))
        .route("/admin/containers", get(admin_containers))
        .route("/admin/cleanup", post(admin_cleanup))
        .with_state(service)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}
