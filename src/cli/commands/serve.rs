//! HTTP API server.
//!
//! Front end for the job queue: start sessions, poll their status, cancel
//! them and fetch artifacts.

use crate::cli::Output;
use crate::config::Settings;
use crate::error::StudycastError;
use crate::jobs::JobQueue;
use crate::pipeline::SessionOrchestrator;
use crate::session::{SessionId, Stage};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared application state.
struct AppState {
    jobs: JobQueue,
}

/// Run the HTTP API server.
pub async fn run_serve(host: Option<&str>, port: Option<u16>, settings: Settings) -> anyhow::Result<()> {
    let orchestrator = Arc::new(SessionOrchestrator::new(&settings)?);
    let jobs = JobQueue::new(orchestrator, settings.pipeline.max_concurrent_sessions);

    let app = router(jobs);

    let addr = format!(
        "{}:{}",
        host.unwrap_or(&settings.server.host),
        port.unwrap_or(settings.server.port)
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "API listening");

    Output::header("Studycast API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Start session", "POST /sessions");
    Output::kv("Status", "GET  /sessions/{id}");
    Output::kv("Report", "GET  /sessions/{id}/report");
    Output::kv("Cancel", "POST /sessions/{id}/cancel");
    Output::kv("Resume", "POST /sessions/{id}/resume");
    Output::kv("Artifact", "GET  /sessions/{id}/artifacts/{stage}?topic=...");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

fn router(jobs: JobQueue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(start_session))
        .route("/sessions/{id}", get(session_status))
        .route("/sessions/{id}/report", get(session_report))
        .route("/sessions/{id}/cancel", post(cancel_session))
        .route("/sessions/{id}/resume", post(resume_session))
        .route("/sessions/{id}/artifacts/{stage}", get(artifact))
        .layer(cors)
        .with_state(Arc::new(AppState { jobs }))
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct StartRequest {
    /// Path of the recording on the server's filesystem.
    audio_path: String,
}

#[derive(Serialize)]
struct StartResponse {
    session_id: String,
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Deserialize)]
struct ArtifactQuery {
    topic: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// HTTP status for a library error.
fn status_for(error: &StudycastError) -> StatusCode {
    match error {
        StudycastError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        StudycastError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        StudycastError::Queue(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for StudycastError {
    fn into_response(self) -> Response {
        error_response(status_for(&self), self.to_string())
    }
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Response {
    let path = Settings::expand_path(&req.audio_path);
    if !path.is_file() {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Audio file not found: {}", req.audio_path),
        );
    }

    match state.jobs.start_session(&path.to_string_lossy()).await {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(StartResponse {
                session_id: id.to_string(),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StudycastError> {
    let id = SessionId::parse(&id)?;
    let session = state.jobs.session_status(&id).await?;
    Ok(Json(session).into_response())
}

async fn session_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StudycastError> {
    let id = SessionId::parse(&id)?;
    let report = state.jobs.report(&id).await?;
    Ok(Json(report).into_response())
}

async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StudycastError> {
    let id = SessionId::parse(&id)?;
    let cancelled = state.jobs.cancel_session(&id).await?;
    Ok(Json(CancelResponse { cancelled }).into_response())
}

async fn resume_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StudycastError> {
    let id = SessionId::parse(&id)?;
    state.jobs.resume_session(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            session_id: id.to_string(),
        }),
    )
        .into_response())
}

async fn artifact(
    State(state): State<Arc<AppState>>,
    Path((id, stage)): Path<(String, String)>,
    Query(query): Query<ArtifactQuery>,
) -> Result<Response, StudycastError> {
    let id = SessionId::parse(&id)?;
    let stage: Stage = stage.parse().map_err(StudycastError::InvalidInput)?;

    let bytes = state
        .jobs
        .orchestrator()
        .artifact(&id, stage, query.topic.as_deref())
        .await?;

    let Some(bytes) = bytes else {
        return Ok(error_response(StatusCode::NOT_FOUND, "Artifact not produced"));
    };

    let content_type = match stage {
        Stage::AudioSynthesis => "audio/mpeg",
        Stage::TopicExtraction => "application/json",
        _ => "text/plain; charset=utf-8",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
