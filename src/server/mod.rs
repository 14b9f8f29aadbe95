//! Public API server for bundle downloads.
//!
//! Thin HTTP boundary over the orchestrator: start/cancel/inspect jobs
//! and stream progress events. The event stream is plain SSE carrying
//! the application-level event contract (snapshot first, terminal event
//! last); rendering is entirely the client's concern.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::core::error::AppError;
use crate::job::{BundleSpec, JobEvent, JobOutcome, JobState};
use crate::orchestrator::Orchestrator;

/// Shared state for the API server.
#[derive(Clone)]
struct ApiState {
    orchestrator: Arc<Orchestrator>,
}

/// Start the public API server.
pub async fn start_web_server(port: u16, orchestrator: Arc<Orchestrator>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = ApiState { orchestrator };

    let app = Router::new()
        .route("/api/bundles", post(start_handler))
        .route("/api/bundles/{id}", get(snapshot_handler).delete(cancel_handler))
        .route("/api/bundles/{id}/events", get(events_handler))
        .route("/api/bundles/{id}/archive", get(archive_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    log::info!("Starting API server on http://{}", addr);
    log::info!("  POST   /api/bundles              - Start a bundle job");
    log::info!("  GET    /api/bundles/:id          - Job snapshot");
    log::info!("  DELETE /api/bundles/:id          - Cancel a job");
    log::info!("  GET    /api/bundles/:id/events   - Progress event stream (SSE)");
    log::info!("  GET    /api/bundles/:id/archive  - Download a finished bundle");
    log::info!("  GET    /health                   - Health check");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Maps application errors onto API status codes.
fn error_response(err: AppError) -> Response {
    let status = match &err {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

/// POST /api/bundles — start a bundle job.
///
/// Returns 202 with the job id; the client subscribes to the event
/// stream with it. Packaging failures never surface here.
async fn start_handler(State(state): State<ApiState>, Json(spec): Json<BundleSpec>) -> Response {
    match state.orchestrator.start(spec).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(json!({"job_id": job_id}))).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/bundles/:id — current job snapshot.
async fn snapshot_handler(Path(id): Path<String>, State(state): State<ApiState>) -> Response {
    match state.orchestrator.get(&id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_response(e),
    }
}

/// DELETE /api/bundles/:id — cancel a job.
///
/// 409 when the job is already terminal, 404 when unknown.
async fn cancel_handler(Path(id): Path<String>, State(state): State<ApiState>) -> Response {
    match state.orchestrator.cancel(&id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/bundles/:id/events — SSE progress stream.
///
/// Delivers the current snapshot immediately, then live events; the
/// terminal event is the last one before the stream closes. Dropping the
/// connection unsubscribes the session implicitly (its queue closes).
async fn events_handler(Path(id): Path<String>, State(state): State<ApiState>) -> Response {
    let session = format!("sse-{}", uuid::Uuid::new_v4());
    match state.orchestrator.subscribe(&id, session).await {
        Ok(rx) => {
            let stream = event_stream(rx);
            Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Bridges a subscription receiver into SSE events.
fn event_stream(rx: tokio::sync::mpsc::Receiver<JobEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(event.name()).data(data))
    })
}

/// GET /api/bundles/:id/archive — download a finished bundle.
async fn archive_handler(Path(id): Path<String>, State(state): State<ApiState>) -> Response {
    let job = match state.orchestrator.get(&id).await {
        Ok(job) => job,
        Err(e) => return error_response(e),
    };

    if job.state != JobState::Completed {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": format!("job is {}, not completed", job.state)})),
        )
            .into_response();
    }
    let Some(JobOutcome::Bundle(handle)) = job.result else {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "completed job has no bundle"})))
            .into_response();
    };

    match tokio::fs::read(&handle.archive_path).await {
        Ok(bytes) => {
            let filename = std::path::Path::new(&handle.archive_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "bundle.zip".to_string());
            (
                [
                    (header::CONTENT_TYPE, "application/zip".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            log::error!("Archive for job {} unreadable: {}", id, e);
            (StatusCode::GONE, Json(json!({"error": "bundle archive no longer available"}))).into_response()
        }
    }
}

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
