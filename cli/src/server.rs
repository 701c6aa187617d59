//! HTTP job API over the orchestrator.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use slide_common::{AspectRatio, GenerationRequest, Language, Style};
use slide_core::{CancelAck, JobId, JobState, JobStatus, JobSummary, Orchestrator, SlideError};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Slide(#[from] SlideError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Slide(SlideError::InvalidRequest { .. }) => {
                (StatusCode::BAD_REQUEST, "InvalidRequest", self.to_string())
            }
            Self::Slide(SlideError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "JobNotFound", self.to_string())
            }
            Self::Slide(SlideError::NotReady { .. }) => {
                (StatusCode::CONFLICT, "NotReady", self.to_string())
            }
            Self::Slide(_) | Self::Internal(_) => {
                tracing::error!("internal error: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    default_aspect: AspectRatio,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, default_aspect: AspectRatio) -> Self {
        Self {
            orchestrator,
            default_aspect,
        }
    }
}

fn default_num_slides() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub text: String,
    #[serde(default = "default_num_slides")]
    pub num_slides: u32,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub style: Style,
    pub aspect_ratio: Option<AspectRatio>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: JobId,
    pub status: JobState,
}

async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    // Malformed bodies, unknown enum values and missing fields are client errors.
    let Json(body) = body.map_err(|e| SlideError::invalid_request(e.body_text()))?;
    let request = GenerationRequest::new(body.text, body.num_slides)
        .with_language(body.language)
        .with_style(body.style)
        .with_aspect_ratio(body.aspect_ratio.unwrap_or(state.default_aspect));
    let task_id = state.orchestrator.submit(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id,
            status: JobState::Queued,
        }),
    ))
}

async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.orchestrator.status(&JobId(id)).await?))
}

async fn download(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let id = JobId(id);
    let result = state.orchestrator.result(&id).await?;
    let artifact = result.artifact;
    tracing::info!(job_id = %id, size = artifact.len(), "artifact downloaded");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.content_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.file_name),
        )
        .body(Body::from(artifact.bytes))
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

async fn tasks(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.orchestrator.list().await)
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = JobId(id);
    let body = match state.orchestrator.cancel(&id).await? {
        CancelAck::Cancelled => {
            json!({ "task_id": id, "cancelled": true, "status": JobState::Failed })
        }
        CancelAck::AlreadyFinished(status) => {
            json!({ "task_id": id, "cancelled": false, "status": status })
        }
    };
    Ok(Json(body))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "active_jobs": state.orchestrator.active(),
        "retained_jobs": state.orchestrator.store().len(),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/status/:id", get(status))
        .route("/api/download/:id", get(download))
        .route("/api/tasks", get(tasks))
        .route("/api/cancel/:id", post(cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    default_aspect: AspectRatio,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let app = router(AppState::new(orchestrator, default_aspect));
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");
    println!("Serving on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
