use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info};
use uuid::Uuid;

use crate::applications::registry::RunView;
use crate::errors::AppError;
use crate::knowledge::SessionDocuments;
use crate::models::session::derive_job_id;
use crate::models::SessionStatus;
use crate::orchestrator::{ApplicationRequest, RunControl};
use crate::pending::feed::merge_into_file;
use crate::pending::{session_dir, PendingError, ANSWERS_FILE, JSON_FILE};
use crate::state::AppState;

fn default_wait() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub job_url: String,
    #[serde(default)]
    pub answers: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub cover_letter: Option<String>,
    #[serde(default)]
    pub cv_path: Option<PathBuf>,
    #[serde(default = "default_wait")]
    pub wait_for_input: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateApplicationResponse {
    pub session_id: Uuid,
    pub job_id: String,
    pub status: SessionStatus,
}

fn validate_job_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AppError::Validation(format!("job_url is not an absolute URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "job_url must be http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(AppError::Validation("job_url has no host".to_string()));
    }
    Ok(url)
}

/// POST /api/v1/applications
pub async fn handle_create_application(
    State(state): State<AppState>,
    Json(req): Json<CreateApplicationRequest>,
) -> Result<(StatusCode, Json<CreateApplicationResponse>), AppError> {
    let url = validate_job_url(&req.job_url)?;
    if let Some(path) = &req.cv_path {
        if !path.is_file() {
            return Err(AppError::Validation(format!(
                "cv_path {} does not exist",
                path.display()
            )));
        }
    }

    let job_url = url.to_string();
    let job_id = derive_job_id(&job_url);
    let (control, status) = RunControl::new();
    let session_id = control.session_id;
    state
        .registry
        .register(session_id, &job_url, &job_id, status, control.cancel.clone());

    let request = ApplicationRequest {
        job_url,
        answers: req.answers,
        documents: SessionDocuments {
            cv_path: req.cv_path,
            cover_letter_text: req.cover_letter.filter(|t| !t.trim().is_empty()),
            cover_letter_path: None,
        },
        wait_for_input: req.wait_for_input,
    };
    let orchestrator = state.orchestrator.clone();
    let registry = state.registry.clone();
    tokio::spawn(async move {
        let result = orchestrator.run(request, control).await.map_err(|e| {
            error!("Application {session_id} ended without an artifact: {e}");
            e.to_string()
        });
        registry.finish(session_id, result);
    });
    info!("Accepted application {session_id} for {job_id}");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateApplicationResponse {
            session_id,
            job_id,
            status: SessionStatus::Discovering,
        }),
    ))
}

/// GET /api/v1/applications/:id
pub async fn handle_get_application(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunView>, AppError> {
    state
        .registry
        .view(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Application {id} not found")))
}

/// GET /api/v1/applications/:id/pending
pub async fn handle_get_pending(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let job_id = state
        .registry
        .job_id(id)
        .ok_or_else(|| AppError::NotFound(format!("Application {id} not found")))?;
    let path = session_dir(&state.orchestrator.config().pending.root, &job_id, id).join(JSON_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => {
            let doc = serde_json::from_str(&raw)
                .map_err(|e| AppError::Storage(format!("{}: {e}", path.display())))?;
            Ok(Json(doc))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Json(json!({
            "session_id": id,
            "job_id": job_id,
            "questions": [],
        }))),
        Err(e) => Err(AppError::Storage(format!("{}: {e}", path.display()))),
    }
}

/// POST /api/v1/applications/:id/answers
pub async fn handle_submit_answers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(answers): Json<BTreeMap<String, Value>>,
) -> Result<Json<Value>, AppError> {
    let view = state
        .registry
        .view(id)
        .ok_or_else(|| AppError::NotFound(format!("Application {id} not found")))?;
    if view.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Application {id} already ended as {}",
            view.status.as_str()
        )));
    }
    if answers.is_empty() {
        return Err(AppError::Validation("no answers supplied".to_string()));
    }

    let path = session_dir(&state.orchestrator.config().pending.root, &view.job_id, id).join(ANSWERS_FILE);
    let accepted = merge_into_file(&path, &answers).map_err(|e| match e {
        PendingError::Json { .. } => AppError::Conflict(format!("answers file is not editable: {e}")),
        PendingError::Io { .. } => AppError::Storage(e.to_string()),
    })?;
    info!("Merged {accepted} answers into {}", path.display());
    Ok(Json(json!({ "session_id": id, "accepted": accepted })))
}

/// POST /api/v1/applications/:id/cancel
pub async fn handle_cancel_application(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    match state.registry.cancel(id) {
        None => Err(AppError::NotFound(format!("Application {id} not found"))),
        Some(false) => Err(AppError::Conflict(format!("Application {id} already ended"))),
        Some(true) => {
            info!("Cancellation requested for application {id}");
            Ok(Json(json!({ "session_id": id, "cancelled": true })))
        }
    }
}
