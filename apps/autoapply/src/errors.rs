use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// HTTP-facing error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Application run failures
// ────────────────────────────────────────────────────────────────────────────

/// Every way an application run can end without submitting.
/// The `code()` string is what lands in the not-applied artifact.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    #[error("No apply control or application form was detected at {url}")]
    NoApplyFlowFound { url: String },

    #[error("Navigation to {url} timed out after {timeout_secs}s")]
    NavigationTimeout { url: String, timeout_secs: u64 },

    #[error("Unsupported form technology: {detail}")]
    UnsupportedFormTechnology { detail: String },

    #[error("Could not write field '{field_id}': {detail}")]
    FieldWriteFailed { field_id: String, detail: String },

    #[error("Submit control not found: {detail}")]
    SubmitControlNotFound { detail: String },

    #[error("No clear outcome after submit: {detail}")]
    PostSubmitAmbiguous { detail: String },

    #[error("Cancelled while awaiting answers")]
    UserCancelled,

    #[error("No answers arrived within {waited_secs}s")]
    InputTimeout { waited_secs: u64 },

    #[error("Answers are required for {field_ids:?} and the run was started without waiting for input")]
    PendingInputRequired { field_ids: Vec<String> },

    #[error("Fields left with neither an answer nor a pending question: {field_ids:?}")]
    AnswerResolutionExhausted { field_ids: Vec<String> },

    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ApplyError {
    pub fn code(&self) -> &'static str {
        match self {
            ApplyError::NoApplyFlowFound { .. } => "no_apply_flow_found",
            ApplyError::NavigationTimeout { .. } => "navigation_timeout",
            ApplyError::UnsupportedFormTechnology { .. } => "unsupported_form_technology",
            ApplyError::FieldWriteFailed { .. } => "field_write_failed",
            ApplyError::SubmitControlNotFound { .. } => "submit_control_not_found",
            ApplyError::PostSubmitAmbiguous { .. } => "post_submit_ambiguous",
            ApplyError::UserCancelled => "user_cancelled",
            ApplyError::InputTimeout { .. } => "input_timeout",
            ApplyError::PendingInputRequired { .. } => "pending_input_required",
            ApplyError::AnswerResolutionExhausted { .. } => "answer_resolution_exhausted",
            ApplyError::Infrastructure(_) => "infrastructure",
        }
    }

    /// Only navigation timeouts are worth a second attempt. Everything after
    /// the first field write is never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplyError::NavigationTimeout { .. })
    }
}
