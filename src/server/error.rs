use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::ClassifierError;

/// Failure of a request, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum AppError {
    /// No `file` field in the form.
    NoFile,
    /// A `file` field was sent without choosing a file.
    NoFileSelected,
    Multipart(MultipartError),
    Classifier(ClassifierError),
    Internal(String),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::NoFile => (StatusCode::BAD_REQUEST, "No file uploaded".to_string()),
            Self::NoFileSelected => (StatusCode::BAD_REQUEST, "No file selected".to_string()),
            Self::Multipart(err) => (err.status(), err.body_text()),
            Self::Classifier(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(%status, "{message}");
        } else {
            tracing::warn!(%status, "{message}");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        Self::Multipart(err)
    }
}

impl From<ClassifierError> for AppError {
    fn from(err: ClassifierError) -> Self {
        Self::Classifier(err)
    }
}
