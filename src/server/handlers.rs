use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Html,
    Json,
};
use burn::tensor::backend::Backend;
use serde::Serialize;
use serde_json::{json, Value};

use super::{error::AppError, AppState};
use crate::classifier::Prediction;

/// Upload page: drag-and-drop, preview and rendering of the `/predict` response.
pub const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Multipart field carrying the uploaded image.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub predictions: Vec<Prediction>,
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn predict<B: Backend>(
    State(state): State<AppState<B>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, AppError> {
    // Anything that is not a multipart form carries no file
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!("Not a multipart upload: {rejection}");
        AppError::NoFile
    })?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        // A part without a filename is a plain form value, not a file
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        // Browsers send an empty filename when the input has no file chosen
        if file_name.is_empty() {
            return Err(AppError::NoFileSelected);
        }

        upload = Some((file_name, field.bytes().await?));
        break;
    }
    let (file_name, bytes) = upload.ok_or(AppError::NoFile)?;

    tracing::info!(file_name = %file_name, size = bytes.len(), "Classifying upload");
    let predictions = state.classify(bytes).await?;

    Ok(Json(PredictResponse { predictions }))
}
