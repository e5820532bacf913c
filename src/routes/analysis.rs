use std::str::FromStr;

use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{EncodeRequest, EncodeResponse};
use crate::models::method_result::Method;
use crate::routes::error::{ApiError, ApiResult};
use crate::routes::upload::UploadForm;
use crate::services::engine::EncodeMethod;

const ENCODED_PREFIX: &str = "encoded";

/// POST /api/v1/analysis/analyze: run methods synchronously, no job record.
pub async fn analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Map<String, Value>>> {
    let form = UploadForm::read(multipart).await?;
    let (upload, _) = form.image()?;
    let methods = Method::parse_selection(form.field("methods").unwrap_or("all"))?;

    let engine = state.engine.clone();
    let data = upload.data.clone();
    let results = tokio::task::spawn_blocking(move || engine.analyze(&data, &methods))
        .await
        .map_err(|e| ApiError::Internal(format!("Analysis task aborted: {e}")))??;

    Ok(Json(results))
}

/// POST /api/v1/analysis/encode: embed a message and store the result.
pub async fn encode(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<EncodeResponse>> {
    let form = UploadForm::read(multipart).await?;
    let (upload, _) = form.image()?;

    let method = match form.field("method") {
        None => EncodeMethod::default(),
        Some(name) => EncodeMethod::from_str(name)
            .map_err(|_| ApiError::Validation(format!("Unsupported encoding method: {name}")))?,
    };
    let request = EncodeRequest {
        message: form.raw_field("message").unwrap_or_default().to_string(),
        method,
    };
    request.validate()?;

    let engine = state.engine.clone();
    let data = upload.data.clone();
    let EncodeRequest { message, method } = request;
    let encoded = tokio::task::spawn_blocking(move || engine.encode(&data, &message, method))
        .await
        .map_err(|e| ApiError::Internal(format!("Encoding task aborted: {e}")))??;

    let filename = format!("stego_{}.png", Uuid::new_v4().simple());
    state
        .images
        .put(&format!("{ENCODED_PREFIX}/{filename}"), &encoded, "image/png")
        .await?;

    tracing::info!(filename = %filename, method = %method, "Message encoded");
    Ok(Json(EncodeResponse {
        message: "Message encoded successfully".to_string(),
        filename,
    }))
}

/// GET /api/v1/analysis/images/{filename}: fetch an encoded image.
pub async fn get_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if filename.contains('/') {
        return Err(ApiError::NotFound(format!("Image {filename} not found")));
    }

    let bytes = state
        .images
        .get(&format!("{ENCODED_PREFIX}/{filename}"))
        .await?;

    let content_type = image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
