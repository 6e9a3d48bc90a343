//! HTTP handlers for the upload page and the upload endpoint.
//! File bodies are streamed straight from the multipart field into the
//! backend; nothing is buffered to disk or memory here.

use crate::{errors::AppError, models::upload::UploadRequest, routes::AppState};
use axum::{
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Form field carrying the file.
pub const FILE_FIELD: &str = "file";

const INDEX_HTML: &str = include_str!("../../templates/index.html");

/// Any non-POST request to `/`: the drag-and-drop upload page. Never cached.
pub async fn upload_form() -> Response {
    let mut response = INDEX_HTML.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=0"),
    );
    response
}

/// Every path other than `/` gets a 302 back to the page.
pub async fn redirect_to_root() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response()
}

/// `POST /`: store the `file` part and answer with its public URL.
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<String, AppError> {
    let mut multipart = multipart.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        // Only a part that carries a filename counts as the uploaded file.
        // Browsers send `filename=""` when the form is submitted empty.
        if field.name() != Some(FILE_FIELD) || field.file_name().is_none_or(str::is_empty) {
            continue;
        }

        let request = UploadRequest {
            original_filename: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
        };

        let uploaded = state
            .uploads
            .upload(&request, field)
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;
        return Ok(uploaded.url);
    }

    Err(AppError::bad_request(format!(
        "no file in form field `{}`",
        FILE_FIELD
    )))
}
