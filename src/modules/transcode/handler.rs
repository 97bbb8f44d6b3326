use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;
use uuid::Uuid;

use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::common::upload::{StagedUpload, stream_to_staging};
use crate::modules::transcode::dto::*;
use crate::modules::transcode::error::TranscodeError;
use crate::state::AppState;

pub(crate) fn failure(e: TranscodeError) -> Response {
    ApiError::from(e).into_response()
}

/// Submit a video for transcoding
///
/// Multipart form with a `video` file plus `format` and `resolution` text
/// fields. Responds once the job record exists; encoding runs in the
/// background.
#[utoipa::path(
    post,
    path = "/api/v1/transcodes",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Job accepted", body = ApiResponse<SubmitResponse>),
        (status = 400, description = "Bad Request"),
        (status = 413, description = "Upload too large"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Transcode"
)]
pub async fn submit_transcode(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut upload: Option<StagedUpload> = None;
    let mut format = String::new();
    let mut resolution = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return ApiError(e.body_text(), e.status()).into_response(),
        };

        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "video" => match stream_to_staging(state.transcoder.staging(), field).await {
                Ok(staged) => upload = Some(staged),
                Err(e) => return failure(e),
            },
            "format" => match field.text().await {
                Ok(text) => format = text,
                Err(e) => return ApiError(e.body_text(), e.status()).into_response(),
            },
            "resolution" => match field.text().await {
                Ok(text) => resolution = text,
                Err(e) => return ApiError(e.body_text(), e.status()).into_response(),
            },
            _ => {}
        }
    }

    let Some(upload) = upload else {
        return ApiError("No file uploaded.".to_string(), StatusCode::BAD_REQUEST).into_response();
    };

    info!(
        filename = %upload.original_filename,
        size = upload.size,
        %format,
        %resolution,
        "Transcode requested"
    );

    let request = TranscodeRequest::new(format, resolution);
    match state
        .transcoder
        .submit(upload.file, &upload.original_filename, request)
        .await
    {
        Ok(job) => {
            ApiSuccess::accepted(SubmitResponse::from(job), "Transcode job accepted").into_response()
        }
        Err(e) => failure(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/transcodes/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job status", body = ApiResponse<JobStatusResponse>),
        (status = 404, description = "Job Not Found"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Transcode"
)]
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    let job = match state.transcoder.status(id).await {
        Ok(job) => job,
        Err(e) => return failure(e),
    };
    let progress_percent = match state.transcoder.progress(id).await {
        Ok(p) => p,
        Err(e) => return failure(e),
    };

    ApiSuccess::ok(
        JobStatusResponse { job, progress_percent },
        "Job retrieved successfully",
    )
    .into_response()
}

#[utoipa::path(
    get,
    path = "/api/v1/transcodes/{id}/progress",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Last known progress", body = ApiResponse<ProgressResponse>),
        (status = 404, description = "Job Not Found")
    ),
    tag = "Transcode"
)]
pub async fn get_progress(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.transcoder.progress(id).await {
        Ok(progress) => {
            ApiSuccess::ok(ProgressResponse { progress }, "Progress retrieved successfully")
                .into_response()
        }
        Err(e) => failure(e),
    }
}

/// Time-limited download link for a finished derivative
#[utoipa::path(
    get,
    path = "/api/v1/transcodes/{id}/download",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Download link", body = ApiResponse<DownloadResponse>),
        (status = 404, description = "Job Not Found"),
        (status = 409, description = "Job has not completed"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Transcode"
)]
pub async fn download(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.transcoder.download_handle(id).await {
        Ok((job, handle)) => {
            let response = DownloadResponse {
                url: handle.url,
                filename: job.derivative_filename.unwrap_or_default(),
                expires_in_secs: handle.expires_in.as_secs(),
            };
            ApiSuccess::ok(response, "Download link created").into_response()
        }
        Err(e) => failure(e),
    }
}
