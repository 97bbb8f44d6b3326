use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::handler::failure;
use crate::state::AppState;

/// Stream the finished derivative through the API
/// Honours `Range` so players can seek without a presigned link.
#[utoipa::path(
    get,
    path = "/api/v1/transcodes/{id}/file",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Derivative bytes"),
        (status = 206, description = "Partial Content"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Job has not completed"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Transcode"
)]
pub async fn stream_derivative(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let range = headers.get(header::RANGE).and_then(|h| h.to_str().ok());

    let (job, object) = match state.transcoder.open_derivative(id, range).await {
        Ok(found) => found,
        Err(e) => return failure(e),
    };

    let mut builder = Response::builder().header(
        header::CONTENT_TYPE,
        object.content_type.as_deref().unwrap_or("video/mp4"),
    );

    if let Some(len) = object.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    if let Some(cr) = &object.content_range {
        builder = builder
            .header(header::CONTENT_RANGE, cr)
            .status(StatusCode::PARTIAL_CONTENT);
    } else {
        builder = builder
            .header(header::ACCEPT_RANGES, "bytes")
            .status(StatusCode::OK);
    }

    if let Some(et) = &object.e_tag {
        builder = builder.header(header::ETAG, et);
    }

    if let Some(name) = &job.derivative_filename {
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", name.replace('"', "")),
        );
    }

    builder
        .body(Body::from_stream(object.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
