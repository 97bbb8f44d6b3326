use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;

use crate::state::AppState;

pub mod dto;
pub mod error;
pub mod events_handler;
pub mod handler;
pub mod model;
pub mod progress;
pub mod repository;
pub mod service;
pub mod stream_handler;

pub fn router(state: &AppState) -> Router<AppState> {
    let upload_routes = Router::new()
        .route("/", post(handler::submit_transcode))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(
            state.transcoder.config().max_upload_bytes,
        ));

    let job_routes = Router::new()
        .route("/{id}", get(handler::get_job))
        .route("/{id}/progress", get(handler::get_progress))
        .route("/{id}/events", get(events_handler::progress_stream))
        .route("/{id}/download", get(handler::download))
        .route("/{id}/file", get(stream_handler::stream_derivative));

    upload_routes.merge(job_routes)
}
