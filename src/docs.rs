use utoipa::OpenApi;

use crate::modules::transcode::dto::*;
use crate::modules::transcode::model::{JobStatus, TranscodeJob};
use crate::modules::transcode::progress::{JobStage, ProgressSnapshot};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::transcode::handler::submit_transcode,
        crate::modules::transcode::handler::get_job,
        crate::modules::transcode::handler::get_progress,
        crate::modules::transcode::handler::download,
        crate::modules::transcode::events_handler::progress_stream,
        crate::modules::transcode::stream_handler::stream_derivative,
    ),
    components(
        schemas(
            TranscodeRequest, SubmitResponse, JobStatusResponse, ProgressResponse,
            DownloadResponse, TranscodeJob, JobStatus, JobStage, ProgressSnapshot,
        )
    ),
    tags(
        (name = "Transcode", description = "Video transcode jobs")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_generated_document_then_job_id_is_a_uuid_string() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let id = &doc["components"]["schemas"]["TranscodeJob"]["properties"]["id"];

        assert_eq!(id["type"], "string");
        assert_eq!(id["format"], "uuid");
        assert!(doc["paths"]["/api/v1/transcodes/{id}/events"].is_object());
    }
}
