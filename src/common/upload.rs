use axum::extract::multipart::Field;
use tracing::{error, info};

use crate::infrastructure::staging::{StagedFile, StagingArea};
use crate::modules::transcode::error::TranscodeError;

pub struct StagedUpload {
    pub file: StagedFile,
    pub original_filename: String,
    pub size: u64,
}

/// Streams a multipart file field into the staging area chunk by chunk.
pub async fn stream_to_staging(
    staging: &StagingArea,
    field: Field<'_>,
) -> Result<StagedUpload, TranscodeError> {
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    // Browsers send octet-stream for containers they do not recognise (mkv, ts).
    if !content_type.starts_with("video/") && content_type != "application/octet-stream" {
        return Err(TranscodeError::Validation(format!(
            "Invalid content type: {} (only video/* allowed)",
            content_type
        )));
    }

    let original_filename = field.file_name().unwrap_or("video.mp4").to_string();

    let (file, size) = staging
        .write_stream(&original_filename, field)
        .await
        .map_err(|e| {
            error!("Upload stream error: {}", e);
            TranscodeError::from(e)
        })?;

    info!(filename = %original_filename, size, "Upload staged");

    Ok(StagedUpload {
        file,
        original_filename,
        size,
    })
}
