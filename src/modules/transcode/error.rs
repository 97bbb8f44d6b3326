use axum::http::StatusCode;

use super::model::JobId;
use super::repository::RepositoryError;
use crate::infrastructure::staging::StagingError;
use crate::infrastructure::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("{0}")]
    Validation(String),
    #[error("staging failed: {0}")]
    Staging(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("timeout")]
    Timeout,
    #[error("publish failed: {0}")]
    Publish(StorageError),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} has no derivative yet")]
    NotReady(JobId),
    #[error("job store error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl TranscodeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TranscodeError::Validation(_) => StatusCode::BAD_REQUEST,
            TranscodeError::NotFound(_) => StatusCode::NOT_FOUND,
            TranscodeError::NotReady(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text recorded on a failed job. Encoder failures keep the engine's own
    /// reason so `status()` shows what ffmpeg said.
    pub fn failure_reason(&self) -> String {
        match self {
            TranscodeError::Encode(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl From<StagingError> for TranscodeError {
    fn from(e: StagingError) -> Self {
        TranscodeError::Staging(e.to_string())
    }
}
