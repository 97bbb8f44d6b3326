use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::model::{JobStatus, TranscodeJob};

const MAX_RESOLUTION: u32 = 4320;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TranscodeRequest {
    #[validate(length(min = 1, max = 10, message = "Format must be selected"))]
    pub format: String,
    #[validate(length(min = 1, max = 4, message = "Resolution must be selected"))]
    pub resolution: String,
}

impl TranscodeRequest {
    pub fn new(format: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            format: format.into().trim().to_string(),
            resolution: resolution.into().trim().to_string(),
        }
    }

    /// Runs the derive rules, then the charset rules the derive cannot express.
    /// Both values end up in encoder arguments and object keys.
    pub fn check(&self) -> Result<u32, String> {
        self.validate().map_err(|e| e.to_string())?;

        if !self.format.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("Unsupported format: {}", self.format));
        }

        match self.resolution.parse::<u32>() {
            Ok(height) if (1..=MAX_RESOLUTION).contains(&height) => Ok(height),
            _ => Err(format!("Unsupported resolution: {}", self.resolution)),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub original_filename: String,
    pub source_key: String,
}

impl From<TranscodeJob> for SubmitResponse {
    fn from(job: TranscodeJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            original_filename: job.original_filename,
            source_key: job.source_key,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub job: TranscodeJob,
    pub progress_percent: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProgressResponse {
    pub progress: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DownloadResponse {
    pub url: String,
    pub filename: String,
    pub expires_in_secs: u64,
}
