use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

pub type JobId = Uuid;

const SOURCE_PREFIX: &str = "uploads";
const DERIVATIVE_PREFIX: &str = "transcoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One upload-to-derivative request and its tracked lifecycle.
///
/// `derivative_key` and `derivative_filename` are only ever set together with
/// `status == Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TranscodeJob {
    pub id: Uuid,
    pub original_filename: String,
    pub derivative_filename: Option<String>,
    pub source_key: String,
    pub derivative_key: Option<String>,
    pub format: String,
    pub resolution: String,
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TranscodeJob {
    pub fn new(id: JobId, original_filename: String, format: String, resolution: String) -> Self {
        let now = OffsetDateTime::now_utc();
        let source_key = source_key(id, &original_filename);

        Self {
            id,
            original_filename,
            derivative_filename: None,
            source_key,
            derivative_key: None,
            format,
            resolution,
            status: JobStatus::Processing,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Reduce a client supplied filename to its last path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    match base {
        "" | "." | ".." => "video".to_string(),
        other => other.to_string(),
    }
}

/// `<stem>_<resolution>p.<format>`, where stem is the input name minus its
/// last extension (`my.video.mp4` keeps `my.video`).
pub fn derivative_filename(input: &str, resolution: &str, format: &str) -> String {
    let name = sanitize_filename(input);
    let stem = Path::new(&name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name);

    format!("{}_{}p.{}", stem, resolution, format)
}

pub fn source_key(id: JobId, original_filename: &str) -> String {
    format!("{}/{}/{}", SOURCE_PREFIX, id, sanitize_filename(original_filename))
}

pub fn derivative_key(id: JobId, derivative_filename: &str) -> String {
    format!("{}/{}/{}", DERIVATIVE_PREFIX, id, derivative_filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_multi_dot_name_when_deriving_then_only_last_extension_is_replaced() {
        assert_eq!(
            derivative_filename("my.video.mp4", "720", "webm"),
            "my.video_720p.webm"
        );
    }

    #[test]
    fn given_name_without_extension_when_deriving_then_suffix_is_appended() {
        assert_eq!(derivative_filename("clip", "480", "mp4"), "clip_480p.mp4");
    }

    #[test]
    fn given_client_path_when_sanitizing_then_only_basename_survives() {
        assert_eq!(sanitize_filename("C:\\Users\\me\\clip.mov"), "clip.mov");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("dir/"), "video");
    }

    #[test]
    fn given_job_id_then_source_and_derivative_keys_use_distinct_prefixes() {
        let id = Uuid::new_v4();
        let source = source_key(id, "a.mp4");
        let derivative = derivative_key(id, "a_720p.mp4");

        assert_eq!(source, format!("uploads/{}/a.mp4", id));
        assert_eq!(derivative, format!("transcoded/{}/a_720p.mp4", id));
    }

    #[test]
    fn given_new_job_then_it_is_processing_without_derivative() {
        let job = TranscodeJob::new(Uuid::new_v4(), "a.mp4".into(), "mp4".into(), "720".into());

        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.derivative_key.is_none());
        assert!(job.derivative_filename.is_none());
        assert!(job.source_key.ends_with("/a.mp4"));
    }

    #[test]
    fn given_status_strings_then_parse_round_trips_and_rejects_unknown() {
        assert_eq!("completed".parse::<JobStatus>(), Ok(JobStatus::Completed));
        assert!("READY".parse::<JobStatus>().is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
