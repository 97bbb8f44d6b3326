use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use crate::config::env::{self, EnvKey};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024 * 1024;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_region: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub transcode: TranscodeConfig,
}

/// Knobs for the transcode pipeline. Separate from [`AppConfig`] so the
/// orchestrator can be built without any network settings.
#[derive(Clone, Debug, Deserialize)]
pub struct TranscodeConfig {
    pub ffmpeg_path: String,
    pub staging_dir: PathBuf,
    pub timeout_secs: u64,
    pub download_url_ttl_secs: u64,
    pub max_upload_bytes: usize,
    pub max_concurrent_encodes: usize,
}

impl TranscodeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn download_url_ttl(&self) -> Duration {
        Duration::from_secs(self.download_url_ttl_secs)
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            staging_dir: PathBuf::from("./uploads"),
            timeout_secs: 3600,
            download_url_ttl_secs: 3600,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_concurrent_encodes: 2,
        }
    }
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        let defaults = TranscodeConfig::default();

        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: env::get(EnvKey::DatabaseUrl)?,
            database_max_connections: env::get_parsed(EnvKey::DatabaseMaxConnections, 10),
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_bucket: env::get(EnvKey::MinioBucket)?,
            minio_region: env::get_or(EnvKey::MinioRegion, "us-east-1"),
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            transcode: TranscodeConfig {
                ffmpeg_path: env::get_or(EnvKey::FfmpegPath, &defaults.ffmpeg_path),
                staging_dir: PathBuf::from(env::get_or(EnvKey::StagingDir, "./uploads")),
                timeout_secs: env::get_parsed(EnvKey::TranscodeTimeoutSecs, defaults.timeout_secs),
                download_url_ttl_secs: env::get_parsed(
                    EnvKey::DownloadUrlTtlSecs,
                    defaults.download_url_ttl_secs,
                ),
                max_upload_bytes: env::get_parsed(EnvKey::MaxUploadBytes, defaults.max_upload_bytes),
                max_concurrent_encodes: env::get_parsed(
                    EnvKey::MaxConcurrentEncodes,
                    defaults.max_concurrent_encodes,
                )
                .max(1),
            },
        })
    }
}
