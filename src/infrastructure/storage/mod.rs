use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;

pub mod multipart;
pub mod s3;

pub use s3::StorageService;

/// What to write under a key. Files are streamed from disk rather than read
/// into memory.
#[derive(Debug, Clone)]
pub enum BlobBody {
    Bytes(Bytes),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobAck {
    pub key: String,
    pub size: u64,
    pub e_tag: Option<String>,
}

/// Time-limited read access to a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalHandle {
    pub url: String,
    pub expires_in: Duration,
}

pub struct BlobObject {
    pub body: BoxStream<'static, io::Result<Bytes>>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub e_tag: Option<String>,
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `body` under `key`, overwriting whatever was there. Returns only
    /// once the store has acknowledged the write.
    async fn put(&self, key: &str, body: BlobBody, content_type: &str)
    -> Result<BlobAck, StorageError>;

    async fn retrieval_handle(&self, key: &str, ttl: Duration)
    -> Result<RetrievalHandle, StorageError>;

    /// Opens an object for streaming, optionally restricted to an HTTP
    /// `Range` header value.
    async fn open(&self, key: &str, range: Option<&str>) -> Result<BlobObject, StorageError>;

    /// Removes `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("presign failed: {0}")]
    PresignFailed(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// MIME type for an object, guessed from its key.
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key).first_or_octet_stream().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_known_extensions_then_content_type_is_guessed() {
        assert_eq!(content_type_for("transcoded/x/a_720p.mp4"), "video/mp4");
        assert_eq!(content_type_for("transcoded/x/a_720p.webm"), "video/webm");
        assert_eq!(content_type_for("uploads/x/blob"), "application/octet-stream");
    }
}
