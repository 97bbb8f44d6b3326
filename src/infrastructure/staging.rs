use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("upload stream interrupted: {0}")]
    Interrupted(String),
}

/// Local scratch directory shared by all jobs. Every file handed out has a
/// unique name, so concurrent jobs never touch each other's bytes.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<unix-millis>-<uuid><ext>`, keeping the extension of the original
    /// name so the encoder can probe the container.
    pub fn reserve(&self, original_filename: &str) -> StagedFile {
        let ext = Path::new(original_filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let name = format!("{}-{}{}", millis, Uuid::new_v4().simple(), ext);

        StagedFile::new(self.root.join(name))
    }

    /// Takes ownership of a file some other component wrote into the area.
    pub fn adopt(&self, path: PathBuf) -> StagedFile {
        StagedFile::new(path)
    }

    pub async fn write(
        &self,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<StagedFile, StagingError> {
        let staged = self.reserve(original_filename);
        tokio::fs::write(staged.path(), bytes).await?;
        Ok(staged)
    }

    /// Streams chunks to disk without buffering the whole upload. On any
    /// error the partial file is removed before returning.
    pub async fn write_stream<S, E>(
        &self,
        original_filename: &str,
        stream: S,
    ) -> Result<(StagedFile, u64), StagingError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let mut stream = std::pin::pin!(stream);
        let staged = self.reserve(original_filename);
        let mut file = tokio::fs::File::create(staged.path()).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StagingError::Interrupted(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok((staged, written))
    }
}

/// A staged file that is deleted when the guard is released or dropped.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn release(mut self) {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to remove staged file: {}", e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to remove staged file: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn area() -> (tempfile::TempDir, StagingArea) {
        let dir = tempfile::TempDir::new().unwrap();
        let area = StagingArea::new(dir.path().join("staging")).await.unwrap();
        (dir, area)
    }

    #[tokio::test]
    async fn given_same_filename_twice_then_reserved_paths_differ() {
        let (_dir, area) = area().await;
        let a = area.reserve("clip.mp4");
        let b = area.reserve("clip.mp4");

        assert_ne!(a.path(), b.path());
        assert_eq!(a.path().extension().unwrap(), "mp4");
    }

    #[tokio::test]
    async fn given_streamed_chunks_then_file_holds_all_bytes() {
        let (_dir, area) = area().await;
        let chunks = vec![
            Ok::<_, io::Error>(Bytes::from("hello ")),
            Ok(Bytes::from("world")),
        ];

        let (staged, written) = area
            .write_stream("a.mov", stream::iter(chunks))
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(tokio::fs::read(staged.path()).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn given_interrupted_stream_then_partial_file_is_removed() {
        let (_dir, area) = area().await;
        let chunks = vec![
            Ok(Bytes::from("partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ];

        let err = area
            .write_stream("a.mov", stream::iter(chunks))
            .await
            .unwrap_err();

        assert!(matches!(err, StagingError::Interrupted(_)));
        let mut entries = tokio::fs::read_dir(area.root()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn given_dropped_guard_then_file_is_deleted() {
        let (_dir, area) = area().await;
        let staged = area.write("a.mp4", b"bytes").await.unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn given_released_guard_then_file_is_deleted() {
        let (_dir, area) = area().await;
        let staged = area.write("a.mp4", b"bytes").await.unwrap();
        let path = staged.path().to_path_buf();

        staged.release().await;

        assert!(!path.exists());
    }
}
