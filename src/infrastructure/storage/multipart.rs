use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::io;
use tracing::{error, warn};

use super::StorageError;
use super::s3::StorageService;

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
pub const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

pub struct MultipartUploader<'a> {
    storage: &'a StorageService,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
    size: u64,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(
        storage: &'a StorageService,
        key: String,
        content_type: &str,
    ) -> Result<Self, StorageError> {
        let upload_id = storage.create_multipart_upload(&key, content_type).await?;

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
            size: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.size += chunk.len() as u64;
        self.buffer.extend_from_slice(&chunk);

        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(MIN_PART_SIZE),
        ));

        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;

        self.parts.push(part);
        self.part_number += 1;

        Ok(())
    }

    pub async fn finish(mut self) -> Result<(String, u64), StorageError> {
        if !self.buffer.is_empty() {
            self.flush_part().await?;
        }

        let e_tag = self
            .storage
            .complete_multipart_upload(&self.key, &self.upload_id, self.parts)
            .await?;

        Ok((e_tag, self.size))
    }

    pub async fn abort(&self) {
        if let Err(e) = self
            .storage
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await
        {
            warn!(key = %self.key, "Failed to abort multipart upload: {}", e);
        }
    }

    /// Drains `stream` into the upload, aborting it on the first error so no
    /// half-written object becomes visible under the key.
    pub async fn upload_stream<S>(mut self, mut stream: S) -> Result<(String, u64), StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    error!(key = %self.key, "Stream error: {}", e);
                    self.abort().await;
                    return Err(StorageError::Io(e));
                }
            };

            if let Err(e) = self.write_chunk(chunk).await {
                error!(key = %self.key, "Upload error: {}", e);
                self.abort().await;
                return Err(e);
            }
        }

        let key = self.key.clone();
        let upload_id = self.upload_id.clone();
        let storage = self.storage;

        match self.finish().await {
            Ok(done) => Ok(done),
            Err(e) => {
                if let Err(abort_err) = storage.abort_multipart_upload(&key, &upload_id).await {
                    warn!(key = %key, "Failed to abort multipart upload: {}", abort_err);
                }
                Err(e)
            }
        }
    }
}
