use std::path::Path;
use std::time::Duration;

use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ChecksumAlgorithm;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::multipart::{MIN_PART_SIZE, MultipartUploader};
use super::{BlobAck, BlobBody, BlobObject, BlobStore, RetrievalHandle, StorageError};

const READ_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub async fn new(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Connected to S3 (MinIO)");

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: &str,
    ) -> Result<BlobAck, StorageError> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(size as i64)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(DisplayErrorContext(e).to_string()))?;

        Ok(BlobAck {
            key: key.to_string(),
            size,
            e_tag: result.e_tag,
        })
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<BlobAck, StorageError> {
        let size = tokio::fs::metadata(path).await?.len();

        if size < MIN_PART_SIZE as u64 {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
            return self.put_object(key, body, size, content_type).await;
        }

        debug!(key, size, "Using multipart upload");
        let file = tokio::fs::File::open(path).await?;
        let uploader = MultipartUploader::new(self, key.to_string(), content_type).await?;
        let (e_tag, size) = uploader
            .upload_stream(ReaderStream::with_capacity(file, READ_CHUNK_SIZE))
            .await?;

        Ok(BlobAck {
            key: key.to_string(),
            size,
            e_tag: Some(e_tag),
        })
    }

    pub async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(DisplayErrorContext(e).to_string()))?;

        result
            .upload_id
            .ok_or_else(|| StorageError::UploadFailed(format!("no upload id returned for {}", key)))
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: bytes::Bytes,
    ) -> Result<aws_sdk_s3::types::CompletedPart, StorageError> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StorageError::UploadFailed(format!(
                    "part {}: {}",
                    part_number,
                    DisplayErrorContext(e)
                ))
            })?;

        Ok(aws_sdk_s3::types::CompletedPart::builder()
            .set_e_tag(result.e_tag)
            .set_checksum_sha256(result.checksum_sha256)
            .part_number(part_number)
            .build())
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<aws_sdk_s3::types::CompletedPart>,
    ) -> Result<String, StorageError> {
        let completed_multipart_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(DisplayErrorContext(e).to_string()))?;

        Ok(result.e_tag.unwrap_or_default())
    }

    pub async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(DisplayErrorContext(e).to_string()))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for StorageService {
    async fn put(
        &self,
        key: &str,
        body: BlobBody,
        content_type: &str,
    ) -> Result<BlobAck, StorageError> {
        match body {
            BlobBody::Bytes(bytes) => {
                let size = bytes.len() as u64;
                self.put_object(key, ByteStream::from(bytes), size, content_type)
                    .await
            }
            BlobBody::File(path) => self.put_file(key, &path, content_type).await,
        }
    }

    async fn retrieval_handle(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<RetrievalHandle, StorageError> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;
        let filename = key.rsplit('/').next().unwrap_or(key);

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .response_content_disposition(format!("attachment; filename=\"{}\"", filename))
            .presigned(config)
            .await
            .map_err(|e| StorageError::PresignFailed(DisplayErrorContext(e).to_string()))?;

        Ok(RetrievalHandle {
            url: request.uri().to_string(),
            expires_in: ttl,
        })
    }

    async fn open(&self, key: &str, range: Option<&str>) -> Result<BlobObject, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range.map(str::to_string))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::DownloadFailed(DisplayErrorContext(e).to_string())
                }
            })?;

        let content_type = resp.content_type().map(str::to_string);
        let content_length = resp.content_length().and_then(|l| u64::try_from(l).ok());
        let content_range = resp.content_range().map(str::to_string);
        let e_tag = resp.e_tag().map(str::to_string);

        let reader = resp.body.into_async_read();

        Ok(BlobObject {
            body: ReaderStream::new(reader).boxed(),
            content_type,
            content_length,
            content_range,
            e_tag,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(DisplayErrorContext(e).to_string()))?;

        debug!(key, "Object deleted");
        Ok(())
    }
}
