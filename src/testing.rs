//! In-memory collaborators for exercising the pipeline without Postgres,
//! S3 or an ffmpeg binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::infrastructure::storage::{
    BlobAck, BlobBody, BlobObject, BlobStore, RetrievalHandle, StorageError,
};
use crate::modules::transcode::model::{JobId, JobStatus, TranscodeJob};
use crate::modules::transcode::repository::{JobRepository, RepositoryError};
use crate::workers::encoder::{EncodeEvent, EncodeEvents, EncodeRequest, Encoder, events_from_channel};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<JobId, TranscodeJob>>,
    refuse_creates: bool,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` fails, as if the database were unreachable.
    pub fn refusing_creates() -> Self {
        Self {
            refuse_creates: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        apply: impl FnOnce(&mut TranscodeJob),
    ) -> Result<(), RepositoryError> {
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = to;
                job.updated_at = OffsetDateTime::now_utc();
                apply(job);
                Ok(())
            }
            _ => Err(RepositoryError::InvalidTransition { id, to }),
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &TranscodeJob) -> Result<(), RepositoryError> {
        if self.refuse_creates {
            return Err(RepositoryError::QueryFailed("connection refused".to_string()));
        }
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            return Err(RepositoryError::QueryFailed(format!("duplicate id {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<TranscodeJob>, RepositoryError> {
        Ok(lock(&self.jobs).get(&id).cloned())
    }

    async fn mark_completed(
        &self,
        id: JobId,
        derivative_key: &str,
        derivative_filename: &str,
    ) -> Result<(), RepositoryError> {
        self.transition(id, JobStatus::Completed, |job| {
            job.derivative_key = Some(derivative_key.to_string());
            job.derivative_filename = Some(derivative_filename.to_string());
        })
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<(), RepositoryError> {
        self.transition(id, JobStatus::Failed, |job| {
            job.failure_reason = Some(reason.to_string());
        })
    }

    async fn fail_interrupted(&self, reason: &str) -> Result<u64, RepositoryError> {
        let mut count = 0;
        for job in lock(&self.jobs).values_mut() {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Failed;
                job.failure_reason = Some(reason.to_string());
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Object store backed by a map. Writes under `failing_prefix` are refused.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    failing_prefix: Option<String>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(prefix: &str) -> Self {
        Self {
            failing_prefix: Some(prefix.to_string()),
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).map(|(bytes, _)| bytes.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        body: BlobBody,
        content_type: &str,
    ) -> Result<BlobAck, StorageError> {
        if let Some(prefix) = &self.failing_prefix {
            if key.starts_with(prefix.as_str()) {
                return Err(StorageError::UploadFailed(format!("refusing {}", key)));
            }
        }

        let bytes = match body {
            BlobBody::Bytes(bytes) => bytes,
            BlobBody::File(path) => Bytes::from(tokio::fs::read(&path).await?),
        };
        let size = bytes.len() as u64;
        lock(&self.objects).insert(key.to_string(), (bytes, content_type.to_string()));

        Ok(BlobAck {
            key: key.to_string(),
            size,
            e_tag: None,
        })
    }

    async fn retrieval_handle(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<RetrievalHandle, StorageError> {
        if !lock(&self.objects).contains_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(RetrievalHandle {
            url: format!("memory://{}?expires={}", key, ttl.as_secs()),
            expires_in: ttl,
        })
    }

    async fn open(&self, key: &str, _range: Option<&str>) -> Result<BlobObject, StorageError> {
        let (bytes, content_type) = lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        Ok(BlobObject {
            content_length: Some(bytes.len() as u64),
            content_type: Some(content_type),
            content_range: None,
            e_tag: None,
            body: stream::iter(vec![Ok(bytes)]).boxed(),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.objects).remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Progress(f64),
    Pause(Duration),
    Fail(String),
    /// Writes `<output_path>` with these bytes, then reports completion.
    Complete(Vec<u8>),
}

/// Encoder that plays back a fixed script instead of running ffmpeg.
#[derive(Debug, Clone)]
pub struct ScriptedEncoder {
    steps: Vec<Step>,
}

impl ScriptedEncoder {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn succeeding() -> Self {
        Self::new(vec![
            Step::Progress(25.0),
            Step::Progress(60.0),
            Step::Progress(100.0),
            Step::Complete(b"encoded".to_vec()),
        ])
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(vec![Step::Progress(10.0), Step::Fail(reason.to_string())])
    }
}

impl Encoder for ScriptedEncoder {
    fn run(&self, request: EncodeRequest) -> EncodeEvents {
        let (tx, rx) = mpsc::channel(16);
        let steps = self.steps.clone();

        tokio::spawn(async move {
            let _ = tx
                .send(EncodeEvent::Started {
                    command: format!("scripted {}", request.input.display()),
                })
                .await;

            for step in steps {
                let event = match step {
                    Step::Progress(percent) => EncodeEvent::Progress { percent },
                    Step::Pause(d) => {
                        tokio::time::sleep(d).await;
                        continue;
                    }
                    Step::Fail(reason) => EncodeEvent::Failed { reason },
                    Step::Complete(bytes) => {
                        let output: PathBuf = request.output_path();
                        if let Err(e) = tokio::fs::write(&output, bytes).await {
                            EncodeEvent::Failed { reason: e.to_string() }
                        } else {
                            EncodeEvent::Completed { output }
                        }
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        events_from_channel(rx)
    }
}

/// Encoder that never finishes. `was_cancelled` flips once the consumer
/// drops the event stream.
#[derive(Debug, Clone, Default)]
pub struct HangingEncoder {
    cancelled: Arc<AtomicBool>,
}

impl HangingEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Encoder for HangingEncoder {
    fn run(&self, _request: EncodeRequest) -> EncodeEvents {
        let (tx, rx) = mpsc::channel(4);
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            let _ = tx
                .send(EncodeEvent::Started {
                    command: "hang".to_string(),
                })
                .await;
            let _ = tx.send(EncodeEvent::Progress { percent: 5.0 }).await;
            tx.closed().await;
            cancelled.store(true, Ordering::SeqCst);
        });

        events_from_channel(rx)
    }
}
