use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dto::TranscodeRequest;
use super::error::TranscodeError;
use super::model::{JobId, JobStatus, TranscodeJob, sanitize_filename};
use super::progress::{JobStage, ProgressHub, ProgressSnapshot};
use super::repository::JobRepository;
use crate::config::settings::TranscodeConfig;
use crate::infrastructure::staging::{StagedFile, StagingArea};
use crate::infrastructure::storage::{
    BlobBody, BlobObject, BlobStore, RetrievalHandle, StorageError, content_type_for,
};
use crate::workers::encoder::Encoder;
use crate::workers::transcoder::{TranscodeContext, spawn_job};

/// What a progress subscriber gets: a live channel while the job runs, or
/// the settled value once it has finished.
pub enum ProgressFeed {
    Live(watch::Receiver<ProgressSnapshot>),
    Settled(ProgressSnapshot),
}

#[derive(Clone)]
pub struct TranscodeService {
    ctx: Arc<TranscodeContext>,
}

impl TranscodeService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        blobs: Arc<dyn BlobStore>,
        encoder: Arc<dyn Encoder>,
        staging: StagingArea,
        config: TranscodeConfig,
    ) -> Self {
        let slots = config.max_concurrent_encodes.max(1);

        Self {
            ctx: Arc::new(TranscodeContext {
                jobs,
                blobs,
                encoder,
                staging,
                progress: ProgressHub::new(),
                encode_slots: Semaphore::new(slots),
                config,
            }),
        }
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.ctx.config
    }

    pub fn staging(&self) -> &StagingArea {
        &self.ctx.staging
    }

    /// Accepts an already staged upload: validates, stores the source bytes,
    /// creates the job record and starts encoding in the background. Returns
    /// as soon as the record exists.
    pub async fn submit(
        &self,
        source: StagedFile,
        original_filename: &str,
        request: TranscodeRequest,
    ) -> Result<TranscodeJob, TranscodeError> {
        let height = request.check().map_err(TranscodeError::Validation)?;

        let job = TranscodeJob::new(
            Uuid::new_v4(),
            sanitize_filename(original_filename),
            request.format,
            height.to_string(),
        );
        info!(
            job_id = %job.id,
            stage = %JobStage::Received,
            filename = %job.original_filename,
            "Upload received"
        );

        let reporter = self.ctx.progress.register(job.id);

        if let Err(e) = self
            .ctx
            .blobs
            .put(
                &job.source_key,
                BlobBody::File(source.path().to_path_buf()),
                &content_type_for(&job.original_filename),
            )
            .await
        {
            reporter.finish(JobStage::Failed);
            return Err(TranscodeError::Staging(e.to_string()));
        }

        if let Err(e) = self.ctx.jobs.create(&job).await {
            reporter.finish(JobStage::Failed);
            self.discard_source(&job).await;
            return Err(e.into());
        }

        reporter.set_stage(JobStage::Staged);
        spawn_job(self.ctx.clone(), job.clone(), source, reporter, height);

        Ok(job)
    }

    /// Stages raw bytes and submits them. Validation runs first, so a bad
    /// request never touches the disk.
    pub async fn submit_bytes(
        &self,
        bytes: &[u8],
        original_filename: &str,
        format: &str,
        resolution: &str,
    ) -> Result<TranscodeJob, TranscodeError> {
        let request = TranscodeRequest::new(format, resolution);
        request.check().map_err(TranscodeError::Validation)?;

        let staged = self.ctx.staging.write(original_filename, bytes).await?;
        self.submit(staged, original_filename, request).await
    }

    pub async fn status(&self, id: JobId) -> Result<TranscodeJob, TranscodeError> {
        self.ctx
            .jobs
            .get_by_id(id)
            .await?
            .ok_or(TranscodeError::NotFound(id))
    }

    /// Last known percent; 100 once completed, 0 before the first report.
    ///
    /// The live entry is read first. It is removed only after the record is
    /// terminal, so a `processing` job always answers from its channel.
    pub async fn progress(&self, id: JobId) -> Result<f64, TranscodeError> {
        if let Some(snapshot) = self.ctx.progress.snapshot(id) {
            return Ok(snapshot.progress);
        }

        let job = self.status(id).await?;
        Ok(match job.status {
            JobStatus::Completed => 100.0,
            JobStatus::Failed | JobStatus::Processing => 0.0,
        })
    }

    pub async fn download_handle(
        &self,
        id: JobId,
    ) -> Result<(TranscodeJob, RetrievalHandle), TranscodeError> {
        let (job, key) = self.completed_derivative(id).await?;

        let handle = self
            .ctx
            .blobs
            .retrieval_handle(&key, self.ctx.config.download_url_ttl())
            .await
            .map_err(TranscodeError::Storage)?;

        Ok((job, handle))
    }

    pub async fn open_derivative(
        &self,
        id: JobId,
        range: Option<&str>,
    ) -> Result<(TranscodeJob, BlobObject), TranscodeError> {
        let (job, key) = self.completed_derivative(id).await?;

        let object = self.ctx.blobs.open(&key, range).await.map_err(|e| match e {
            StorageError::NotFound(_) => TranscodeError::NotFound(id),
            other => TranscodeError::Storage(other),
        })?;

        Ok((job, object))
    }

    pub async fn subscribe(&self, id: JobId) -> Result<ProgressFeed, TranscodeError> {
        if let Some(rx) = self.ctx.progress.subscribe(id) {
            return Ok(ProgressFeed::Live(rx));
        }

        // Entries are dropped only after the record turned terminal. A
        // `processing` record without one was left by an earlier process.
        let job = self.status(id).await?;
        let snapshot = match job.status {
            JobStatus::Completed => ProgressSnapshot::new(100.0, JobStage::Completed),
            JobStatus::Failed | JobStatus::Processing => {
                ProgressSnapshot::new(0.0, JobStage::Failed)
            }
        };
        Ok(ProgressFeed::Settled(snapshot))
    }

    /// Fails jobs left `processing` by a previous run of the process.
    pub async fn recover_interrupted(&self) -> Result<u64, TranscodeError> {
        let count = self
            .ctx
            .jobs
            .fail_interrupted("interrupted by service restart")
            .await?;
        if count > 0 {
            warn!(count, "Marked interrupted jobs as failed");
        }
        Ok(count)
    }

    async fn discard_source(&self, job: &TranscodeJob) {
        match self.ctx.blobs.delete(&job.source_key).await {
            Ok(()) => warn!(job_id = %job.id, key = %job.source_key, "Job record failed; source removed"),
            Err(e) => error!(
                job_id = %job.id,
                key = %job.source_key,
                "Job record failed; orphaned source left in storage: {}",
                e
            ),
        }
    }

    async fn completed_derivative(
        &self,
        id: JobId,
    ) -> Result<(TranscodeJob, String), TranscodeError> {
        let job = self.status(id).await?;

        match (&job.status, &job.derivative_key) {
            (JobStatus::Completed, Some(key)) => {
                let key = key.clone();
                Ok((job, key))
            }
            _ => Err(TranscodeError::NotReady(id)),
        }
    }
}
