use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use transcoder::config::settings::TranscodeConfig;
use transcoder::infrastructure::staging::StagingArea;
use transcoder::modules::transcode::error::TranscodeError;
use transcoder::modules::transcode::model::{JobId, JobStatus, TranscodeJob};
use transcoder::modules::transcode::repository::{JobRepository, RepositoryError};
use transcoder::modules::transcode::service::{ProgressFeed, TranscodeService};
use transcoder::testing::{
    HangingEncoder, InMemoryBlobStore, InMemoryJobRepository, ScriptedEncoder, Step,
};
use transcoder::workers::encoder::Encoder;

struct Harness {
    service: TranscodeService,
    jobs: Arc<InMemoryJobRepository>,
    blobs: Arc<InMemoryBlobStore>,
    staging: TempDir,
}

/// Record reads that return only after a delay, so the job can move on
/// between a caller's read and its use of the result.
struct SlowReads {
    inner: Arc<InMemoryJobRepository>,
    delay: Duration,
}

#[async_trait]
impl JobRepository for SlowReads {
    async fn create(&self, job: &TranscodeJob) -> Result<(), RepositoryError> {
        self.inner.create(job).await
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<TranscodeJob>, RepositoryError> {
        let job = self.inner.get_by_id(id).await;
        tokio::time::sleep(self.delay).await;
        job
    }

    async fn mark_completed(
        &self,
        id: JobId,
        derivative_key: &str,
        derivative_filename: &str,
    ) -> Result<(), RepositoryError> {
        self.inner
            .mark_completed(id, derivative_key, derivative_filename)
            .await
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<(), RepositoryError> {
        self.inner.mark_failed(id, reason).await
    }

    async fn fail_interrupted(&self, reason: &str) -> Result<u64, RepositoryError> {
        self.inner.fail_interrupted(reason).await
    }
}

async fn harness_with(encoder: Arc<dyn Encoder>, blobs: InMemoryBlobStore, timeout_secs: u64) -> Harness {
    harness_with_jobs(encoder, blobs, InMemoryJobRepository::new(), timeout_secs).await
}

async fn harness_with_jobs(
    encoder: Arc<dyn Encoder>,
    blobs: InMemoryBlobStore,
    jobs: InMemoryJobRepository,
    timeout_secs: u64,
) -> Harness {
    let staging = TempDir::new().unwrap();
    let jobs = Arc::new(jobs);
    let blobs = Arc::new(blobs);
    let config = TranscodeConfig {
        staging_dir: staging.path().to_path_buf(),
        timeout_secs,
        ..TranscodeConfig::default()
    };

    let service = TranscodeService::new(
        jobs.clone(),
        blobs.clone(),
        encoder,
        StagingArea::new(staging.path()).await.unwrap(),
        config,
    );

    Harness {
        service,
        jobs,
        blobs,
        staging,
    }
}

async fn harness(encoder: Arc<dyn Encoder>) -> Harness {
    harness_with(encoder, InMemoryBlobStore::new(), 30).await
}

async fn wait_terminal(service: &TranscodeService, id: Uuid) -> TranscodeJob {
    for _ in 0..250 {
        let job = service.status(id).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never reached a terminal state", id);
}

fn staged_files(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

#[tokio::test]
async fn given_successful_encode_when_submitted_then_job_completes_with_derivative() {
    let h = harness(Arc::new(ScriptedEncoder::succeeding())).await;

    let job = h
        .service
        .submit_bytes(b"source bytes", "clip.mov", "mp4", "720")
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.resolution, "720");

    let done = wait_terminal(&h.service, job.id).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.derivative_filename.as_deref(), Some("clip_720p.mp4"));
    let key = done.derivative_key.clone().unwrap();
    assert_eq!(key, format!("transcoded/{}/clip_720p.mp4", job.id));
    assert_eq!(h.blobs.get(&key).unwrap().as_ref(), b"encoded");
    assert_eq!(
        h.blobs.get(&job.source_key).unwrap().as_ref(),
        b"source bytes"
    );
    assert_eq!(h.service.progress(job.id).await.unwrap(), 100.0);
}

#[tokio::test]
async fn given_completed_job_when_download_requested_then_handle_points_at_derivative() {
    let h = harness(Arc::new(ScriptedEncoder::succeeding())).await;
    let job = h
        .service
        .submit_bytes(b"abc", "clip.mov", "mp4", "480")
        .await
        .unwrap();
    wait_terminal(&h.service, job.id).await;

    let (job, handle) = h.service.download_handle(job.id).await.unwrap();

    assert!(handle.url.contains(job.derivative_key.as_deref().unwrap()));
    assert_eq!(handle.expires_in, h.service.config().download_url_ttl());
}

#[tokio::test]
async fn given_name_with_several_dots_then_only_last_extension_is_replaced() {
    let h = harness(Arc::new(ScriptedEncoder::succeeding())).await;
    let job = h
        .service
        .submit_bytes(b"abc", "my.holiday.video.mov", "webm", "360")
        .await
        .unwrap();

    let done = wait_terminal(&h.service, job.id).await;

    assert_eq!(
        done.derivative_filename.as_deref(),
        Some("my.holiday.video_360p.webm")
    );
}

#[tokio::test]
async fn given_empty_format_when_submitted_then_nothing_is_created() {
    let h = harness(Arc::new(ScriptedEncoder::succeeding())).await;

    let err = h
        .service
        .submit_bytes(b"abc", "clip.mov", "", "720")
        .await
        .unwrap_err();

    assert!(matches!(err, TranscodeError::Validation(_)));
    assert!(h.jobs.is_empty());
    assert!(h.blobs.keys().is_empty());
    assert_eq!(staged_files(&h.staging), 0);
}

#[tokio::test]
async fn given_blank_resolution_when_submitted_then_validation_fails() {
    let h = harness(Arc::new(ScriptedEncoder::succeeding())).await;

    let err = h
        .service
        .submit_bytes(b"abc", "clip.mov", "mp4", "  ")
        .await
        .unwrap_err();

    assert!(matches!(err, TranscodeError::Validation(_)));
    assert!(h.jobs.is_empty());
}

#[tokio::test]
async fn given_encoder_failure_then_job_fails_without_derivative() {
    let h = harness(Arc::new(ScriptedEncoder::failing("Unknown encoder 'libx264'"))).await;
    let job = h
        .service
        .submit_bytes(b"abc", "clip.mov", "mp4", "720")
        .await
        .unwrap();

    let done = wait_terminal(&h.service, job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.derivative_key.is_none());
    assert_eq!(
        done.failure_reason.as_deref(),
        Some("Unknown encoder 'libx264'")
    );
    assert!(matches!(
        h.service.download_handle(job.id).await,
        Err(TranscodeError::NotReady(_))
    ));
    assert_eq!(h.blobs.keys(), vec![job.source_key.clone()]);
}

#[tokio::test]
async fn given_publish_failure_then_job_fails() {
    let h = harness_with(
        Arc::new(ScriptedEncoder::succeeding()),
        InMemoryBlobStore::failing_on("transcoded/"),
        30,
    )
    .await;
    let job = h
        .service
        .submit_bytes(b"abc", "clip.mov", "mp4", "720")
        .await
        .unwrap();

    let done = wait_terminal(&h.service, job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.derivative_key.is_none());
    assert!(done.failure_reason.unwrap().starts_with("publish failed"));
}

#[tokio::test]
async fn given_source_upload_failure_then_no_record_is_created() {
    let h = harness_with(
        Arc::new(ScriptedEncoder::succeeding()),
        InMemoryBlobStore::failing_on("uploads/"),
        30,
    )
    .await;

    let err = h
        .service
        .submit_bytes(b"abc", "clip.mov", "mp4", "720")
        .await
        .unwrap_err();

    assert!(matches!(err, TranscodeError::Staging(_)));
    assert!(h.jobs.is_empty());
    assert_eq!(staged_files(&h.staging), 0);
}

#[tokio::test]
async fn given_hanging_encoder_when_timeout_elapses_then_job_fails_and_encoder_is_stopped() {
    let encoder = HangingEncoder::new();
    let h = harness_with(Arc::new(encoder.clone()), InMemoryBlobStore::new(), 1).await;
    let job = h
        .service
        .submit_bytes(b"abc", "clip.mov", "mp4", "720")
        .await
        .unwrap();

    let done = wait_terminal(&h.service, job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.failure_reason.as_deref(), Some("timeout"));
    for _ in 0..50 {
        if encoder.was_cancelled() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(encoder.was_cancelled());
}

#[tokio::test]
async fn given_finished_jobs_then_staging_area_is_empty() {
    let h = harness(Arc::new(ScriptedEncoder::succeeding())).await;
    let ok = h
        .service
        .submit_bytes(b"abc", "a.mov", "mp4", "720")
        .await
        .unwrap();
    wait_terminal(&h.service, ok.id).await;

    let failing = harness(Arc::new(ScriptedEncoder::failing("boom"))).await;
    let bad = failing
        .service
        .submit_bytes(b"abc", "b.mov", "mp4", "720")
        .await
        .unwrap();
    wait_terminal(&failing.service, bad.id).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(staged_files(&h.staging), 0);
    assert_eq!(staged_files(&failing.staging), 0);
}

#[tokio::test]
async fn given_two_concurrent_jobs_then_each_keeps_its_own_progress_and_output() {
    let encoder = ScriptedEncoder::new(vec![
        Step::Progress(30.0),
        Step::Pause(Duration::from_millis(100)),
        Step::Progress(90.0),
        Step::Complete(b"out".to_vec()),
    ]);
    let h = harness(Arc::new(encoder)).await;

    let (a, b) = tokio::join!(
        h.service.submit_bytes(b"first", "same.mov", "mp4", "720"),
        h.service.submit_bytes(b"second", "same.mov", "mp4", "480"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.id, b.id);

    let (a, b) = (
        wait_terminal(&h.service, a.id).await,
        wait_terminal(&h.service, b.id).await,
    );

    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(b.status, JobStatus::Completed);
    assert_eq!(a.derivative_filename.as_deref(), Some("same_720p.mp4"));
    assert_eq!(b.derivative_filename.as_deref(), Some("same_480p.mp4"));
    assert_ne!(a.derivative_key, b.derivative_key);
    assert_eq!(h.blobs.get(&a.source_key).unwrap().as_ref(), b"first");
    assert_eq!(h.blobs.get(&b.source_key).unwrap().as_ref(), b"second");
}

#[tokio::test]
async fn given_live_subscription_then_observed_progress_never_decreases() {
    let encoder = ScriptedEncoder::new(vec![
        Step::Progress(10.0),
        Step::Pause(Duration::from_millis(30)),
        Step::Progress(55.0),
        Step::Progress(40.0),
        Step::Pause(Duration::from_millis(30)),
        Step::Progress(80.0),
        Step::Complete(b"out".to_vec()),
    ]);
    let h = harness(Arc::new(encoder)).await;
    let job = h
        .service
        .submit_bytes(b"abc", "clip.mov", "mp4", "720")
        .await
        .unwrap();

    let mut seen = Vec::new();
    match h.service.subscribe(job.id).await.unwrap() {
        ProgressFeed::Live(mut rx) => loop {
            let snapshot = *rx.borrow_and_update();
            seen.push(snapshot.progress);
            if snapshot.stage.is_terminal() || rx.changed().await.is_err() {
                seen.push(rx.borrow().progress);
                break;
            }
        },
        ProgressFeed::Settled(snapshot) => seen.push(snapshot.progress),
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    assert_eq!(seen.last().copied(), Some(100.0));
    wait_terminal(&h.service, job.id).await;
}

#[tokio::test]
async fn given_unknown_id_then_status_is_not_found() {
    let h = harness(Arc::new(ScriptedEncoder::succeeding())).await;

    assert!(matches!(
        h.service.status(Uuid::new_v4()).await,
        Err(TranscodeError::NotFound(_))
    ));
    assert!(matches!(
        h.service.progress(Uuid::new_v4()).await,
        Err(TranscodeError::NotFound(_))
    ));
}

#[tokio::test]
async fn given_processing_records_from_previous_run_then_recovery_fails_them() {
    let h = harness(Arc::new(ScriptedEncoder::succeeding())).await;
    let stale = TranscodeJob::new(
        Uuid::new_v4(),
        "old.mov".to_string(),
        "mp4".to_string(),
        "720".to_string(),
    );
    h.jobs.create(&stale).await.unwrap();

    assert_eq!(h.service.recover_interrupted().await.unwrap(), 1);

    let job = h.service.status(stale.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.failure_reason.is_some());
}

#[tokio::test]
async fn given_slow_record_reads_when_polling_progress_then_values_never_decrease() {
    let staging = TempDir::new().unwrap();
    let jobs = Arc::new(InMemoryJobRepository::new());
    let encoder = ScriptedEncoder::new(vec![
        Step::Progress(60.0),
        Step::Pause(Duration::from_millis(300)),
        Step::Complete(b"out".to_vec()),
    ]);
    let service = TranscodeService::new(
        Arc::new(SlowReads {
            inner: jobs.clone(),
            delay: Duration::from_millis(150),
        }),
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(encoder),
        StagingArea::new(staging.path()).await.unwrap(),
        TranscodeConfig {
            staging_dir: staging.path().to_path_buf(),
            ..TranscodeConfig::default()
        },
    );
    let job = service
        .submit_bytes(b"abc", "clip.mov", "mp4", "720")
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..60 {
        seen.push(service.progress(job.id).await.unwrap());
        if jobs.get_by_id(job.id).await.unwrap().unwrap().status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    seen.push(service.progress(job.id).await.unwrap());

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[tokio::test]
async fn given_record_creation_failure_then_stored_source_is_removed() {
    let h = harness_with_jobs(
        Arc::new(ScriptedEncoder::succeeding()),
        InMemoryBlobStore::new(),
        InMemoryJobRepository::refusing_creates(),
        30,
    )
    .await;

    let err = h
        .service
        .submit_bytes(b"abc", "clip.mov", "mp4", "720")
        .await
        .unwrap_err();

    assert!(matches!(err, TranscodeError::Repository(_)));
    assert!(h.blobs.keys().is_empty());
    assert_eq!(staged_files(&h.staging), 0);
}
