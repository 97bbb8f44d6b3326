use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::settings::TranscodeConfig;
use crate::infrastructure::staging::{StagedFile, StagingArea};
use crate::infrastructure::storage::{BlobBody, BlobStore, content_type_for};
use crate::modules::transcode::error::TranscodeError;
use crate::modules::transcode::model::{TranscodeJob, derivative_filename, derivative_key};
use crate::modules::transcode::progress::{JobStage, ProgressHub, ProgressReporter};
use crate::modules::transcode::repository::JobRepository;
use crate::workers::encoder::{EncodeEvent, EncodeEvents, EncodeRequest, Encoder};

/// Everything a job task needs. Shared by all jobs; nothing in here is
/// job-specific mutable state.
pub struct TranscodeContext {
    pub jobs: Arc<dyn JobRepository>,
    pub blobs: Arc<dyn BlobStore>,
    pub encoder: Arc<dyn Encoder>,
    pub staging: StagingArea,
    pub progress: ProgressHub,
    pub encode_slots: Semaphore,
    pub config: TranscodeConfig,
}

struct Published {
    key: String,
    filename: String,
}

/// Starts the background task for an accepted job. A watchdog marks the job
/// failed if the task dies without reaching a terminal state.
pub fn spawn_job(
    ctx: Arc<TranscodeContext>,
    job: TranscodeJob,
    source: StagedFile,
    reporter: ProgressReporter,
    height: u32,
) -> JoinHandle<()> {
    let job_id = job.id;
    let span = info_span!(
        "transcode_job",
        job_id = %job_id,
        format = %job.format,
        resolution = %job.resolution,
    );

    let worker = tokio::spawn(process_job(ctx.clone(), job, source, reporter, height).instrument(span));

    tokio::spawn(async move {
        if let Err(e) = worker.await {
            error!(job_id = %job_id, "Transcode task aborted: {}", e);
            if let Err(e) = ctx.jobs.mark_failed(job_id, "transcode task aborted").await {
                error!(job_id = %job_id, "Failed to record aborted job: {}", e);
            }
            ctx.progress.remove(job_id);
        }
    })
}

async fn process_job(
    ctx: Arc<TranscodeContext>,
    job: TranscodeJob,
    source: StagedFile,
    reporter: ProgressReporter,
    height: u32,
) {
    info!(stage = %JobStage::Staged, "Job accepted");

    let outcome = encode_and_publish(&ctx, &job, &source, &reporter, height).await;

    let outcome = match outcome {
        Ok(published) => ctx
            .jobs
            .mark_completed(job.id, &published.key, &published.filename)
            .await
            .map(|_| published)
            .map_err(TranscodeError::from),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(published) => {
            info!(
                stage = %JobStage::Completed,
                derivative_key = %published.key,
                "✅ Job completed"
            );
            reporter.finish(JobStage::Completed);
        }
        Err(e) => {
            error!(stage = %JobStage::Failed, error = %e, "❌ Job failed");
            if let Err(record_err) = ctx.jobs.mark_failed(job.id, &e.failure_reason()).await {
                error!("Failed to record job failure: {}", record_err);
            }
            reporter.finish(JobStage::Failed);
        }
    }

    // The source goes only now: the derivative is durable or the job failed.
    source.release().await;
}

async fn encode_and_publish(
    ctx: &TranscodeContext,
    job: &TranscodeJob,
    source: &StagedFile,
    reporter: &ProgressReporter,
    height: u32,
) -> Result<Published, TranscodeError> {
    let request = EncodeRequest {
        input: source.path().to_path_buf(),
        output_dir: ctx.staging.root().to_path_buf(),
        format: job.format.clone(),
        resolution: height,
    };
    let expected = ctx.staging.adopt(request.output_path());

    let output = {
        let _permit = ctx
            .encode_slots
            .acquire()
            .await
            .map_err(|_| TranscodeError::Encode("encoder pool is shut down".to_string()))?;

        reporter.set_stage(JobStage::Encoding);
        info!(stage = %JobStage::Encoding, "Encoding");

        let events = ctx.encoder.run(request);
        match timeout(ctx.config.timeout(), consume_events(events, reporter)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs = ctx.config.timeout_secs, "Encode exceeded wall-clock cap");
                return Err(TranscodeError::Timeout);
            }
        }
    };

    let output = if output.as_path() == expected.path() {
        expected
    } else {
        ctx.staging.adopt(output)
    };

    reporter.set_stage(JobStage::Publishing);
    info!(stage = %JobStage::Publishing, "Publishing derivative");

    let filename = derivative_filename(&job.original_filename, &job.resolution, &job.format);
    let key = derivative_key(job.id, &filename);

    let ack = ctx
        .blobs
        .put(
            &key,
            BlobBody::File(output.path().to_path_buf()),
            &content_type_for(&filename),
        )
        .await
        .map_err(TranscodeError::Publish)?;

    info!(key = %ack.key, size = ack.size, "Derivative stored");
    output.release().await;

    Ok(Published { key, filename })
}

/// Applies encoder events in order until the terminal one.
async fn consume_events(
    mut events: EncodeEvents,
    reporter: &ProgressReporter,
) -> Result<PathBuf, TranscodeError> {
    while let Some(event) = events.next().await {
        match event {
            EncodeEvent::Started { command } => info!(%command, "Encoder started"),
            EncodeEvent::Progress { percent } => {
                reporter.report(percent);
            }
            EncodeEvent::Completed { output } => return Ok(output),
            EncodeEvent::Failed { reason } => return Err(TranscodeError::Encode(reason)),
        }
    }

    Err(TranscodeError::Encode(
        "encoder stopped without reporting a result".to_string(),
    ))
}
