use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use super::model::{JobId, JobStatus, TranscodeJob};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("job {id} is not processing; refusing transition to {to}")]
    InvalidTransition { id: JobId, to: JobStatus },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Durable job metadata. Implementations must refuse any status change on a
/// job that has already reached a terminal state.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &TranscodeJob) -> Result<(), RepositoryError>;

    async fn get_by_id(&self, id: JobId) -> Result<Option<TranscodeJob>, RepositoryError>;

    async fn mark_completed(
        &self,
        id: JobId,
        derivative_key: &str,
        derivative_filename: &str,
    ) -> Result<(), RepositoryError>;

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<(), RepositoryError>;

    /// Fails every job still `processing`. Called at boot: progress is
    /// process-scoped, so those jobs have no task driving them any more.
    async fn fail_interrupted(&self, reason: &str) -> Result<u64, RepositoryError>;
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    original_filename: String,
    derivative_filename: Option<String>,
    source_key: String,
    derivative_key: Option<String>,
    format: String,
    resolution: String,
    status: String,
    failure_reason: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<JobRow> for TranscodeJob {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(RepositoryError::Corrupt)?;

        Ok(TranscodeJob {
            id: row.id,
            original_filename: row.original_filename,
            derivative_filename: row.derivative_filename,
            source_key: row.source_key,
            derivative_key: row.derivative_key,
            format: row.format,
            resolution: row.resolution,
            status,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_failed(e: sqlx::Error) -> RepositoryError {
    RepositoryError::QueryFailed(e.to_string())
}

#[async_trait]
impl JobRepository for PgJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create(&self, job: &TranscodeJob) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO transcode_jobs
                (id, original_filename, source_key, format, resolution, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(&job.original_filename)
        .bind(&job.source_key)
        .bind(&job.format)
        .bind(&job.resolution)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get_by_id(&self, id: JobId) -> Result<Option<TranscodeJob>, RepositoryError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM transcode_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        row.map(TranscodeJob::try_from).transpose()
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn mark_completed(
        &self,
        id: JobId,
        derivative_key: &str,
        derivative_filename: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE transcode_jobs
            SET status = 'completed', derivative_key = $1, derivative_filename = $2, updated_at = NOW()
            WHERE id = $3 AND status = 'processing'
            "#,
        )
        .bind(derivative_key)
        .bind(derivative_filename)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::InvalidTransition {
                id,
                to: JobStatus::Completed,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, reason), fields(job_id = %id))]
    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE transcode_jobs
            SET status = 'failed', failure_reason = $1, updated_at = NOW()
            WHERE id = $2 AND status = 'processing'
            "#,
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::InvalidTransition {
                id,
                to: JobStatus::Failed,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, reason))]
    async fn fail_interrupted(&self, reason: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE transcode_jobs
            SET status = 'failed', failure_reason = $1, updated_at = NOW()
            WHERE status = 'processing'
            "#,
        )
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(result.rows_affected())
    }
}
