//! Job queue repository implementations.
//!
//! Both queues share the same claiming discipline: `FOR UPDATE SKIP LOCKED`
//! makes concurrent batch claims safe regardless of the advisory lock, and a
//! claim spends one attempt up front so a worker crash mid-job still counts
//! against the retry budget.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::trace;
use uuid::Uuid;

use stamm_core::defaults::JOB_MAX_ATTEMPTS;
use stamm_core::{
    new_v7, AiJob, AiJobPayload, AiJobRepository, Error, JobStatus, QueueStats, Result, TaggingJob,
    TaggingJobPayload, TaggingJobRepository,
};

/// PostgreSQL implementation of [`AiJobRepository`].
pub struct PgAiJobRepository {
    pool: Pool<Postgres>,
    max_attempts: i32,
}

impl PgAiJobRepository {
    /// Create a repository with the default retry budget.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            max_attempts: JOB_MAX_ATTEMPTS,
        }
    }

    /// Override the retry budget for newly enqueued jobs.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Parse a job row into an AiJob struct.
    fn parse_job_row(row: PgRow) -> Result<AiJob> {
        let payload: serde_json::Value = row.get("payload");
        let payload: AiJobPayload = serde_json::from_value(payload)?;
        let status: String = row.get("status");
        Ok(AiJob {
            id: row.get("id"),
            status: JobStatus::from_str_loose(&status),
            source_message_id: row.get("source_message_id"),
            target_key: row.get("target_key"),
            payload,
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl AiJobRepository for PgAiJobRepository {
    async fn enqueue_deduplicated(
        &self,
        source_message_id: Uuid,
        target_key: &str,
        payload: &AiJobPayload,
    ) -> Result<Option<Uuid>> {
        let job_id = new_v7();
        let now = Utc::now();
        let payload_json = serde_json::to_value(payload)?;

        // Atomic check-and-insert using INSERT ... WHERE NOT EXISTS to prevent
        // TOCTOU races when concurrent requests enqueue the same mention.
        // FAILED rows do not block re-enqueueing.
        let result = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO ai_response_jobs
                 (id, status, source_message_id, target_key, payload, attempts, max_attempts, created_at)
             SELECT $1, 'pending', $2, $3, $4, 0, $5, $6
             WHERE NOT EXISTS (
                 SELECT 1 FROM ai_response_jobs
                 WHERE source_message_id = $2 AND target_key = $3
                   AND status <> 'failed'
             )
             RETURNING id",
        )
        .bind(job_id)
        .bind(source_message_id)
        .bind(target_key)
        .bind(&payload_json)
        .bind(self.max_attempts)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result)
    }

    async fn claim_batch(&self, max_jobs: i64) -> Result<Vec<AiJob>> {
        // FOR UPDATE SKIP LOCKED keeps racing workers from claiming the same
        // rows. Attempts increment on claim, not on failure.
        let rows = sqlx::query(
            "UPDATE ai_response_jobs
             SET status = 'processing', attempts = attempts + 1
             WHERE id IN (
                 SELECT id FROM ai_response_jobs
                 WHERE status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, status, source_message_id, target_key, payload,
                       attempts, max_attempts, last_error, created_at",
        )
        .bind(max_jobs)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut jobs = rows
            .into_iter()
            .map(Self::parse_job_row)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING order is unspecified; restore oldest-first.
        jobs.sort_by_key(|j| j.created_at);

        trace!(
            subsystem = "db",
            component = "ai_jobs",
            op = "claim_batch",
            claimed = jobs.len(),
            "Claimed AI response jobs"
        );
        Ok(jobs)
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE ai_response_jobs
             SET status = 'completed', completed_at = $1
             WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn release_for_retry(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ai_response_jobs
             SET status = 'pending', last_error = $1
             WHERE id = $2",
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ai_response_jobs
             SET status = 'failed', completed_at = $1, last_error = $2
             WHERE id = $3",
        )
        .bind(Utc::now())
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn active_count_for_target(&self, target_key: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ai_response_jobs
             WHERE target_key = $1 AND status IN ('pending', 'processing')",
        )
        .bind(target_key)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'processing') as processing,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) as total
             FROM ai_response_jobs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending"),
            processing: row.get::<i64, _>("processing"),
            completed: row.get::<i64, _>("completed"),
            failed: row.get::<i64, _>("failed"),
            total: row.get::<i64, _>("total"),
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<AiJob>> {
        let row = sqlx::query(
            "SELECT id, status, source_message_id, target_key, payload,
                    attempts, max_attempts, last_error, created_at
             FROM ai_response_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<AiJob>> {
        let rows = sqlx::query(
            "SELECT id, status, source_message_id, target_key, payload,
                    attempts, max_attempts, last_error, created_at
             FROM ai_response_jobs
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}

/// PostgreSQL implementation of [`TaggingJobRepository`].
pub struct PgTaggingJobRepository {
    pool: Pool<Postgres>,
    max_attempts: i32,
}

impl PgTaggingJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            max_attempts: JOB_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn parse_job_row(row: PgRow) -> Result<TaggingJob> {
        let payload: serde_json::Value = row.get("payload");
        let payload: TaggingJobPayload = serde_json::from_value(payload)?;
        let status: String = row.get("status");
        Ok(TaggingJob {
            id: row.get("id"),
            status: JobStatus::from_str_loose(&status),
            source_message_id: row.get("source_message_id"),
            payload,
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TaggingJobRepository for PgTaggingJobRepository {
    async fn enqueue_deduplicated(
        &self,
        source_message_id: Uuid,
        payload: &TaggingJobPayload,
    ) -> Result<Option<Uuid>> {
        let job_id = new_v7();
        let now = Utc::now();
        let payload_json = serde_json::to_value(payload)?;

        let result = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO tagging_jobs
                 (id, status, source_message_id, payload, attempts, max_attempts, created_at)
             SELECT $1, 'pending', $2, $3, 0, $4, $5
             WHERE NOT EXISTS (
                 SELECT 1 FROM tagging_jobs
                 WHERE source_message_id = $2 AND status <> 'failed'
             )
             RETURNING id",
        )
        .bind(job_id)
        .bind(source_message_id)
        .bind(&payload_json)
        .bind(self.max_attempts)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result)
    }

    async fn claim_batch(&self, max_jobs: i64) -> Result<Vec<TaggingJob>> {
        let rows = sqlx::query(
            "UPDATE tagging_jobs
             SET status = 'processing', attempts = attempts + 1
             WHERE id IN (
                 SELECT id FROM tagging_jobs
                 WHERE status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, status, source_message_id, payload,
                       attempts, max_attempts, last_error, created_at",
        )
        .bind(max_jobs)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut jobs = rows
            .into_iter()
            .map(Self::parse_job_row)
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by_key(|j| j.created_at);

        trace!(
            subsystem = "db",
            component = "tagging_jobs",
            op = "claim_batch",
            claimed = jobs.len(),
            "Claimed tagging jobs"
        );
        Ok(jobs)
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE tagging_jobs
             SET status = 'completed', completed_at = $1
             WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn release_for_retry(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tagging_jobs
             SET status = 'pending', last_error = $1
             WHERE id = $2",
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tagging_jobs
             SET status = 'failed', completed_at = $1, last_error = $2
             WHERE id = $3",
        )
        .bind(Utc::now())
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'processing') as processing,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) as total
             FROM tagging_jobs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending"),
            processing: row.get::<i64, _>("processing"),
            completed: row.get::<i64, _>("completed"),
            failed: row.get::<i64, _>("failed"),
            total: row.get::<i64, _>("total"),
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<TaggingJob>> {
        let row = sqlx::query(
            "SELECT id, status, source_message_id, payload,
                    attempts, max_attempts, last_error, created_at
             FROM tagging_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<TaggingJob>> {
        let rows = sqlx::query(
            "SELECT id, status, source_message_id, payload,
                    attempts, max_attempts, last_error, created_at
             FROM tagging_jobs
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
