//! Repository for the `pipeline_jobs` table.

use sqlx::PgPool;
use storyreel_core::job::{Job, JobState, JobStatus};
use storyreel_core::types::JobId;

use crate::models::job::JobRow;

/// Column list for `pipeline_jobs` queries.
const COLUMNS: &str = "\
    id, target_duration_secs, generation_model, beats, status, progress, \
    current_phase, cost, phase_outputs, error, created_at, updated_at, completed_at";

/// Provides the three durable operations on jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert the creation record. Returns the stored row.
    pub async fn create(
        pool: &PgPool,
        job: &Job,
        initial: &JobState,
        beats: &serde_json::Value,
    ) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO pipeline_jobs \
                 (id, target_duration_secs, generation_model, beats, status, progress, cost) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(job.target_duration_secs)
            .bind(&job.generation_model)
            .bind(beats)
            .bind(initial.status.to_string())
            .bind(i16::from(initial.progress))
            .bind(initial.cost)
            .fetch_one(pool)
            .await
    }

    /// Write the terminal state unless one is already recorded.
    ///
    /// Returns `true` if this call stored the state, `false` if the job had
    /// already reached a terminal status (the earlier write is kept).
    pub async fn write_terminal(
        pool: &PgPool,
        state: &JobState,
        phase_outputs: &serde_json::Value,
        error: Option<&serde_json::Value>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE pipeline_jobs \
             SET status = $2, progress = $3, current_phase = $4, cost = $5, \
                 phase_outputs = $6, error = $7, updated_at = NOW(), completed_at = NOW() \
             WHERE id = $1 AND status NOT IN ($8, $9)",
        )
        .bind(state.job_id)
        .bind(state.status.to_string())
        .bind(i16::from(state.progress))
        .bind(state.current_phase.map(|p| p.as_str()))
        .bind(state.cost)
        .bind(phase_outputs)
        .bind(error)
        .bind(JobStatus::Complete.to_string())
        .bind(JobStatus::Failed.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM pipeline_jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
