//! The durable-store seam used by the progress ledger.

use async_trait::async_trait;
use storyreel_core::job::{Job, JobState};
use storyreel_core::types::JobId;

use crate::repositories::JobRepo;
use crate::DbPool;

/// Errors raised by durable store implementations.
#[derive(Debug, thiserror::Error)]
pub enum DurableStoreError {
    #[error("Job {0} not found in durable store")]
    NotFound(JobId),

    #[error("Job {0} already exists")]
    AlreadyExists(JobId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record could not be decoded.
    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

/// Persistent store holding the creation and terminal record of each job.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persist a newly submitted job with its initial state.
    async fn create(&self, job: &Job, initial: &JobState) -> Result<(), DurableStoreError>;

    /// Persist the terminal state of a job.
    ///
    /// Idempotent: only the first terminal write is stored. Returns whether
    /// this call was the one that stored it.
    async fn write_terminal(&self, job_id: JobId, state: &JobState) -> Result<bool, DurableStoreError>;

    /// Read the last durable state (initial or terminal).
    async fn read(&self, job_id: JobId) -> Result<JobState, DurableStoreError>;
}

/// Postgres-backed durable store.
#[derive(Clone)]
pub struct PgDurableStore {
    pool: DbPool,
}

impl PgDurableStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn create(&self, job: &Job, initial: &JobState) -> Result<(), DurableStoreError> {
        let beats = serde_json::to_value(&job.beats)?;
        JobRepo::create(&self.pool, job, initial, &beats)
            .await
            .map_err(|e| {
                let duplicate =
                    matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
                if duplicate {
                    DurableStoreError::AlreadyExists(job.id)
                } else {
                    DurableStoreError::Database(e)
                }
            })?;
        tracing::debug!(job_id = %job.id, "Job creation record persisted");
        Ok(())
    }

    async fn write_terminal(&self, job_id: JobId, state: &JobState) -> Result<bool, DurableStoreError> {
        let phase_outputs = serde_json::to_value(&state.phase_outputs)?;
        let error = state.error.as_ref().map(serde_json::to_value).transpose()?;

        let written = JobRepo::write_terminal(&self.pool, state, &phase_outputs, error.as_ref()).await?;
        if written {
            tracing::info!(job_id = %job_id, status = %state.status, "Terminal state persisted");
            return Ok(true);
        }

        if JobRepo::find_by_id(&self.pool, job_id).await?.is_none() {
            return Err(DurableStoreError::NotFound(job_id));
        }
        tracing::debug!(job_id = %job_id, "Terminal state already recorded, write ignored");
        Ok(false)
    }

    async fn read(&self, job_id: JobId) -> Result<JobState, DurableStoreError> {
        JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or(DurableStoreError::NotFound(job_id))?
            .into_state()
    }
}
