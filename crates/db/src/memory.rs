//! In-process durable store for tests and single-node dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use storyreel_core::job::{Job, JobState};
use storyreel_core::types::JobId;

use crate::store::{DurableStore, DurableStoreError};

/// `HashMap`-backed [`DurableStore`] with the same first-terminal-wins rule
/// as the Postgres store.
#[derive(Default)]
pub struct MemoryDurableStore {
    jobs: RwLock<HashMap<JobId, JobState>>,
    writes: AtomicUsize,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that actually changed stored state.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn create(&self, job: &Job, initial: &JobState) -> Result<(), DurableStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(&job.id) {
            return Err(DurableStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, initial.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_terminal(&self, job_id: JobId, state: &JobState) -> Result<bool, DurableStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let stored = jobs.get_mut(&job_id).ok_or(DurableStoreError::NotFound(job_id))?;
        if stored.status.is_terminal() {
            return Ok(false);
        }
        *stored = state.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn read(&self, job_id: JobId) -> Result<JobState, DurableStoreError> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(&job_id)
            .cloned()
            .ok_or(DurableStoreError::NotFound(job_id))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use storyreel_core::job::{JobStateUpdate, JobStatus, Stage};

    use super::*;

    fn job() -> Job {
        Job::new(10.0, "fixed-5s", vec![])
    }

    #[tokio::test]
    async fn create_then_read_returns_initial_state() {
        let store = MemoryDurableStore::new();
        let job = job();
        store.create(&job, &JobState::initial(job.id)).await.unwrap();

        let state = store.read(job.id).await.unwrap();
        assert_eq!(state.status, JobStatus::Queued);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = MemoryDurableStore::new();
        let job = job();
        store.create(&job, &JobState::initial(job.id)).await.unwrap();
        assert_matches!(
            store.create(&job, &JobState::initial(job.id)).await,
            Err(DurableStoreError::AlreadyExists(_))
        );
    }

    #[tokio::test]
    async fn second_terminal_write_is_ignored() {
        let store = MemoryDurableStore::new();
        let job = job();
        store.create(&job, &JobState::initial(job.id)).await.unwrap();

        let mut complete = JobState::initial(job.id);
        complete.apply(&JobStateUpdate::complete(Stage::Refine));
        let mut failed = JobState::initial(job.id);
        failed.status = JobStatus::Failed;

        assert!(store.write_terminal(job.id, &complete).await.unwrap());
        assert!(!store.write_terminal(job.id, &failed).await.unwrap());

        let state = store.read(job.id).await.unwrap();
        assert_eq!(state.status, JobStatus::Complete);
        assert_eq!(state.progress, 100);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn terminal_write_for_unknown_job_fails() {
        let store = MemoryDurableStore::new();
        let id = uuid::Uuid::now_v7();
        assert_matches!(
            store.write_terminal(id, &JobState::initial(id)).await,
            Err(DurableStoreError::NotFound(_))
        );
    }
}
