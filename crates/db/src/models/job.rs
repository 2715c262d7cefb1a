//! Row model for the `pipeline_jobs` table.

use sqlx::FromRow;
use storyreel_core::job::{JobError, JobState, JobStatus, Stage};
use storyreel_core::types::{JobId, Timestamp};

use crate::store::DurableStoreError;

/// A row from the `pipeline_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub target_duration_secs: f64,
    pub generation_model: String,
    pub beats: serde_json::Value,
    pub status: String,
    pub progress: i16,
    pub current_phase: Option<String>,
    pub cost: f64,
    pub phase_outputs: serde_json::Value,
    pub error: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl JobRow {
    /// Decode the row into the ledger's state record.
    pub fn into_state(self) -> Result<JobState, DurableStoreError> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            DurableStoreError::Corrupt(format!("job {}: bad {what}: {e}", self.id))
        };

        let status: JobStatus = self.status.parse().map_err(|e| corrupt("status", &e))?;
        let current_phase = self
            .current_phase
            .as_deref()
            .map(str::parse::<Stage>)
            .transpose()
            .map_err(|e| corrupt("current_phase", &e))?;
        let phase_outputs = serde_json::from_value(self.phase_outputs.clone())
            .map_err(|e| corrupt("phase_outputs", &e))?;
        let error = self
            .error
            .clone()
            .map(serde_json::from_value::<JobError>)
            .transpose()
            .map_err(|e| corrupt("error", &e))?;
        let progress = u8::try_from(self.progress).map_err(|e| corrupt("progress", &e))?;

        Ok(JobState {
            job_id: self.id,
            status,
            progress,
            current_phase,
            cost: self.cost,
            phase_outputs,
            error,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn row() -> JobRow {
        JobRow {
            id: uuid::Uuid::now_v7(),
            target_duration_secs: 10.0,
            generation_model: "fixed-5s".to_string(),
            beats: serde_json::json!([]),
            status: "failed".to_string(),
            progress: 42,
            current_phase: Some("stitch".to_string()),
            cost: 1.2,
            phase_outputs: serde_json::json!({"plan": {"beats": 2}}),
            error: Some(serde_json::json!({
                "kind": "service",
                "phase": "stitch",
                "message": "compositor unavailable"
            })),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn row_decodes_into_state() {
        let state = row().into_state().unwrap();
        assert_eq!(state.status, JobStatus::Failed);
        assert_eq!(state.progress, 42);
        assert_eq!(state.current_phase, Some(Stage::Stitch));
        assert_eq!(state.phase_outputs.len(), 1);
        assert_eq!(state.error.unwrap().message, "compositor unavailable");
    }

    #[test]
    fn unknown_status_is_reported_as_corrupt() {
        let mut bad = row();
        bad.status = "exploded".to_string();
        assert!(matches!(bad.into_state(), Err(DurableStoreError::Corrupt(_))));
    }
}
