use storyreel_core::chunk::ChunkResult;
use storyreel_core::error::CoreError;
use storyreel_core::job::{ErrorKind, JobError, Stage};
use storyreel_core::services::ServiceError;
use storyreel_core::types::ChunkIndex;
use storyreel_events::LedgerError;

/// Failure of a single stage. Any of these aborts the job.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("{stage} call failed: {source}")]
    Service {
        stage: Stage,
        #[source]
        source: ServiceError,
    },

    /// Chunks that never produced a result, with the reason of each failure.
    #[error("chunks {missing:?} missing after generation: {reason}")]
    MissingChunks {
        missing: Vec<ChunkIndex>,
        completed: Vec<ChunkResult>,
        reason: String,
    },

    #[error("{stage} received the wrong input, expected {expected}")]
    InputMismatch { stage: Stage, expected: &'static str },

    #[error("job cancelled")]
    Cancelled,
}

impl StageError {
    pub fn service(stage: Stage, source: ServiceError) -> Self {
        match source {
            ServiceError::Cancelled => StageError::Cancelled,
            source => StageError::Service { stage, source },
        }
    }

    /// Failure report persisted with the job.
    pub fn into_job_error(self, phase: Stage) -> JobError {
        let message = self.describe();
        let (kind, missing_chunks, completed_chunks) = match self {
            StageError::Validation(CoreError::Internal(_)) | StageError::InputMismatch { .. } => {
                (ErrorKind::Internal, vec![], vec![])
            }
            StageError::Validation(_) => (ErrorKind::Validation, vec![], vec![]),
            StageError::Service { .. } => (ErrorKind::Service, vec![], vec![]),
            StageError::MissingChunks { missing, completed, .. } => (
                ErrorKind::PartialChain,
                missing,
                completed.iter().map(|c| c.chunk_index).collect(),
            ),
            StageError::Cancelled => (ErrorKind::Cancelled, vec![], vec![]),
        };
        JobError {
            kind,
            phase,
            message,
            missing_chunks,
            completed_chunks,
        }
    }

    /// Display text plus any structured validation context.
    fn describe(&self) -> String {
        let mut message = self.to_string();
        if let StageError::Validation(CoreError::Validation {
            beat_id,
            sequence_id,
            chunk_index,
            ..
        }) = self
        {
            if let Some(beat) = beat_id {
                message.push_str(&format!(" [beat {beat}]"));
            }
            if let Some(sequence) = sequence_id {
                message.push_str(&format!(" [sequence {sequence}]"));
            }
            if let Some(chunk) = chunk_index {
                message.push_str(&format!(" [chunk {chunk}]"));
            }
        }
        message
    }
}

/// Errors returned synchronously by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    #[error("Job run task failed: {0}")]
    Join(String),
}
