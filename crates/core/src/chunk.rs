//! Chunk task and result records for the chunk-generation stage.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::types::{ChunkIndex, SequenceId, Timestamp};

/// Position of a task within its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkRole {
    /// Opens a sequence; conditioned on an external reference or prompt only.
    Head,
    /// Continues its predecessor; conditioned on the predecessor's trailing frame.
    Follower,
}

/// One unit of generation work, tagged before sequencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTask {
    pub chunk_index: ChunkIndex,
    pub beat_id: String,
    pub role: ChunkRole,
    pub prompt: String,
    /// External conditioning image. Only ever read for HEAD tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Artifact>,
    /// Offset of this chunk on the target timeline, in seconds.
    pub start_time: f64,
}

/// Execution status of a chunk task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never dispatched because its predecessor failed or the job was cancelled.
    Abandoned,
}

/// A successfully generated chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_index: ChunkIndex,
    pub beat_id: String,
    pub sequence_id: SequenceId,
    pub role: ChunkRole,
    pub output: Artifact,
    /// Trailing frame of `output`, the input of the next task in the sequence.
    pub continuation: Artifact,
    /// Generation attempts it took, including the successful one.
    pub attempts: u32,
    pub dispatched_at: Timestamp,
    pub completed_at: Timestamp,
}

impl ChunkResult {
    /// Length of the generated clip, falling back to `default` when the
    /// producer did not report one.
    pub fn output_duration_or(&self, default: f64) -> f64 {
        self.output.duration_secs.unwrap_or(default)
    }
}
