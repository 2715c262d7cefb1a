//! Sequence builder: partitions tagged chunk tasks into independent chains.

use serde::Serialize;
use storyreel_core::chunk::{ChunkRole, ChunkTask};
use storyreel_core::error::CoreError;
use storyreel_core::types::{ChunkIndex, SequenceId};

/// One HEAD task followed by the FOLLOWERs that continue it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sequence {
    pub id: SequenceId,
    pub tasks: Vec<ChunkTask>,
}

impl Sequence {
    pub fn head(&self) -> Option<&ChunkTask> {
        self.tasks.first()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn chunk_indices(&self) -> Vec<ChunkIndex> {
        self.tasks.iter().map(|t| t.chunk_index).collect()
    }
}

/// Start a new sequence at every HEAD and append FOLLOWERs to the current one.
///
/// Task indices must be strictly increasing. A FOLLOWER before any HEAD, or
/// one that does not directly follow the previous task, is rejected with its
/// chunk index.
pub fn build_sequences(tasks: Vec<ChunkTask>) -> Result<Vec<Sequence>, CoreError> {
    let mut sequences: Vec<Sequence> = Vec::new();
    let mut previous: Option<ChunkIndex> = None;

    for task in tasks {
        if previous.is_some_and(|prev| task.chunk_index <= prev) {
            return Err(CoreError::validation(format!(
                "chunk index {} is out of order",
                task.chunk_index
            ))
            .with_chunk(task.chunk_index));
        }
        previous = Some(task.chunk_index);

        match task.role {
            ChunkRole::Head => {
                let id = sequences.len();
                sequences.push(Sequence { id, tasks: vec![task] });
            }
            ChunkRole::Follower => {
                let Some(current) = sequences.last_mut() else {
                    return Err(CoreError::validation(format!(
                        "follower chunk {} has no preceding head",
                        task.chunk_index
                    ))
                    .with_beat(&task.beat_id)
                    .with_chunk(task.chunk_index));
                };
                let last = current.tasks.last().map(|t| t.chunk_index);
                if last.map(|i| i + 1) != Some(task.chunk_index) {
                    return Err(CoreError::validation(format!(
                        "follower chunk {} does not directly follow chunk {:?} of its sequence",
                        task.chunk_index, last
                    ))
                    .with_beat(&task.beat_id)
                    .with_sequence(current.id)
                    .with_chunk(task.chunk_index));
                }
                current.tasks.push(task);
            }
        }
    }

    tracing::debug!(
        sequences = sequences.len(),
        lengths = ?sequences.iter().map(Sequence::len).collect::<Vec<_>>(),
        "Chunk tasks partitioned into sequences",
    );
    Ok(sequences)
}
