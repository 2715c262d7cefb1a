//! Continuity manager: decides what each chunk task is conditioned on.
//!
//! A HEAD task starts a new take from an external reference, or from the
//! prompt alone when no reference exists. A FOLLOWER is always seeded by the
//! trailing frame of its predecessor's output so the sequence reads as one
//! continuous shot.

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactKind};
use crate::chunk::{ChunkResult, ChunkRole, ChunkTask};
use crate::error::CoreError;
use crate::generation::ChunkPlan;
use crate::job::{Beat, ShotTransition};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default seek-back before the nominal end when extracting a trailing frame.
pub const DEFAULT_TRAILING_FRAME_OFFSET_SECS: f64 = 0.1;

/// Slack when matching chunk start offsets to beat boundaries.
const BOUNDARY_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Input resolution
// ---------------------------------------------------------------------------

/// What a generation call is conditioned on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "artifact", rename_all = "snake_case")]
pub enum GenerationInput {
    /// HEAD with an externally supplied reference image.
    Reference(Artifact),
    /// HEAD with no conditioning image: text-to-video generation.
    PromptOnly,
    /// FOLLOWER seeded by the predecessor's trailing frame.
    TrailingFrame(Artifact),
}

impl GenerationInput {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            GenerationInput::Reference(a) | GenerationInput::TrailingFrame(a) => Some(a),
            GenerationInput::PromptOnly => None,
        }
    }
}

/// Resolve the conditioning input for `task`.
///
/// FOLLOWERs never fall back to the beat reference: a missing or
/// non-adjacent predecessor is a validation error.
pub fn resolve_input(
    task: &ChunkTask,
    predecessor: Option<&ChunkResult>,
) -> Result<GenerationInput, CoreError> {
    match task.role {
        ChunkRole::Head => Ok(match &task.reference {
            Some(reference) => GenerationInput::Reference(reference.clone()),
            None => GenerationInput::PromptOnly,
        }),
        ChunkRole::Follower => {
            let prev = predecessor.ok_or_else(|| {
                CoreError::validation("follower has no predecessor result to continue from")
                    .with_beat(&task.beat_id)
                    .with_chunk(task.chunk_index)
            })?;
            if prev.chunk_index + 1 != task.chunk_index {
                return Err(CoreError::validation(format!(
                    "follower {} cannot continue from non-adjacent chunk {}",
                    task.chunk_index, prev.chunk_index
                ))
                .with_beat(&task.beat_id)
                .with_chunk(task.chunk_index));
            }
            if prev.continuation.kind != ArtifactKind::Image {
                return Err(CoreError::validation(format!(
                    "continuation of chunk {} is not a still frame",
                    prev.chunk_index
                ))
                .with_chunk(task.chunk_index));
            }
            Ok(GenerationInput::TrailingFrame(prev.continuation.clone()))
        }
    }
}

/// Timestamp at which to grab the trailing frame of `output`.
///
/// Seeks `offset_secs` before the nominal end to stay clear of decoder edge
/// artifacts on the final frame.
pub fn trailing_frame_seek(output: &Artifact, fallback_duration: f64, offset_secs: f64) -> f64 {
    let duration = output.duration_secs.unwrap_or(fallback_duration);
    (duration - offset_secs.max(0.0)).max(0.0)
}

// ---------------------------------------------------------------------------
// Beat analysis
// ---------------------------------------------------------------------------

/// Tag each beat as opening a new take (HEAD) or continuing the previous one.
///
/// The first beat, every hard cut, and every beat carrying its own
/// reference are HEADs.
pub fn assign_beat_roles(beats: &[Beat]) -> Vec<ChunkRole> {
    beats
        .iter()
        .enumerate()
        .map(|(i, beat)| {
            if i == 0 || beat.reference.is_some() || beat.shot.transition == ShotTransition::Cut {
                ChunkRole::Head
            } else {
                ChunkRole::Follower
            }
        })
        .collect()
}

/// Lay the chunk plan over the beats and tag each chunk.
///
/// Chunk `i` belongs to the beat containing its start offset. The first
/// chunk of a HEAD beat is a HEAD; every other chunk continues the chunk
/// before it. `beats` must be sorted by start time and `roles` must be
/// parallel to it.
pub fn build_chunk_tasks(
    plan: &ChunkPlan,
    beats: &[Beat],
    roles: &[ChunkRole],
) -> Result<Vec<ChunkTask>, CoreError> {
    if beats.len() != roles.len() {
        return Err(CoreError::Internal(format!(
            "{} beats but {} roles",
            beats.len(),
            roles.len()
        )));
    }

    let mut tasks = Vec::with_capacity(plan.chunk_count as usize);
    let mut last_beat: Option<usize> = None;

    for index in 0..plan.chunk_count {
        let start = plan.chunk_start(index);
        let beat_pos = beats
            .iter()
            .rposition(|b| b.start_time <= start + BOUNDARY_EPSILON)
            .ok_or_else(|| {
                CoreError::validation(format!("no beat covers chunk start {start}s"))
                    .with_chunk(index)
            })?;
        let beat = &beats[beat_pos];
        if start + BOUNDARY_EPSILON >= beat.end_time() {
            return Err(CoreError::validation(format!(
                "chunk start {start}s falls after the end of beat '{}' ({}s)",
                beat.id,
                beat.end_time()
            ))
            .with_beat(&beat.id)
            .with_chunk(index));
        }

        let opens_beat = last_beat != Some(beat_pos);
        let role = if roles[beat_pos] == ChunkRole::Head && opens_beat {
            ChunkRole::Head
        } else {
            ChunkRole::Follower
        };
        if opens_beat && last_beat.is_some_and(|prev| beat_pos > prev + 1) {
            tracing::debug!(
                beat_id = %beat.id,
                chunk_index = index,
                "Beats shorter than one chunk were absorbed by their neighbours",
            );
        }
        last_beat = Some(beat_pos);

        tasks.push(ChunkTask {
            chunk_index: index,
            beat_id: beat.id.clone(),
            role,
            prompt: beat.prompt.clone(),
            reference: (role == ChunkRole::Head).then(|| beat.reference.clone()).flatten(),
            start_time: start,
        });
    }

    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
