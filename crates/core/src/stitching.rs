//! Stitch planning: transitions, cross-fades and the final trim.
//!
//! Chunks inside one sequence are joined seamlessly. Boundaries between
//! sequences get a cross-fade of at most [`ChunkPlan::overlap`], paid for out
//! of the excess the chunk plan generated beyond the target. Whatever excess
//! remains is trimmed off the final chunk so the assembled video lands on
//! the target duration.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::chunk::ChunkResult;
use crate::error::CoreError;
use crate::generation::ChunkPlan;

/// Default allowed error between assembled and target duration, in seconds.
pub const DEFAULT_DURATION_TOLERANCE_SECS: f64 = 0.5;

/// How two adjacent clips are joined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionSpec {
    /// Same take: the second clip was seeded by the first one's trailing frame.
    Continuous,
    /// Independent takes joined with a blend of `duration_secs`.
    CrossFade { duration_secs: f64 },
    /// Independent takes with no excess left to blend over.
    Cut,
}

/// Everything the compositor needs to assemble the final clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchPlan {
    pub clips: Vec<Artifact>,
    /// `transitions[i]` joins `clips[i]` and `clips[i + 1]`.
    pub transitions: Vec<TransitionSpec>,
    /// Seconds cut from the end of the final clip.
    pub trim_final_secs: f64,
    pub expected_duration: f64,
    pub target_duration: f64,
}

/// Plan the assembly of `chunks`, which must be sorted by chunk index.
pub fn plan_stitch(
    chunks: &[ChunkResult],
    plan: &ChunkPlan,
    tolerance: f64,
) -> Result<StitchPlan, CoreError> {
    let last = chunks
        .last()
        .ok_or_else(|| CoreError::validation("nothing to stitch: no chunks were generated"))?;
    if let Some(pair) = chunks.windows(2).find(|w| w[0].chunk_index >= w[1].chunk_index) {
        return Err(CoreError::Internal(format!(
            "chunks out of order at index {}",
            pair[1].chunk_index
        )));
    }

    let durations: Vec<f64> = chunks
        .iter()
        .map(|c| c.output_duration_or(plan.effective_unit))
        .collect();
    let total: f64 = durations.iter().sum();
    let target = plan.target_duration;

    if total < target - tolerance {
        return Err(CoreError::validation(format!(
            "generated clips total {total:.3}s, short of target {target:.3}s"
        )));
    }

    let crossings = chunks
        .windows(2)
        .filter(|w| w[0].sequence_id != w[1].sequence_id)
        .count();
    let slack = (total - target).max(0.0);
    let fade = if crossings > 0 {
        plan.overlap.min(slack / crossings as f64)
    } else {
        0.0
    };

    let transitions = chunks
        .windows(2)
        .map(|w| {
            if w[0].sequence_id == w[1].sequence_id {
                TransitionSpec::Continuous
            } else if fade > 0.0 {
                TransitionSpec::CrossFade { duration_secs: fade }
            } else {
                TransitionSpec::Cut
            }
        })
        .collect();

    let last_duration = last.output_duration_or(plan.effective_unit);
    let remaining = slack - fade * crossings as f64;
    let trim_final_secs = remaining.clamp(0.0, last_duration);
    let expected_duration = total - fade * crossings as f64 - trim_final_secs;

    check_assembled_duration(expected_duration, target, tolerance)?;

    Ok(StitchPlan {
        clips: chunks.iter().map(|c| c.output.clone()).collect(),
        transitions,
        trim_final_secs,
        expected_duration,
        target_duration: target,
    })
}

/// Fail unless `actual` is within `tolerance` of `target`.
pub fn check_assembled_duration(actual: f64, target: f64, tolerance: f64) -> Result<(), CoreError> {
    if (actual - target).abs() > tolerance {
        return Err(CoreError::validation(format!(
            "assembled duration {actual:.3}s is outside {target:.3}s ± {tolerance}s"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
