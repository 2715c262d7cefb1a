//! Plan stage: validates the beat plan against the target duration.

use serde::{Deserialize, Serialize};
use storyreel_core::error::CoreError;
use storyreel_core::job::{Beat, Job};

use super::{StageOutcome, StageOutput};
use crate::context::JobContext;
use crate::error::StageError;

/// A beat plan known to tile the target timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatPlan {
    pub target_duration: f64,
    /// End of the last beat.
    pub covered_duration: f64,
    pub beats: Vec<Beat>,
}

pub(super) fn run(ctx: &JobContext, job: &Job) -> Result<StageOutcome, StageError> {
    let plan = validate_beat_plan(job, ctx.config.duration_tolerance_secs)?;
    tracing::info!(
        job_id = %job.id,
        beats = plan.beats.len(),
        covered_duration = plan.covered_duration,
        target_duration = plan.target_duration,
        "Beat plan validated",
    );
    Ok(StageOutcome::free(StageOutput::BeatPlan(plan)))
}

/// Check that the beats are ordered, positive, contiguous and cover the
/// target within `tolerance`.
pub fn validate_beat_plan(job: &Job, tolerance: f64) -> Result<BeatPlan, CoreError> {
    let Some(first) = job.beats.first() else {
        return Err(CoreError::validation("beat plan is empty"));
    };
    if first.start_time.abs() > tolerance {
        return Err(CoreError::validation(format!(
            "first beat starts at {}s instead of 0s",
            first.start_time
        ))
        .with_beat(&first.id));
    }

    for beat in &job.beats {
        if !beat.duration.is_finite() || beat.duration <= 0.0 {
            return Err(
                CoreError::validation(format!("beat duration must be positive, got {}", beat.duration))
                    .with_beat(&beat.id),
            );
        }
        if !beat.start_time.is_finite() {
            return Err(CoreError::validation("beat start_time must be finite").with_beat(&beat.id));
        }
    }

    for pair in job.beats.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start_time < prev.start_time {
            return Err(CoreError::validation(format!(
                "beat starts at {}s, before the preceding beat '{}' at {}s",
                next.start_time, prev.id, prev.start_time
            ))
            .with_beat(&next.id));
        }
        let gap = next.start_time - prev.end_time();
        if gap.abs() > tolerance {
            let relation = if gap > 0.0 { "gap" } else { "overlap" };
            return Err(CoreError::validation(format!(
                "{relation} of {:.3}s after beat '{}'",
                gap.abs(),
                prev.id
            ))
            .with_beat(&next.id));
        }
    }

    let covered = job.beats.last().map_or(0.0, Beat::end_time);
    if (covered - job.target_duration_secs).abs() > tolerance {
        let last = job.beats.last().map(|b| b.id.clone()).unwrap_or_default();
        return Err(CoreError::validation(format!(
            "beats cover {covered:.3}s but target is {:.3}s",
            job.target_duration_secs
        ))
        .with_beat(last));
    }

    Ok(BeatPlan {
        target_duration: job.target_duration_secs,
        covered_duration: covered,
        beats: job.beats.clone(),
    })
}
