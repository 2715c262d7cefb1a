//! Stitch stage: assemble the ordered chunks into one clip.

use serde::Serialize;
use storyreel_core::artifact::Artifact;
use storyreel_core::job::Stage;
use storyreel_core::stitching::{check_assembled_duration, plan_stitch, StitchPlan};

use super::{GeneratedChunks, StageOutcome, StageOutput};
use crate::context::JobContext;
use crate::error::StageError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StitchedVideo {
    pub video: Artifact,
    pub stitch: StitchPlan,
    /// Duration measured on the assembled clip.
    pub duration: f64,
}

pub(super) async fn run(ctx: &JobContext, generated: GeneratedChunks) -> Result<StageOutcome, StageError> {
    let tolerance = ctx.config.duration_tolerance_secs;
    let stitch = plan_stitch(&generated.chunks, &generated.plan, tolerance)?;

    let compositor = &ctx.services.compositor;
    let video = ctx
        .calls
        .call(&ctx.cancel, "concatenate_with_transitions", || {
            compositor.concatenate_with_transitions(&stitch)
        })
        .await
        .map_err(|e| StageError::service(Stage::Stitch, e))?
        .value;

    let duration = video.duration_secs.unwrap_or(stitch.expected_duration);
    let target_duration = ctx.job.target_duration_secs;
    check_assembled_duration(duration, target_duration, tolerance)?;

    tracing::info!(
        job_id = %ctx.job.id,
        clips = stitch.clips.len(),
        trim_final_secs = stitch.trim_final_secs,
        duration,
        target_duration,
        "Chunks stitched",
    );

    Ok(StageOutcome::free(StageOutput::Stitched(StitchedVideo {
        video,
        stitch,
        duration,
    })))
}
