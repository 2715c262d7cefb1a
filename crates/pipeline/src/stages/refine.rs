//! Refine stage: final post-processing pass.

use serde::Serialize;
use storyreel_core::artifact::Artifact;
use storyreel_core::job::Stage;

use super::{StageOutcome, StageOutput, StitchedVideo};
use crate::context::JobContext;
use crate::error::StageError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalVideo {
    pub video: Artifact,
    pub refine_cost: f64,
}

pub(super) async fn run(ctx: &JobContext, stitched: StitchedVideo) -> Result<StageOutcome, StageError> {
    let refiner = &ctx.services.refiner;
    let refined = ctx
        .calls
        .call(&ctx.cancel, "refine", || refiner.refine(&stitched.video))
        .await
        .map_err(|e| StageError::service(Stage::Refine, e))?
        .value;

    let cost = if refined.cost.is_finite() { refined.cost.max(0.0) } else { 0.0 };
    tracing::info!(job_id = %ctx.job.id, uri = %refined.video.uri, cost, "Video refined");

    Ok(StageOutcome {
        output: StageOutput::Final(FinalVideo {
            video: refined.video,
            refine_cost: cost,
        }),
        cost_delta: cost,
    })
}
