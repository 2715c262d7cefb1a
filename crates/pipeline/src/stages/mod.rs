//! The six pipeline stages and their typed hand-off values.
//!
//! Each stage consumes exactly the output of the stage before it; Plan
//! consumes the submitted job.

pub mod chunk_generation;
pub mod plan;
pub mod reference;
pub mod refine;
pub mod stitch;
pub mod storyboard;

use storyreel_core::job::{Job, Stage};

pub use chunk_generation::GeneratedChunks;
pub use plan::BeatPlan;
pub use reference::{ReferenceMatch, ReferencedStoryboard};
pub use refine::FinalVideo;
pub use stitch::StitchedVideo;
pub use storyboard::Storyboard;

use crate::context::JobContext;
use crate::error::StageError;

/// Value passed from one stage to the next.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Submitted(Job),
    BeatPlan(BeatPlan),
    Storyboard(Storyboard),
    Referenced(ReferencedStoryboard),
    Chunks(GeneratedChunks),
    Stitched(StitchedVideo),
    Final(FinalVideo),
}

impl StageOutput {
    /// JSON form recorded as the stage's phase output.
    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            StageOutput::Submitted(job) => serde_json::to_value(job),
            StageOutput::BeatPlan(v) => serde_json::to_value(v),
            StageOutput::Storyboard(v) => serde_json::to_value(v),
            StageOutput::Referenced(v) => serde_json::to_value(v),
            StageOutput::Chunks(v) => serde_json::to_value(v),
            StageOutput::Stitched(v) => serde_json::to_value(v),
            StageOutput::Final(v) => serde_json::to_value(v),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// A finished stage: its output and the cost it incurred on top of what
/// was already reported while it ran.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub output: StageOutput,
    pub cost_delta: f64,
}

impl StageOutcome {
    pub fn free(output: StageOutput) -> Self {
        Self { output, cost_delta: 0.0 }
    }
}

/// Run `stage` on `input`.
pub async fn run_stage(stage: Stage, ctx: &JobContext, input: StageOutput) -> Result<StageOutcome, StageError> {
    match (stage, input) {
        (Stage::Plan, StageOutput::Submitted(job)) => plan::run(ctx, &job),
        (Stage::Storyboard, StageOutput::BeatPlan(plan)) => storyboard::run(plan),
        (Stage::Reference, StageOutput::Storyboard(storyboard)) => reference::run(ctx, storyboard).await,
        (Stage::ChunkGeneration, StageOutput::Referenced(referenced)) => chunk_generation::run(ctx, referenced).await,
        (Stage::Stitch, StageOutput::Chunks(chunks)) => stitch::run(ctx, chunks).await,
        (Stage::Refine, StageOutput::Stitched(stitched)) => refine::run(ctx, stitched).await,
        (stage, _) => Err(StageError::InputMismatch {
            stage,
            expected: expected_input(stage),
        }),
    }
}

fn expected_input(stage: Stage) -> &'static str {
    match stage {
        Stage::Plan => "submitted job",
        Stage::Storyboard => "beat plan",
        Stage::Reference => "storyboard",
        Stage::ChunkGeneration => "referenced storyboard",
        Stage::Stitch => "generated chunks",
        Stage::Refine => "stitched video",
    }
}
