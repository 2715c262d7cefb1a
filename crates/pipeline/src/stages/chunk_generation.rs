//! Chunk generation stage: reconcile, tag, sequence, execute, fan in.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use storyreel_core::chunk::ChunkResult;
use storyreel_core::continuity::build_chunk_tasks;
use storyreel_core::generation::{plan_chunks, ChunkPlan};
use storyreel_core::job::{JobStateUpdate, Stage};
use storyreel_core::types::{ChunkIndex, JobId};
use storyreel_events::ProgressLedger;

use super::{ReferencedStoryboard, StageOutcome, StageOutput};
use crate::context::JobContext;
use crate::error::StageError;
use crate::executor::{ChunkOutcome, ChunkProgress, SequenceExecutor};
use crate::sequence::build_sequences;

/// Every chunk of the job, in chunk-index order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedChunks {
    pub plan: ChunkPlan,
    pub sequences: usize,
    pub chunks: Vec<ChunkResult>,
    pub outcomes: Vec<ChunkOutcome>,
}

pub(super) async fn run(ctx: &JobContext, referenced: ReferencedStoryboard) -> Result<StageOutcome, StageError> {
    let storyboard = referenced.storyboard;
    // Chunks are assigned to beats, so they cover the beat timeline. Plan
    // already held it within tolerance of the job target.
    let plan = plan_chunks(storyboard.covered_duration, &ctx.profile)?;
    let tasks = build_chunk_tasks(&plan, &storyboard.beats, &storyboard.roles)?;
    let sequences = build_sequences(tasks)?;
    let sequence_count = sequences.len();

    tracing::info!(
        job_id = %ctx.job.id,
        chunks = plan.chunk_count,
        sequences = sequence_count,
        "Dispatching sequences",
    );

    let progress = Arc::new(LedgerProgress {
        ledger: ctx.ledger.clone(),
        job_id: ctx.job.id,
        start: ctx.config.milestones.entry(Stage::ChunkGeneration),
        end: ctx.config.milestones.exit(Stage::ChunkGeneration),
    });
    let executor = SequenceExecutor::new(
        ctx.services.generator.clone(),
        ctx.services.compositor.clone(),
        ctx.calls.clone(),
        ctx.profile.clone(),
        ctx.config.trailing_frame_offset_secs,
        ctx.cancel.clone(),
        progress,
    );
    let report = executor.execute(sequences).await;

    if !report.is_complete() {
        if ctx.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        let reason = report.failure_summary();
        return Err(StageError::MissingChunks {
            missing: report.missing,
            completed: report.results,
            reason,
        });
    }

    Ok(StageOutcome::free(StageOutput::Chunks(GeneratedChunks {
        plan,
        sequences: sequence_count,
        chunks: report.results,
        outcomes: report.outcomes,
    })))
}

/// Reports chunk cost and interpolated progress to the ledger.
struct LedgerProgress {
    ledger: ProgressLedger,
    job_id: JobId,
    start: u8,
    end: u8,
}

impl LedgerProgress {
    fn interpolate(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.end;
        }
        let span = f64::from(self.end.saturating_sub(self.start));
        let fraction = (done.min(total) as f64) / (total as f64);
        self.start + (span * fraction).floor() as u8
    }

    async fn record(&self, update: JobStateUpdate) {
        if let Err(e) = self.ledger.record(self.job_id, update).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Chunk progress not recorded");
        }
    }
}

#[async_trait]
impl ChunkProgress for LedgerProgress {
    async fn cost_incurred(&self, chunk_index: ChunkIndex, cost: f64) {
        tracing::debug!(job_id = %self.job_id, chunk_index, cost, "Generation call billed");
        self.record(JobStateUpdate::running(Stage::ChunkGeneration, self.start).with_cost(cost))
            .await;
    }

    async fn chunk_completed(&self, result: &ChunkResult, done: usize, total: usize) {
        let progress = self.interpolate(done, total);
        tracing::debug!(
            job_id = %self.job_id,
            chunk_index = result.chunk_index,
            done,
            total,
            progress,
            "Chunk recorded",
        );
        self.record(JobStateUpdate::running(Stage::ChunkGeneration, progress))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use storyreel_db::MemoryDurableStore;
    use storyreel_events::{MemoryFastStore, DEFAULT_FAST_TTL};

    use super::*;

    fn progress(start: u8, end: u8) -> LedgerProgress {
        LedgerProgress {
            ledger: ProgressLedger::new(
                Arc::new(MemoryFastStore::new()),
                Arc::new(MemoryDurableStore::new()),
                DEFAULT_FAST_TTL,
            ),
            job_id: uuid::Uuid::now_v7(),
            start,
            end,
        }
    }

    #[test]
    fn progress_interpolates_between_milestones() {
        let p = progress(25, 85);
        assert_eq!(p.interpolate(0, 4), 25);
        assert_eq!(p.interpolate(1, 4), 40);
        assert_eq!(p.interpolate(4, 4), 85);
        assert_eq!(p.interpolate(9, 4), 85);
    }

    #[test]
    fn empty_stage_reports_its_exit_milestone() {
        assert_eq!(progress(25, 85).interpolate(0, 0), 85);
    }
}
