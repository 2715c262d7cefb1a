//! Pipeline scheduler.
//!
//! [`Orchestrator::submit`] validates a job, writes its creation record and
//! spawns a driver task that runs the six stages in order. The driver never
//! holds a worker-pool permit; only the external calls inside a stage do.
//! The first failing stage aborts the job and the failure is written as the
//! terminal state.

use std::sync::Arc;

use futures::stream::BoxStream;
use storyreel_core::generation::{GenerationProfile, ProfileRegistry};
use storyreel_core::job::{validate_job, Job, JobState, JobStateUpdate, Stage};
use storyreel_core::types::JobId;
use storyreel_events::{LedgerError, ProgressLedger};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PipelineConfig;
use crate::context::{JobContext, Services};
use crate::error::{PipelineError, StageError};
use crate::pool::WorkerPool;
use crate::retry::CallRunner;
use crate::stages::{run_stage, StageOutput};

/// Process-wide job scheduler, built once and shared.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<PipelineConfig>,
    profiles: Arc<ProfileRegistry>,
    ledger: ProgressLedger,
    services: Services,
    calls: CallRunner,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, profiles: ProfileRegistry, ledger: ProgressLedger, services: Services) -> Self {
        let pool = WorkerPool::new(config.concurrency);
        let calls = CallRunner::new(pool, config.retry.clone(), config.call_timeout);
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                profiles: Arc::new(profiles),
                ledger,
                services,
                calls,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.inner.ledger
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Accept a job and start running it in the background.
    ///
    /// Fails synchronously only for malformed jobs, unknown profiles, a
    /// failed creation write, or a shutdown in progress.
    pub async fn submit(&self, job: Job) -> Result<RunHandle, PipelineError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(PipelineError::ShuttingDown);
        }
        validate_job(&job)?;
        let profile: GenerationProfile = inner.profiles.get(&job.generation_model)?.clone();

        inner.ledger.create(&job).await?;

        let job_id = job.id;
        let cancel = inner.shutdown.child_token();
        let ctx = JobContext {
            job: Arc::new(job),
            profile,
            config: inner.config.clone(),
            services: inner.services.clone(),
            calls: inner.calls.clone(),
            ledger: inner.ledger.clone(),
            cancel: cancel.clone(),
        };

        tracing::info!(
            job_id = %job_id,
            model = %ctx.job.generation_model,
            target_duration = ctx.job.target_duration_secs,
            "Job submitted",
        );

        let task = inner.tracker.spawn(drive(ctx));
        Ok(RunHandle { job_id, cancel, task })
    }

    /// Current state of a job.
    pub async fn status(&self, job_id: JobId) -> Result<JobState, PipelineError> {
        Ok(self.inner.ledger.read(job_id).await?)
    }

    /// Push stream of a job's states, ending after the terminal one.
    pub async fn subscribe(&self, job_id: JobId) -> Result<BoxStream<'static, JobState>, PipelineError> {
        Ok(self.inner.ledger.subscribe(job_id).await?)
    }

    /// Stop accepting jobs, cancel every running one and wait for their
    /// terminal writes.
    pub async fn shutdown(&self) {
        tracing::info!("Orchestrator shutting down");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

// ---------------------------------------------------------------------------
// Run handle
// ---------------------------------------------------------------------------

/// Handle to one submitted job.
#[derive(Debug)]
pub struct RunHandle {
    pub job_id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<Result<JobState, LedgerError>>,
}

impl RunHandle {
    /// Stop dispatching new work for this job. In-flight calls are abandoned.
    pub fn cancel(&self) {
        tracing::info!(job_id = %self.job_id, "Job cancellation requested");
        self.cancel.cancel();
    }

    /// Wait for the job to reach a terminal state.
    pub async fn join(self) -> Result<JobState, PipelineError> {
        match self.task.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(PipelineError::Join(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

async fn drive(ctx: JobContext) -> Result<JobState, LedgerError> {
    let job_id = ctx.job.id;
    let milestones = &ctx.config.milestones;
    let mut input = StageOutput::Submitted((*ctx.job).clone());

    for stage in Stage::ALL {
        if ctx.cancel.is_cancelled() {
            return fail(&ctx, stage, StageError::Cancelled).await;
        }

        tracing::info!(job_id = %job_id, stage = %stage, "Stage started");
        ctx.ledger
            .record(job_id, JobStateUpdate::running(stage, milestones.entry(stage)))
            .await?;

        match run_stage(stage, &ctx, input).await {
            Ok(outcome) => {
                tracing::info!(
                    job_id = %job_id,
                    stage = %stage,
                    cost_delta = outcome.cost_delta,
                    "Stage finished",
                );
                ctx.ledger
                    .record(
                        job_id,
                        JobStateUpdate::running(stage, milestones.exit(stage))
                            .with_output(outcome.output.to_json())
                            .with_cost(outcome.cost_delta),
                    )
                    .await?;
                input = outcome.output;
            }
            Err(e) => {
                let e = if ctx.cancel.is_cancelled() { StageError::Cancelled } else { e };
                return fail(&ctx, stage, e).await;
            }
        }
    }

    ctx.ledger
        .record(job_id, JobStateUpdate::complete(Stage::Refine))
        .await?;
    tracing::info!(job_id = %job_id, "Job complete");
    ctx.ledger.read(job_id).await
}

async fn fail(ctx: &JobContext, stage: Stage, error: StageError) -> Result<JobState, LedgerError> {
    let job_id = ctx.job.id;
    let report = error.into_job_error(stage);
    tracing::error!(
        job_id = %job_id,
        stage = %stage,
        kind = ?report.kind,
        missing_chunks = ?report.missing_chunks,
        error = %report.message,
        "Job failed",
    );
    ctx.ledger.record(job_id, JobStateUpdate::failed(report)).await?;
    ctx.ledger.read(job_id).await
}
