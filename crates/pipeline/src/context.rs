//! Per-job context handed to every stage.

use std::sync::Arc;

use storyreel_core::generation::GenerationProfile;
use storyreel_core::job::Job;
use storyreel_core::services::{AssetMatcher, GenerationService, MediaCompositor, Refiner};
use storyreel_events::ProgressLedger;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::retry::CallRunner;

/// The external collaborators, built once per process.
#[derive(Clone)]
pub struct Services {
    pub generator: Arc<dyn GenerationService>,
    pub compositor: Arc<dyn MediaCompositor>,
    pub asset_matcher: Arc<dyn AssetMatcher>,
    pub refiner: Arc<dyn Refiner>,
}

/// Everything a stage needs to run one job.
#[derive(Clone)]
pub struct JobContext {
    pub job: Arc<Job>,
    /// Profile of `job.generation_model`, resolved at submission.
    pub profile: GenerationProfile,
    pub config: Arc<PipelineConfig>,
    pub services: Services,
    pub calls: CallRunner,
    pub ledger: ProgressLedger,
    /// Child of the orchestrator's shutdown token.
    pub cancel: CancellationToken,
}
