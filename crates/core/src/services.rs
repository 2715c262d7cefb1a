//! Traits for the external collaborators the pipeline drives.
//!
//! Implementations live outside the core (model clients, a media toolkit,
//! the semantic asset search). The pipeline only ever holds them as
//! `Arc<dyn Trait>`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::continuity::GenerationInput;
use crate::generation::GenerationProfile;
use crate::job::Beat;
use crate::stitching::StitchPlan;
use crate::types::ChunkIndex;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of one call to an external collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// Rate limit, overload, dropped connection. Safe to retry.
    #[error("Transient service error: {0}")]
    Transient(String),

    /// The call did not answer within its budget. Retried like `Transient`.
    #[error("Service call timed out after {0:?}")]
    Timeout(Duration),

    /// The service rejected the request outright. Never retried.
    #[error("Service rejected request: {0}")]
    Permanent(String),

    /// The job was cancelled while the call was pending.
    #[error("Call abandoned because the job was cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_) | ServiceError::Timeout(_))
    }
}

// ---------------------------------------------------------------------------
// Generation service
// ---------------------------------------------------------------------------

/// One chunk generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub chunk_index: ChunkIndex,
    pub prompt: String,
    pub input: GenerationInput,
}

/// Video generation model.
///
/// The returned clip length is dictated by the profile, not by the request:
/// callers must read [`GenerationProfile::actual_output_duration`] rather
/// than assume their requested duration was honoured.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        profile: &GenerationProfile,
    ) -> Result<Artifact, ServiceError>;
}

// ---------------------------------------------------------------------------
// Media compositor
// ---------------------------------------------------------------------------

/// Frame extraction and clip assembly.
#[async_trait]
pub trait MediaCompositor: Send + Sync {
    /// Grab a still frame of `video` at `at_secs`.
    async fn extract_trailing_frame(
        &self,
        video: &Artifact,
        at_secs: f64,
    ) -> Result<Artifact, ServiceError>;

    /// Join the clips of `plan` with its transitions and final trim.
    async fn concatenate_with_transitions(&self, plan: &StitchPlan) -> Result<Artifact, ServiceError>;
}

// ---------------------------------------------------------------------------
// Asset matcher
// ---------------------------------------------------------------------------

/// A candidate reference image for a beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecommendation {
    pub artifact: Artifact,
    /// Match confidence in `0.0..=1.0`.
    pub confidence: f64,
}

/// Semantic search over the asset library.
#[async_trait]
pub trait AssetMatcher: Send + Sync {
    async fn recommend(&self, beat: &Beat) -> Result<Vec<AssetRecommendation>, ServiceError>;
}

// ---------------------------------------------------------------------------
// Refiner
// ---------------------------------------------------------------------------

/// Output of the final post-processing pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedVideo {
    pub video: Artifact,
    /// Billed cost of the pass.
    pub cost: f64,
}

/// Final post-processing (grading, upscaling, audio bed).
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, video: &Artifact) -> Result<RefinedVideo, ServiceError>;
}
