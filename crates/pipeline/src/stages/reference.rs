//! Reference stage: fills in reference images for HEAD beats from the
//! asset matcher.
//!
//! Beats that already carry a reference are left alone and FOLLOWER beats are
//! never given one. A HEAD with no recommendation at or above the confidence
//! floor stays prompt-only, as does one whose lookup failed.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use storyreel_core::artifact::ArtifactKind;
use storyreel_core::chunk::ChunkRole;
use storyreel_core::job::Stage;
use storyreel_core::services::{AssetRecommendation, ServiceError};

use super::{StageOutcome, StageOutput, Storyboard};
use crate::context::JobContext;
use crate::error::StageError;

/// A recommendation adopted for a beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMatch {
    pub beat_id: String,
    pub uri: String,
    pub confidence: f64,
}

/// Storyboard with references resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencedStoryboard {
    pub storyboard: Storyboard,
    pub matches: Vec<ReferenceMatch>,
    /// HEAD beats that will be generated from the prompt alone.
    pub prompt_only: Vec<String>,
}

pub(super) async fn run(ctx: &JobContext, mut storyboard: Storyboard) -> Result<StageOutcome, StageError> {
    let floor = ctx.config.min_reference_confidence;
    let matcher = &ctx.services.asset_matcher;

    let pending: Vec<usize> = storyboard
        .roles
        .iter()
        .enumerate()
        .filter(|(i, role)| **role == ChunkRole::Head && storyboard.beats[*i].reference.is_none())
        .map(|(i, _)| i)
        .collect();

    let lookups = pending.iter().map(|&i| {
        let beat = &storyboard.beats[i];
        async move {
            let found = ctx
                .calls
                .call(&ctx.cancel, "recommend", || matcher.recommend(beat))
                .await
                .map(|found| found.value);
            (i, found)
        }
    });
    let found = join_all(lookups).await;

    let mut matches = Vec::new();
    let mut prompt_only = Vec::new();
    for (i, recommendations) in found {
        let beat = &mut storyboard.beats[i];
        let recommendations = match recommendations {
            Ok(recommendations) => recommendations,
            Err(ServiceError::Cancelled) => return Err(StageError::Cancelled),
            Err(e) => {
                tracing::warn!(beat_id = %beat.id, error = %e, "Asset lookup failed, beat stays prompt-only");
                prompt_only.push(beat.id.clone());
                continue;
            }
        };
        match pick_reference(recommendations, floor) {
            Some(best) => {
                tracing::debug!(
                    beat_id = %beat.id,
                    uri = %best.artifact.uri,
                    confidence = best.confidence,
                    "Reference adopted",
                );
                matches.push(ReferenceMatch {
                    beat_id: beat.id.clone(),
                    uri: best.artifact.uri.clone(),
                    confidence: best.confidence,
                });
                beat.reference = Some(best.artifact);
            }
            None => prompt_only.push(beat.id.clone()),
        }
    }

    tracing::info!(
        looked_up = pending.len(),
        matched = matches.len(),
        prompt_only = prompt_only.len(),
        "References resolved",
    );

    Ok(StageOutcome::free(StageOutput::Referenced(ReferencedStoryboard {
        storyboard,
        matches,
        prompt_only,
    })))
}

/// Highest-confidence still image at or above `floor`.
pub fn pick_reference(recommendations: Vec<AssetRecommendation>, floor: f64) -> Option<AssetRecommendation> {
    recommendations
        .into_iter()
        .filter(|r| r.artifact.kind == ArtifactKind::Image && r.confidence.is_finite() && r.confidence >= floor)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}
