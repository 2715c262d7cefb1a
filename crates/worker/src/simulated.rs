//! Simulated collaborators for dry runs without real model or media services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storyreel_core::artifact::Artifact;
use storyreel_core::generation::{effective_unit, GenerationProfile};
use storyreel_core::job::Beat;
use storyreel_core::services::{
    AssetMatcher, AssetRecommendation, GenerationRequest, GenerationService, MediaCompositor, RefinedVideo, Refiner,
    ServiceError,
};
use storyreel_core::stitching::StitchPlan;
use storyreel_pipeline::Services;

/// Refinement cost per second of video.
const REFINE_COST_PER_SEC: f64 = 0.01;

/// Confidence the simulated asset library reports for every beat.
const LIBRARY_CONFIDENCE: f64 = 0.75;

/// All four collaborators, each sleeping `latency` per call.
pub fn services(latency: Duration) -> Services {
    Services {
        generator: Arc::new(SimulatedGenerator { latency }),
        compositor: Arc::new(SimulatedCompositor { latency }),
        asset_matcher: Arc::new(SimulatedAssetMatcher { latency }),
        refiner: Arc::new(SimulatedRefiner { latency }),
    }
}

pub struct SimulatedGenerator {
    latency: Duration,
}

#[async_trait]
impl GenerationService for SimulatedGenerator {
    async fn generate(&self, request: &GenerationRequest, profile: &GenerationProfile) -> Result<Artifact, ServiceError> {
        tokio::time::sleep(self.latency).await;
        Ok(Artifact::video(
            format!("sim://chunks/{}.mp4", request.chunk_index),
            effective_unit(profile),
        ))
    }
}

pub struct SimulatedCompositor {
    latency: Duration,
}

#[async_trait]
impl MediaCompositor for SimulatedCompositor {
    async fn extract_trailing_frame(&self, video: &Artifact, at_secs: f64) -> Result<Artifact, ServiceError> {
        tokio::time::sleep(self.latency / 4).await;
        Ok(Artifact::image(format!("{}@{at_secs:.3}.png", video.uri)))
    }

    async fn concatenate_with_transitions(&self, plan: &StitchPlan) -> Result<Artifact, ServiceError> {
        tokio::time::sleep(self.latency).await;
        Ok(Artifact::video("sim://assembled.mp4", plan.expected_duration))
    }
}

/// Offers one library image per beat.
pub struct SimulatedAssetMatcher {
    latency: Duration,
}

#[async_trait]
impl AssetMatcher for SimulatedAssetMatcher {
    async fn recommend(&self, beat: &Beat) -> Result<Vec<AssetRecommendation>, ServiceError> {
        tokio::time::sleep(self.latency / 4).await;
        Ok(vec![AssetRecommendation {
            artifact: Artifact::image(format!("sim://library/{}.png", beat.id)),
            confidence: LIBRARY_CONFIDENCE,
        }])
    }
}

pub struct SimulatedRefiner {
    latency: Duration,
}

#[async_trait]
impl Refiner for SimulatedRefiner {
    async fn refine(&self, video: &Artifact) -> Result<RefinedVideo, ServiceError> {
        tokio::time::sleep(self.latency).await;
        let duration = video.duration_secs.unwrap_or(0.0);
        Ok(RefinedVideo {
            video: Artifact::video("sim://final.mp4", duration),
            cost: duration * REFINE_COST_PER_SEC,
        })
    }
}

#[cfg(test)]
mod tests {
    use storyreel_core::continuity::GenerationInput;
    use storyreel_core::generation::ProfileRegistry;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn generator_honours_profile_output_length() {
        let registry = ProfileRegistry::builtin();
        let profile = registry.get("variable-10s").unwrap();
        let request = GenerationRequest {
            chunk_index: 3,
            prompt: "harbour at dawn".to_string(),
            input: GenerationInput::PromptOnly,
        };
        let clip = SimulatedGenerator { latency: Duration::from_millis(10) }
            .generate(&request, profile)
            .await
            .unwrap();
        assert_eq!(clip.duration_secs, Some(8.0));
        assert_eq!(clip.uri, "sim://chunks/3.mp4");
    }

    #[tokio::test(start_paused = true)]
    async fn refiner_cost_scales_with_duration() {
        let refined = SimulatedRefiner { latency: Duration::ZERO }
            .refine(&Artifact::video("sim://assembled.mp4", 20.0))
            .await
            .unwrap();
        assert!((refined.cost - 0.2).abs() < 1e-12);
    }
}
