//! Generation profiles and the duration reconciler.
//!
//! A [`GenerationProfile`] describes what a generation model *actually*
//! returns for one call, which is not necessarily what the caller asked
//! for. [`plan_chunks`] turns a target duration into a chunk plan using the
//! delivered output length, never the requested one, unless the model is
//! known to honour the request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fraction of the effective unit reserved for cross-fade overlap at stitch time.
pub const OVERLAP_FRACTION: f64 = 0.25;

/// Hard ceiling on chunks per job to prevent runaway plans.
pub const MAX_CHUNKS_PER_JOB: u32 = 500;

/// Tolerance absorbing float noise when dividing target by unit.
///
/// Without it `ceil(10.000000001 / 5.0)` would plan a useless third chunk.
const CEIL_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// What one call to a generation model produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationProfile {
    /// Duration the caller asks for, in seconds.
    pub requested_duration: f64,
    /// Duration the model actually returns, in seconds.
    pub actual_output_duration: f64,
    /// Whether the model honours `requested_duration` (up to its maximum).
    pub controllable: bool,
    /// Billed cost of one successful call.
    pub cost_per_call: f64,
}

impl GenerationProfile {
    fn validate(&self, model: &str) -> Result<(), CoreError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.actual_output_duration) {
            return Err(CoreError::validation(format!(
                "profile '{model}': actual_output_duration must be positive, got {}",
                self.actual_output_duration
            )));
        }
        if !positive(self.requested_duration) {
            return Err(CoreError::validation(format!(
                "profile '{model}': requested_duration must be positive, got {}",
                self.requested_duration
            )));
        }
        if !self.cost_per_call.is_finite() || self.cost_per_call < 0.0 {
            return Err(CoreError::validation(format!(
                "profile '{model}': cost_per_call must be non-negative, got {}",
                self.cost_per_call
            )));
        }
        Ok(())
    }
}

/// Profiles keyed by generation-model identifier.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, GenerationProfile>,
}

impl ProfileRegistry {
    /// Registry pre-populated with the built-in profiles.
    ///
    /// - `fixed-5s`: always returns 5 s regardless of the request.
    /// - `variable-10s`: honours requests up to 10 s.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.profiles.insert(
            "fixed-5s".to_string(),
            GenerationProfile {
                requested_duration: 5.0,
                actual_output_duration: 5.0,
                controllable: false,
                cost_per_call: 0.40,
            },
        );
        registry.profiles.insert(
            "variable-10s".to_string(),
            GenerationProfile {
                requested_duration: 8.0,
                actual_output_duration: 10.0,
                controllable: true,
                cost_per_call: 0.75,
            },
        );
        registry
    }

    /// Parse a JSON object of `{ "<model>": { ...profile } }` and merge it
    /// over the built-ins.
    pub fn builtin_with_json(json: &str) -> Result<Self, CoreError> {
        let extra: HashMap<String, GenerationProfile> = serde_json::from_str(json)
            .map_err(|e| CoreError::validation(format!("invalid profile file: {e}")))?;
        let mut registry = Self::builtin();
        for (model, profile) in extra {
            registry.insert(model, profile)?;
        }
        Ok(registry)
    }

    /// Register or replace a profile after validating it.
    pub fn insert(&mut self, model: impl Into<String>, profile: GenerationProfile) -> Result<(), CoreError> {
        let model = model.into();
        profile.validate(&model)?;
        self.profiles.insert(model, profile);
        Ok(())
    }

    pub fn get(&self, model: &str) -> Result<&GenerationProfile, CoreError> {
        self.profiles
            .get(model)
            .ok_or_else(|| CoreError::UnknownProfile(model.to_string()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Result of reconciling a target duration with a profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub target_duration: f64,
    /// Seconds of video one generation call contributes.
    pub effective_unit: f64,
    pub chunk_count: u32,
    /// Maximum cross-fade overlap per boundary. Stitch-time only.
    pub overlap: f64,
}

impl ChunkPlan {
    /// Start offset of chunk `index` on the target timeline.
    pub fn chunk_start(&self, index: u32) -> f64 {
        f64::from(index) * self.effective_unit
    }

    /// Total generated length before any stitching trims.
    pub fn raw_duration(&self) -> f64 {
        f64::from(self.chunk_count) * self.effective_unit
    }

    /// Excess of the final chunk that must be trimmed at stitch time.
    pub fn final_chunk_excess(&self) -> f64 {
        (self.raw_duration() - self.target_duration).max(0.0)
    }
}

/// Seconds one call contributes under `profile`.
///
/// Uncontrollable models always deliver their fixed output length. A
/// controllable model delivers what was requested, capped at its maximum.
pub fn effective_unit(profile: &GenerationProfile) -> f64 {
    if profile.controllable {
        profile.requested_duration.min(profile.actual_output_duration)
    } else {
        profile.actual_output_duration
    }
}

/// Build the chunk plan for `target_duration` under `profile`.
pub fn plan_chunks(target_duration: f64, profile: &GenerationProfile) -> Result<ChunkPlan, CoreError> {
    if !target_duration.is_finite() || target_duration <= 0.0 {
        return Err(CoreError::validation(format!(
            "target_duration must be positive, got {target_duration}"
        )));
    }
    let unit = effective_unit(profile);
    if !unit.is_finite() || unit <= 0.0 {
        return Err(CoreError::validation(format!(
            "effective unit duration must be positive, got {unit}"
        )));
    }

    let raw = (target_duration / unit - CEIL_EPSILON).ceil().max(1.0);
    if raw > f64::from(MAX_CHUNKS_PER_JOB) {
        return Err(CoreError::validation(format!(
            "target {target_duration}s needs {raw} chunks of {unit}s, above the limit of {MAX_CHUNKS_PER_JOB}"
        )));
    }
    let chunk_count = raw as u32;

    let plan = ChunkPlan {
        target_duration,
        effective_unit: unit,
        chunk_count,
        overlap: unit * OVERLAP_FRACTION,
    };

    tracing::info!(
        target_duration,
        requested_duration = profile.requested_duration,
        actual_output_duration = profile.actual_output_duration,
        controllable = profile.controllable,
        effective_unit = unit,
        chunk_count,
        overlap = plan.overlap,
        "Duration reconciled",
    );

    Ok(plan)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
