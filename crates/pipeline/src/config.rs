//! Pipeline configuration loaded from environment variables.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use storyreel_core::continuity::DEFAULT_TRAILING_FRAME_OFFSET_SECS;
use storyreel_core::job::{Stage, MAX_PROGRESS};
use storyreel_core::stitching::DEFAULT_DURATION_TOLERANCE_SECS;
use storyreel_events::DEFAULT_FAST_TTL;

/// Unparsable or out-of-range configuration value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid value for {var}: '{value}' ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    fn new(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            var,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for external calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress milestones
// ---------------------------------------------------------------------------

/// Progress recorded when each stage finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressMilestones(BTreeMap<Stage, u8>);

impl Default for ProgressMilestones {
    fn default() -> Self {
        Self(BTreeMap::from([
            (Stage::Plan, 5),
            (Stage::Storyboard, 15),
            (Stage::Reference, 25),
            (Stage::ChunkGeneration, 85),
            (Stage::Stitch, 95),
            (Stage::Refine, MAX_PROGRESS),
        ]))
    }
}

impl ProgressMilestones {
    /// Progress at the exit of `stage`.
    pub fn exit(&self, stage: Stage) -> u8 {
        self.0.get(&stage).copied().unwrap_or(0)
    }

    /// Progress at the entry of `stage`: the previous stage's exit.
    pub fn entry(&self, stage: Stage) -> u8 {
        stage.previous().map_or(0, |prev| self.exit(prev))
    }
}

impl FromStr for ProgressMilestones {
    type Err = String;

    /// Parse `stage=percent` pairs separated by commas. Stages left out keep
    /// their default; the result must not decrease from stage to stage.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut milestones = Self::default();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (stage, percent) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected stage=percent, got '{pair}'"))?;
            let stage: Stage = stage.trim().parse().map_err(|e| format!("{e}"))?;
            let percent: u8 = percent
                .trim()
                .parse()
                .map_err(|_| format!("'{percent}' is not a percentage"))?;
            if percent > MAX_PROGRESS {
                return Err(format!("{stage} milestone {percent} exceeds {MAX_PROGRESS}"));
            }
            milestones.0.insert(stage, percent);
        }

        let values: Vec<u8> = Stage::ALL.iter().map(|s| milestones.exit(*s)).collect();
        if values.windows(2).any(|w| w[0] > w[1]) {
            return Err("milestones must not decrease from one stage to the next".to_string());
        }
        Ok(milestones)
    }
}

// ---------------------------------------------------------------------------
// Pipeline config
// ---------------------------------------------------------------------------

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Permits in the bounded worker pool, i.e. concurrent external calls.
    pub concurrency: usize,
    /// Budget of a single external call attempt.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    /// Lifetime of fast ledger entries.
    pub fast_store_ttl: Duration,
    pub milestones: ProgressMilestones,
    /// Seek-back before the nominal end of a clip when grabbing its trailing frame.
    pub trailing_frame_offset_secs: f64,
    /// Allowed error between assembled and target duration.
    pub duration_tolerance_secs: f64,
    /// Asset-matcher recommendations below this confidence are ignored.
    pub min_reference_confidence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            call_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            fast_store_ttl: DEFAULT_FAST_TTL,
            milestones: ProgressMilestones::default(),
            trailing_frame_offset_secs: DEFAULT_TRAILING_FRAME_OFFSET_SECS,
            duration_tolerance_secs: DEFAULT_DURATION_TOLERANCE_SECS,
            min_reference_confidence: 0.6,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                            |
    /// |----------------------------|------------------------------------|
    /// | `WORKER_CONCURRENCY`       | `8`                                |
    /// | `CALL_TIMEOUT_SECS`        | `300`                              |
    /// | `RETRY_MAX_ATTEMPTS`       | `3`                                |
    /// | `RETRY_INITIAL_DELAY_MS`   | `500`                              |
    /// | `RETRY_MAX_DELAY_MS`       | `30000`                            |
    /// | `RETRY_MULTIPLIER`         | `2.0`                              |
    /// | `FAST_STORE_TTL_SECS`      | `86400`                            |
    /// | `PROGRESS_MILESTONES`      | `plan=5,storyboard=15,reference=25,chunk_generation=85,stitch=95,refine=100` |
    /// | `TRAILING_FRAME_OFFSET_MS` | `100`                              |
    /// | `DURATION_TOLERANCE_SECS`  | `0.5`                              |
    /// | `MIN_REFERENCE_CONFIDENCE` | `0.6`                              |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let concurrency: usize = vars.parse("WORKER_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            return Err(ConfigError::new("WORKER_CONCURRENCY", "0", "must be at least 1"));
        }

        let max_attempts: u32 = vars.parse("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::new("RETRY_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        let multiplier: f64 = vars.parse("RETRY_MULTIPLIER", defaults.retry.multiplier)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::new(
                "RETRY_MULTIPLIER",
                multiplier.to_string(),
                "must be a finite number >= 1",
            ));
        }
        let retry = RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(vars.parse("RETRY_INITIAL_DELAY_MS", 500u64)?),
            max_delay: Duration::from_millis(vars.parse("RETRY_MAX_DELAY_MS", 30_000u64)?),
            multiplier,
        };

        let milestones = match lookup("PROGRESS_MILESTONES") {
            Some(raw) => raw
                .parse()
                .map_err(|reason: String| ConfigError::new("PROGRESS_MILESTONES", raw.clone(), reason))?,
            None => defaults.milestones,
        };

        let tolerance: f64 = vars.parse("DURATION_TOLERANCE_SECS", defaults.duration_tolerance_secs)?;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::new(
                "DURATION_TOLERANCE_SECS",
                tolerance.to_string(),
                "must be non-negative",
            ));
        }
        let min_confidence: f64 = vars.parse("MIN_REFERENCE_CONFIDENCE", defaults.min_reference_confidence)?;
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::new(
                "MIN_REFERENCE_CONFIDENCE",
                min_confidence.to_string(),
                "must be within 0..=1",
            ));
        }

        Ok(Self {
            concurrency,
            call_timeout: Duration::from_secs(vars.parse("CALL_TIMEOUT_SECS", 300u64)?),
            retry,
            fast_store_ttl: Duration::from_secs(vars.parse("FAST_STORE_TTL_SECS", defaults.fast_store_ttl.as_secs())?),
            milestones,
            trailing_frame_offset_secs: vars.parse::<u64>("TRAILING_FRAME_OFFSET_MS", 100)? as f64 / 1000.0,
            duration_tolerance_secs: tolerance,
            min_reference_confidence: min_confidence,
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn parse<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match (self.0)(var) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::new(var, raw.clone(), "not a valid number")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
