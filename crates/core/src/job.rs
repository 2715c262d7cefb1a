//! Job, beat and job-state model shared by the scheduler and the ledger.
//!
//! [`JobState`] is the single record the ledger stores in both tiers.
//! Every mutation goes through a fixed [`JobStateUpdate`] record; there is no
//! free-form "extra fields" channel.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::error::CoreError;
use crate::types::{ChunkIndex, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Beats
// ---------------------------------------------------------------------------

/// How a beat relates to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotTransition {
    /// Hard cut: the beat opens a new take.
    #[default]
    Cut,
    /// The beat continues the previous take visually.
    Continue,
}

/// Camera/shot description attached to a beat.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShotDescriptor {
    /// Free-form framing, e.g. `"wide establishing"` or `"close-up"`.
    #[serde(default)]
    pub framing: String,
    #[serde(default)]
    pub transition: ShotTransition,
}

/// One narrative unit of the target video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    pub id: String,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub shot: ShotDescriptor,
    pub prompt: String,
    /// Externally supplied conditioning image, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Artifact>,
}

impl Beat {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A submitted generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub target_duration_secs: f64,
    /// Identifier used to look up the [`GenerationProfile`](crate::generation::GenerationProfile).
    pub generation_model: String,
    pub beats: Vec<Beat>,
}

impl Job {
    /// Create a job with a fresh time-ordered id.
    pub fn new(target_duration_secs: f64, generation_model: impl Into<String>, beats: Vec<Beat>) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            target_duration_secs,
            generation_model: generation_model.into(),
            beats,
        }
    }

    /// Sum of all beat durations.
    pub fn beats_total_duration(&self) -> f64 {
        self.beats.iter().map(|b| b.duration).sum()
    }
}

/// Cheap structural checks performed synchronously at submission time.
///
/// Deeper beat-plan validation happens in the Plan stage.
pub fn validate_job(job: &Job) -> Result<(), CoreError> {
    if !job.target_duration_secs.is_finite() || job.target_duration_secs <= 0.0 {
        return Err(CoreError::validation(format!(
            "target_duration must be a positive number, got {}",
            job.target_duration_secs
        )));
    }
    if job.beats.is_empty() {
        return Err(CoreError::validation("job must contain at least one beat"));
    }
    if job.generation_model.trim().is_empty() {
        return Err(CoreError::validation("generation_model must not be empty"));
    }
    for beat in &job.beats {
        if beat.id.trim().is_empty() {
            return Err(CoreError::validation("beat id must not be empty"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// The fixed pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Storyboard,
    Reference,
    ChunkGeneration,
    Stitch,
    Refine,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Plan,
        Stage::Storyboard,
        Stage::Reference,
        Stage::ChunkGeneration,
        Stage::Stitch,
        Stage::Refine,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Storyboard => "storyboard",
            Stage::Reference => "reference",
            Stage::ChunkGeneration => "chunk_generation",
            Stage::Stitch => "stitch",
            Stage::Refine => "refine",
        }
    }

    /// The stage that runs before this one, if any.
    pub fn previous(self) -> Option<Stage> {
        let pos = Self::ALL.iter().position(|s| *s == self)?;
        pos.checked_sub(1).map(|p| Self::ALL[p])
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| CoreError::validation(format!("Unknown stage '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
///
/// Serialized as `queued`, `running:<stage>`, `complete` or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum JobStatus {
    Queued,
    Running(Stage),
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => f.write_str("queued"),
            JobStatus::Running(stage) => write!(f, "running:{stage}"),
            JobStatus::Complete => f.write_str("complete"),
            JobStatus::Failed => f.write_str("failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => match other.strip_prefix("running:") {
                Some(stage) => Ok(JobStatus::Running(stage.parse()?)),
                None => Err(CoreError::validation(format!("Unknown job status '{other}'"))),
            },
        }
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for JobStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Errors reported on the job
// ---------------------------------------------------------------------------

/// Coarse failure class, used to tell user-fixable issues from outages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Service,
    PartialChain,
    Cancelled,
    Internal,
}

/// Failure detail persisted with a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub phase: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_chunks: Vec<ChunkIndex>,
    /// Chunks that did finish, kept for diagnostics only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_chunks: Vec<ChunkIndex>,
}

// ---------------------------------------------------------------------------
// State and updates
// ---------------------------------------------------------------------------

/// Upper bound of the progress scale.
pub const MAX_PROGRESS: u8 = 100;

/// Snapshot of a job as seen by readers and subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub current_phase: Option<Stage>,
    pub cost: f64,
    #[serde(default)]
    pub phase_outputs: BTreeMap<Stage, serde_json::Value>,
    pub error: Option<JobError>,
    pub updated_at: Timestamp,
}

impl JobState {
    /// State written at creation: queued, no progress, no cost.
    pub fn initial(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            progress: 0,
            current_phase: None,
            cost: 0.0,
            phase_outputs: BTreeMap::new(),
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Fold an update into this state.
    ///
    /// Progress and cost only move forward; a negative cost delta is ignored.
    pub fn apply(&mut self, update: &JobStateUpdate) {
        self.status = update.status;
        self.progress = self.progress.max(update.progress.min(MAX_PROGRESS));
        if update.current_phase.is_some() {
            self.current_phase = update.current_phase;
        }
        if let (Some(phase), Some(output)) = (update.current_phase, &update.phase_output) {
            self.phase_outputs.insert(phase, output.clone());
        }
        if update.cost_delta > 0.0 {
            self.cost += update.cost_delta;
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// The only shape in which job state is mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStateUpdate {
    pub status: JobStatus,
    pub progress: u8,
    pub current_phase: Option<Stage>,
    pub phase_output: Option<serde_json::Value>,
    pub cost_delta: f64,
    pub error: Option<JobError>,
}

impl JobStateUpdate {
    /// A running-status update for `stage` at `progress`.
    pub fn running(stage: Stage, progress: u8) -> Self {
        Self {
            status: JobStatus::Running(stage),
            progress,
            current_phase: Some(stage),
            phase_output: None,
            cost_delta: 0.0,
            error: None,
        }
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.phase_output = Some(output);
        self
    }

    pub fn with_cost(mut self, cost_delta: f64) -> Self {
        self.cost_delta = cost_delta;
        self
    }

    /// Terminal success in `stage`.
    pub fn complete(stage: Stage) -> Self {
        Self {
            status: JobStatus::Complete,
            progress: MAX_PROGRESS,
            current_phase: Some(stage),
            phase_output: None,
            cost_delta: 0.0,
            error: None,
        }
    }

    /// Terminal failure; progress is left where it was.
    pub fn failed(error: JobError) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: 0,
            current_phase: Some(error.phase),
            phase_output: None,
            cost_delta: 0.0,
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Client status view
// ---------------------------------------------------------------------------

/// Minimal status surface exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub current_phase: Option<Stage>,
    pub error: Option<JobError>,
}

impl From<&JobState> for JobStatusView {
    fn from(state: &JobState) -> Self {
        Self {
            job_id: state.job_id,
            status: state.status,
            progress: state.progress,
            current_phase: state.current_phase,
            error: state.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
