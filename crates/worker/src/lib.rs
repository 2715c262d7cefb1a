//! Worker process support: configuration, input files and simulated
//! collaborators.

pub mod config;
pub mod simulated;

use std::path::Path;

use serde::Deserialize;
use storyreel_core::error::CoreError;
use storyreel_core::generation::ProfileRegistry;
use storyreel_core::job::{Beat, Job};
use storyreel_core::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid job file {path}: {source}")]
    JobFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Profiles(#[from] CoreError),
}

/// On-disk job description. The id is generated when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub id: Option<JobId>,
    pub target_duration_secs: f64,
    pub generation_model: String,
    pub beats: Vec<Beat>,
}

impl JobFile {
    pub fn into_job(self) -> Job {
        let mut job = Job::new(self.target_duration_secs, self.generation_model, self.beats);
        if let Some(id) = self.id {
            job.id = id;
        }
        job
    }
}

fn read(path: &Path) -> Result<String, WorkerError> {
    std::fs::read_to_string(path).map_err(|source| WorkerError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Parse a job description from a JSON file.
pub fn load_job(path: &Path) -> Result<Job, WorkerError> {
    let raw = read(path)?;
    parse_job(&raw).map_err(|source| WorkerError::JobFile {
        path: path.display().to_string(),
        source,
    })
}

pub fn parse_job(raw: &str) -> Result<Job, serde_json::Error> {
    serde_json::from_str::<JobFile>(raw).map(JobFile::into_job)
}

/// Built-in profiles, merged with the file at `path` when given.
pub fn load_profiles(path: Option<&Path>) -> Result<ProfileRegistry, WorkerError> {
    match path {
        None => Ok(ProfileRegistry::builtin()),
        Some(path) => {
            let registry = ProfileRegistry::builtin_with_json(&read(path)?)?;
            tracing::info!(path = %path.display(), profiles = registry.len(), "Generation profiles loaded");
            Ok(registry)
        }
    }
}
