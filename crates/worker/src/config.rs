use std::path::PathBuf;
use std::time::Duration;

use storyreel_pipeline::{ConfigError, PipelineConfig};

/// Log output format for the worker binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub pipeline: PipelineConfig,
    /// Postgres durable store when set, in-memory store otherwise.
    pub database_url: Option<String>,
    /// JSON file of extra generation profiles.
    pub profiles_path: Option<PathBuf>,
    /// Job to submit when none is given on the command line.
    pub job_file: Option<PathBuf>,
    pub log_format: LogFormat,
    /// Latency of each simulated external call.
    pub simulated_latency: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Pipeline settings come from [`PipelineConfig::from_env`]. In addition:
    ///
    /// | Env Var                    | Default  |
    /// |----------------------------|----------|
    /// | `DATABASE_URL`             | unset    |
    /// | `GENERATION_PROFILES_PATH` | unset    |
    /// | `JOB_FILE`                 | unset    |
    /// | `LOG_FORMAT`               | `pretty` |
    /// | `SIMULATED_LATENCY_MS`     | `200`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected 'pretty' or 'json'".to_string(),
                })
            }
        };

        let simulated_latency = match var("SIMULATED_LATENCY_MS") {
            None => Duration::from_millis(200),
            Some(raw) => raw.parse().map(Duration::from_millis).map_err(|_| ConfigError {
                var: "SIMULATED_LATENCY_MS",
                value: raw.clone(),
                reason: "not a valid number".to_string(),
            })?,
        };

        Ok(Self {
            pipeline: PipelineConfig::from_env()?,
            database_url: var("DATABASE_URL"),
            profiles_path: var("GENERATION_PROFILES_PATH").map(PathBuf::from),
            job_file: var("JOB_FILE").map(PathBuf::from),
            log_format,
            simulated_latency,
        })
    }
}
