//! Job pipeline: stages, sequence execution and the orchestrator.

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod sequence;
pub mod stages;

pub use config::{ConfigError, PipelineConfig, ProgressMilestones, RetryPolicy};
pub use context::{JobContext, Services};
pub use error::{PipelineError, StageError};
pub use executor::{ChunkProgress, ExecutionReport, NoopProgress, SequenceExecutor};
pub use scheduler::{Orchestrator, RunHandle};
