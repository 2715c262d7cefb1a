//! Sequence executor: runs every sequence concurrently and fans results in.
//!
//! Each sequence is its own spawned task. A FOLLOWER is dispatched as soon
//! as its predecessor's continuation frame exists; nothing waits on sibling
//! sequences. When a task fails for good, the rest of its sequence is
//! abandoned and every other sequence carries on. Fan-in restores global
//! order by sorting on chunk index.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use storyreel_core::chunk::{ChunkResult, ChunkStatus, ChunkTask};
use storyreel_core::continuity::{resolve_input, trailing_frame_seek};
use storyreel_core::error::CoreError;
use storyreel_core::generation::{effective_unit, GenerationProfile};
use storyreel_core::services::{GenerationRequest, GenerationService, MediaCompositor, ServiceError};
use storyreel_core::types::{ChunkIndex, SequenceId};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::retry::CallRunner;
use crate::sequence::Sequence;

// ---------------------------------------------------------------------------
// Progress hook
// ---------------------------------------------------------------------------

/// Receives per-chunk events while sequences run.
#[async_trait]
pub trait ChunkProgress: Send + Sync {
    /// A billed generation call succeeded.
    async fn cost_incurred(&self, chunk_index: ChunkIndex, cost: f64);

    /// `result` is done; `done` of `total` chunks have now finished.
    async fn chunk_completed(&self, result: &ChunkResult, done: usize, total: usize);
}

/// [`ChunkProgress`] that ignores every event.
pub struct NoopProgress;

#[async_trait]
impl ChunkProgress for NoopProgress {
    async fn cost_incurred(&self, _chunk_index: ChunkIndex, _cost: f64) {}

    async fn chunk_completed(&self, _result: &ChunkResult, _done: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Final status of one chunk task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkOutcome {
    pub chunk_index: ChunkIndex,
    pub sequence_id: SequenceId,
    pub status: ChunkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fan-in of every sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Successful chunks, sorted by chunk index.
    pub results: Vec<ChunkResult>,
    /// One entry per task, sorted by chunk index.
    pub outcomes: Vec<ChunkOutcome>,
    /// Indices with no result, ascending.
    pub missing: Vec<ChunkIndex>,
}

impl ExecutionReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// One line naming each chunk that failed outright.
    pub fn failure_summary(&self) -> String {
        let failed: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| o.status == ChunkStatus::Failed)
            .map(|o| format!("chunk {}: {}", o.chunk_index, o.error.as_deref().unwrap_or("unknown error")))
            .collect();
        if failed.is_empty() {
            "no chunk failed outright".to_string()
        } else {
            failed.join("; ")
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum TaskFailure {
    #[error(transparent)]
    Input(#[from] CoreError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl TaskFailure {
    fn status(&self) -> ChunkStatus {
        match self {
            TaskFailure::Service(ServiceError::Cancelled) => ChunkStatus::Abandoned,
            _ => ChunkStatus::Failed,
        }
    }
}

struct ExecutorInner {
    generator: Arc<dyn GenerationService>,
    compositor: Arc<dyn MediaCompositor>,
    calls: CallRunner,
    profile: GenerationProfile,
    trailing_frame_offset_secs: f64,
    cancel: CancellationToken,
    progress: Arc<dyn ChunkProgress>,
}

/// Runs the sequences of one chunk-generation stage.
pub struct SequenceExecutor {
    inner: Arc<ExecutorInner>,
}

impl SequenceExecutor {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        compositor: Arc<dyn MediaCompositor>,
        calls: CallRunner,
        profile: GenerationProfile,
        trailing_frame_offset_secs: f64,
        cancel: CancellationToken,
        progress: Arc<dyn ChunkProgress>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                generator,
                compositor,
                calls,
                profile,
                trailing_frame_offset_secs,
                cancel,
                progress,
            }),
        }
    }

    /// Run all `sequences` concurrently and collect their results.
    pub async fn execute(&self, sequences: Vec<Sequence>) -> ExecutionReport {
        let owners: BTreeMap<ChunkIndex, SequenceId> = sequences
            .iter()
            .flat_map(|s| s.tasks.iter().map(move |t| (t.chunk_index, s.id)))
            .collect();
        let expected: BTreeSet<ChunkIndex> = owners.keys().copied().collect();
        let total = expected.len();
        let done = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        for sequence in sequences {
            set.spawn(self.inner.clone().run_sequence(sequence, done.clone(), total));
        }

        let mut results = Vec::with_capacity(total);
        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((sequence_results, sequence_outcomes)) => {
                    results.extend(sequence_results);
                    outcomes.extend(sequence_outcomes);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Sequence task ended abnormally");
                }
            }
        }

        results.sort_by_key(|r: &ChunkResult| r.chunk_index);
        let succeeded: BTreeSet<ChunkIndex> = results.iter().map(|r| r.chunk_index).collect();
        let reported: BTreeSet<ChunkIndex> = outcomes.iter().map(|o: &ChunkOutcome| o.chunk_index).collect();
        for (index, sequence_id) in owners.iter().filter(|(i, _)| !reported.contains(i)) {
            outcomes.push(ChunkOutcome {
                chunk_index: *index,
                sequence_id: *sequence_id,
                status: ChunkStatus::Failed,
                error: Some("sequence task ended abnormally".to_string()),
            });
        }
        outcomes.sort_by_key(|o| o.chunk_index);
        let missing: Vec<ChunkIndex> = expected.difference(&succeeded).copied().collect();

        if missing.is_empty() {
            tracing::info!(chunks = total, "All sequences complete");
        } else {
            tracing::warn!(
                chunks = total,
                missing = ?missing,
                "Sequences finished with missing chunks",
            );
        }

        ExecutionReport {
            results,
            outcomes,
            missing,
        }
    }
}

impl ExecutorInner {
    async fn run_sequence(
        self: Arc<Self>,
        sequence: Sequence,
        done: Arc<AtomicUsize>,
        total: usize,
    ) -> (Vec<ChunkResult>, Vec<ChunkOutcome>) {
        let sequence_id = sequence.id;
        let mut results: Vec<ChunkResult> = Vec::with_capacity(sequence.len());
        let mut outcomes = Vec::with_capacity(sequence.len());
        let mut tasks = sequence.tasks.into_iter();

        while let Some(task) = tasks.next() {
            let failure = if self.cancel.is_cancelled() {
                Some(TaskFailure::Service(ServiceError::Cancelled))
            } else {
                let attempt = self.run_task(&task, sequence_id, results.last()).await;
                match attempt {
                    Ok(result) => {
                        let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                        self.progress.chunk_completed(&result, finished, total).await;
                        outcomes.push(ChunkOutcome {
                            chunk_index: task.chunk_index,
                            sequence_id,
                            status: ChunkStatus::Succeeded,
                            error: None,
                        });
                        results.push(result);
                        None
                    }
                    Err(failure) => Some(failure),
                }
            };

            if let Some(failure) = failure {
                let status = failure.status();
                if status == ChunkStatus::Failed {
                    tracing::warn!(
                        sequence_id,
                        chunk_index = task.chunk_index,
                        error = %failure,
                        "Chunk failed, abandoning rest of sequence",
                    );
                }
                outcomes.push(ChunkOutcome {
                    chunk_index: task.chunk_index,
                    sequence_id,
                    status,
                    error: Some(failure.to_string()),
                });
                outcomes.extend(tasks.by_ref().map(|rest| ChunkOutcome {
                    chunk_index: rest.chunk_index,
                    sequence_id,
                    status: ChunkStatus::Abandoned,
                    error: None,
                }));
                break;
            }
        }

        (results, outcomes)
    }

    /// Generate one chunk and extract its continuation frame.
    async fn run_task(
        &self,
        task: &ChunkTask,
        sequence_id: SequenceId,
        predecessor: Option<&ChunkResult>,
    ) -> Result<ChunkResult, TaskFailure> {
        let input = resolve_input(task, predecessor).map_err(|e| e.with_sequence(sequence_id))?;
        let request = GenerationRequest {
            chunk_index: task.chunk_index,
            prompt: task.prompt.clone(),
            input,
        };

        let dispatched_at = Utc::now();
        tracing::debug!(
            sequence_id,
            chunk_index = task.chunk_index,
            role = ?task.role,
            "Dispatching chunk",
        );

        let generator = &self.generator;
        let profile = &self.profile;
        let generated = self
            .calls
            .call(&self.cancel, "generate", || generator.generate(&request, profile))
            .await?;
        self.progress
            .cost_incurred(task.chunk_index, self.profile.cost_per_call)
            .await;

        let output = generated.value;
        let seek = trailing_frame_seek(&output, effective_unit(&self.profile), self.trailing_frame_offset_secs);
        let compositor = &self.compositor;
        let continuation = self
            .calls
            .call(&self.cancel, "extract_trailing_frame", || {
                compositor.extract_trailing_frame(&output, seek)
            })
            .await?
            .value;

        tracing::debug!(
            sequence_id,
            chunk_index = task.chunk_index,
            attempts = generated.attempts,
            "Chunk complete",
        );

        Ok(ChunkResult {
            chunk_index: task.chunk_index,
            beat_id: task.beat_id.clone(),
            sequence_id,
            role: task.role,
            output,
            continuation,
            attempts: generated.attempts,
            dispatched_at,
            completed_at: Utc::now(),
        })
    }
}
