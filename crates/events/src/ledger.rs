//! Two-tier progress and cost ledger.
//!
//! Every [`ProgressLedger::record`] goes to the fast store. The durable
//! store sees exactly two writes per job: [`ProgressLedger::create`] and
//! the terminal record. Reads try the fast store first and fall back to the
//! durable store on a miss or outage, so a read never fails just because
//! the cache is gone.
//!
//! Fast-store layout per job:
//!
//! | Key / channel         | Content                                   |
//! |-----------------------|-------------------------------------------|
//! | `job:<id>:state`      | one field per [`JobState`] member          |
//! | `job:<id>:updates`    | JSON [`JobState`] snapshot after each write |
//!
//! The ledger also keeps an in-process tally of each live job's cost and
//! phase outputs. It re-seeds a fast entry that was evicted mid-run and
//! backs the terminal record when the fast store is gone, so billed cost
//! survives both.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::ready;
use futures::stream::{self, BoxStream, StreamExt};
use storyreel_core::job::{Job, JobState, JobStateUpdate, JobStatus, Stage, MAX_PROGRESS};
use storyreel_core::types::{JobId, Timestamp};
use storyreel_db::{DurableStore, DurableStoreError};

use crate::fast_store::{FastStore, FastStoreError, Fields};

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

const FIELD_JOB_ID: &str = "job_id";
const FIELD_STATUS: &str = "status";
const FIELD_PROGRESS: &str = "progress";
const FIELD_PHASE: &str = "current_phase";
const FIELD_COST: &str = "cost";
const FIELD_ERROR: &str = "error";
const FIELD_UPDATED_AT: &str = "updated_at";
const PHASE_OUTPUT_PREFIX: &str = "phase_output:";

/// Default lifetime of fast-store entries.
pub const DEFAULT_FAST_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn state_key(job_id: JobId) -> String {
    format!("job:{job_id}:state")
}

fn updates_channel(job_id: JobId) -> String {
    format!("job:{job_id}:updates")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Ledger failures that callers must handle.
///
/// Fast-store trouble is never surfaced here; it is logged and the durable
/// tier takes over.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Durable(#[from] DurableStoreError),
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Running totals of one live job, independent of either store.
#[derive(Debug, Clone, Default, PartialEq)]
struct Tally {
    cost: f64,
    phase_outputs: BTreeMap<Stage, serde_json::Value>,
}

impl Tally {
    fn apply(&mut self, update: &JobStateUpdate) {
        if update.cost_delta > 0.0 {
            self.cost += update.cost_delta;
        }
        if let (Some(phase), Some(output)) = (update.current_phase, &update.phase_output) {
            self.phase_outputs.insert(phase, output.clone());
        }
    }

    /// Raise `state` to at least this tally: the larger cost wins and
    /// missing phase outputs are filled in.
    fn fill(&self, state: &mut JobState) {
        if self.cost > state.cost {
            state.cost = self.cost;
        }
        for (phase, output) in &self.phase_outputs {
            state.phase_outputs.entry(*phase).or_insert_with(|| output.clone());
        }
    }
}

/// Job state store shared by the scheduler and every in-flight task.
#[derive(Clone)]
pub struct ProgressLedger {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
    ttl: Duration,
    tallies: Arc<Mutex<HashMap<JobId, Tally>>>,
}

impl ProgressLedger {
    pub fn new(fast: Arc<dyn FastStore>, durable: Arc<dyn DurableStore>, ttl: Duration) -> Self {
        Self {
            fast,
            durable,
            ttl,
            tallies: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_tallies(&self) -> MutexGuard<'_, HashMap<JobId, Tally>> {
        self.tallies.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold `update` into the job's tally and return the tally as it stood
    /// before. `None` for jobs this ledger did not create or already closed.
    fn accumulate(&self, job_id: JobId, update: &JobStateUpdate) -> Option<Tally> {
        let mut tallies = self.lock_tallies();
        let tally = tallies.get_mut(&job_id)?;
        let prior = tally.clone();
        tally.apply(update);
        Some(prior)
    }

    /// Persist a new job (durable write #1) and seed the fast store.
    pub async fn create(&self, job: &Job) -> Result<JobState, LedgerError> {
        let state = JobState::initial(job.id);
        self.durable.create(job, &state).await?;
        self.lock_tallies().insert(job.id, Tally::default());

        if let Err(e) = self
            .fast
            .set_fields(&state_key(job.id), encode_state(&state), self.ttl)
            .await
        {
            tracing::warn!(job_id = %job.id, error = %e, "Fast store write failed at creation");
        }
        self.publish(&state).await;

        tracing::info!(job_id = %job.id, "Job created");
        Ok(state)
    }

    /// Apply one update.
    ///
    /// Non-terminal updates touch only the fast store; failures there are
    /// logged and swallowed. A terminal update is also written durably
    /// (durable write #2); repeating it is harmless.
    pub async fn record(&self, job_id: JobId, update: JobStateUpdate) -> Result<(), LedgerError> {
        let prior = self.accumulate(job_id, &update);
        if update.status.is_terminal() {
            return self.record_terminal(job_id, update, prior).await;
        }

        match self.write_fast(job_id, &update, prior.as_ref()).await {
            Ok(Some(state)) => self.publish(&state).await,
            Ok(None) => {
                tracing::debug!(
                    job_id = %job_id,
                    status = %update.status,
                    "Update after terminal state ignored",
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Fast store update dropped");
            }
        }
        Ok(())
    }

    async fn record_terminal(
        &self,
        job_id: JobId,
        update: JobStateUpdate,
        prior: Option<Tally>,
    ) -> Result<(), LedgerError> {
        let mut final_tally = prior.clone().map(|mut tally| {
            tally.apply(&update);
            tally
        });
        let mut state = match self.write_fast(job_id, &update, prior.as_ref()).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::debug!(job_id = %job_id, "Job already terminal in fast store");
                final_tally = None;
                self.read(job_id).await?
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Fast store unavailable for terminal write, building state from durable record",
                );
                let mut state = self.durable.read(job_id).await?;
                state.apply(&update);
                state
            }
        };
        if let Some(tally) = &final_tally {
            tally.fill(&mut state);
            if let Err(e) = self
                .fast
                .set_fields(&state_key(job_id), encode_state(&state), self.ttl)
                .await
            {
                tracing::debug!(job_id = %job_id, error = %e, "Terminal state not mirrored to fast store");
            }
        }

        let written = self.durable.write_terminal(job_id, &state).await?;
        self.lock_tallies().remove(&job_id);
        if written {
            tracing::info!(
                job_id = %job_id,
                status = %state.status,
                progress = state.progress,
                cost = state.cost,
                "Terminal state recorded",
            );
        } else {
            tracing::debug!(job_id = %job_id, "Duplicate terminal write ignored");
        }
        self.publish(&state).await;
        Ok(())
    }

    /// Current state of a job: fast store first, durable store on miss.
    pub async fn read(&self, job_id: JobId) -> Result<JobState, LedgerError> {
        match self.fast.get_fields(&state_key(job_id)).await {
            Ok(Some(fields)) => match decode_state(&fields) {
                Ok(state) => return Ok(state),
                Err(reason) => {
                    tracing::warn!(job_id = %job_id, %reason, "Undecodable fast store entry");
                }
            },
            Ok(None) => {
                tracing::debug!(job_id = %job_id, "Fast store miss, reading durable store");
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Fast store unreachable, reading durable store");
            }
        }
        Ok(self.durable.read(job_id).await?)
    }

    /// Stream of job states, starting with the current one and ending after
    /// the first terminal state.
    ///
    /// When the fast store cannot be subscribed to, the stream degrades to a
    /// single snapshot and the caller is expected to poll [`read`](Self::read).
    pub async fn subscribe(&self, job_id: JobId) -> Result<BoxStream<'static, JobState>, LedgerError> {
        // Subscribe before reading so no update between the two is lost.
        let updates = match self.fast.subscribe(&updates_channel(job_id)).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Push updates unavailable");
                None
            }
        };
        let current = self.read(job_id).await?;

        let updates = match updates {
            Some(updates) if !current.status.is_terminal() => updates,
            _ => return Ok(stream::once(ready(current)).boxed()),
        };

        let snapshots = stream::once(ready(current)).chain(updates.filter_map(move |message| {
            ready(
                serde_json::from_str::<JobState>(&message)
                    .ok()
                    .filter(|state| state.job_id == job_id),
            )
        }));

        Ok(until_terminal(snapshots.boxed()))
    }

    /// Write the update's fields to the fast store and return the merged state.
    ///
    /// Returns `Ok(None)` without writing when a terminal state is already
    /// stored, so late reports cannot resurrect a finished job. A missing
    /// entry is re-seeded from `prior` before the update is applied.
    async fn write_fast(
        &self,
        job_id: JobId,
        update: &JobStateUpdate,
        prior: Option<&Tally>,
    ) -> Result<Option<JobState>, FastStoreError> {
        let key = state_key(job_id);
        let existing = self.fast.get_fields(&key).await?;
        if let Some(existing) = &existing {
            let terminal = existing
                .get(FIELD_STATUS)
                .and_then(|s| s.parse::<JobStatus>().ok())
                .is_some_and(JobStatus::is_terminal);
            if terminal {
                return Ok(None);
            }
        }

        let mut fields = vec![
            (FIELD_JOB_ID.to_string(), job_id.to_string()),
            (FIELD_STATUS.to_string(), update.status.to_string()),
            (FIELD_UPDATED_AT.to_string(), Utc::now().to_rfc3339()),
        ];
        if let (None, Some(prior)) = (&existing, prior) {
            tracing::warn!(job_id = %job_id, cost = prior.cost, "Fast store entry lost, re-seeding from tally");
            fields.push((FIELD_COST.to_string(), prior.cost.to_string()));
            for (phase, output) in &prior.phase_outputs {
                fields.push((format!("{PHASE_OUTPUT_PREFIX}{phase}"), output.to_string()));
            }
        }
        if let Some(phase) = update.current_phase {
            fields.push((FIELD_PHASE.to_string(), phase.to_string()));
            if let Some(output) = &update.phase_output {
                fields.push((format!("{PHASE_OUTPUT_PREFIX}{phase}"), output.to_string()));
            }
        }
        if let Some(error) = &update.error {
            fields.push((FIELD_ERROR.to_string(), json_string(error)));
        }
        self.fast.set_fields(&key, fields, self.ttl).await?;

        let progress = i64::from(update.progress.min(MAX_PROGRESS));
        self.fast.max_int(&key, FIELD_PROGRESS, progress, self.ttl).await?;
        if update.cost_delta > 0.0 {
            self.fast
                .incr_float(&key, FIELD_COST, update.cost_delta, self.ttl)
                .await?;
        }

        let fields = self
            .fast
            .get_fields(&key)
            .await?
            .ok_or_else(|| FastStoreError::Unavailable(format!("{key} vanished during update")))?;
        decode_state(&fields)
            .map(Some)
            .map_err(|reason| FastStoreError::Unavailable(format!("{key}: {reason}")))
    }

    async fn publish(&self, state: &JobState) {
        let message = json_string(state);
        if let Err(e) = self.fast.publish(&updates_channel(state.job_id), message).await {
            tracing::debug!(job_id = %state.job_id, error = %e, "Snapshot not published");
        }
    }
}

/// End `snapshots` right after the first terminal state, dropping any
/// snapshot older than one already yielded.
fn until_terminal(snapshots: BoxStream<'static, JobState>) -> BoxStream<'static, JobState> {
    stream::unfold(
        (snapshots, None::<Timestamp>, false),
        |(mut snapshots, last_seen, finished)| async move {
            if finished {
                return None;
            }
            loop {
                let state = snapshots.next().await?;
                if last_seen.is_some_and(|seen| state.updated_at < seen) {
                    continue;
                }
                let terminal = state.status.is_terminal();
                let seen = Some(state.updated_at);
                return Some((state, (snapshots, seen, terminal)));
            }
        },
    )
    .boxed()
}

// ---------------------------------------------------------------------------
// Field encoding
// ---------------------------------------------------------------------------

fn json_string<T: serde::Serialize>(value: &T) -> String {
    // Serializing these plain-data types cannot fail.
    serde_json::to_string(value).unwrap_or_default()
}

fn encode_state(state: &JobState) -> Vec<(String, String)> {
    let mut fields = vec![
        (FIELD_JOB_ID.to_string(), state.job_id.to_string()),
        (FIELD_STATUS.to_string(), state.status.to_string()),
        (FIELD_PROGRESS.to_string(), state.progress.to_string()),
        (FIELD_COST.to_string(), state.cost.to_string()),
        (FIELD_UPDATED_AT.to_string(), state.updated_at.to_rfc3339()),
    ];
    if let Some(phase) = state.current_phase {
        fields.push((FIELD_PHASE.to_string(), phase.to_string()));
    }
    if let Some(error) = &state.error {
        fields.push((FIELD_ERROR.to_string(), json_string(error)));
    }
    for (phase, output) in &state.phase_outputs {
        fields.push((format!("{PHASE_OUTPUT_PREFIX}{phase}"), output.to_string()));
    }
    fields
}

fn decode_state(fields: &Fields) -> Result<JobState, String> {
    let get = |name: &str| fields.get(name).ok_or_else(|| format!("missing field '{name}'"));

    let job_id = get(FIELD_JOB_ID)?
        .parse::<JobId>()
        .map_err(|e| format!("bad job_id: {e}"))?;
    let status = get(FIELD_STATUS)?
        .parse::<JobStatus>()
        .map_err(|e| format!("bad status: {e}"))?;
    let progress = match fields.get(FIELD_PROGRESS) {
        Some(raw) => raw.parse::<i64>().map_err(|e| format!("bad progress: {e}"))?,
        None => 0,
    };
    let cost = match fields.get(FIELD_COST) {
        Some(raw) => raw.parse::<f64>().map_err(|e| format!("bad cost: {e}"))?,
        None => 0.0,
    };
    let current_phase = fields
        .get(FIELD_PHASE)
        .map(|raw| raw.parse::<Stage>())
        .transpose()
        .map_err(|e| format!("bad current_phase: {e}"))?;
    let error = fields
        .get(FIELD_ERROR)
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .map_err(|e| format!("bad error: {e}"))?;
    let updated_at = match fields.get(FIELD_UPDATED_AT) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| format!("bad updated_at: {e}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let mut phase_outputs = BTreeMap::new();
    for (name, raw) in fields {
        if let Some(phase) = name.strip_prefix(PHASE_OUTPUT_PREFIX) {
            let phase = phase.parse::<Stage>().map_err(|e| e.to_string())?;
            let value = serde_json::from_str(raw).map_err(|e| format!("bad {name}: {e}"))?;
            phase_outputs.insert(phase, value);
        }
    }

    Ok(JobState {
        job_id,
        status,
        progress: progress.clamp(0, i64::from(MAX_PROGRESS)) as u8,
        current_phase,
        cost,
        phase_outputs,
        error,
        updated_at,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
