#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use storyreel_core::artifact::Artifact;
use storyreel_core::chunk::{ChunkRole, ChunkTask};
use storyreel_core::continuity::GenerationInput;
use storyreel_core::generation::{effective_unit, GenerationProfile, ProfileRegistry};
use storyreel_core::job::{Beat, Job, ShotDescriptor, ShotTransition};
use storyreel_core::services::{
    AssetMatcher, AssetRecommendation, GenerationRequest, GenerationService, MediaCompositor, RefinedVideo, Refiner,
    ServiceError,
};
use storyreel_core::stitching::StitchPlan;
use storyreel_core::types::ChunkIndex;
use storyreel_db::MemoryDurableStore;
use storyreel_events::{MemoryFastStore, ProgressLedger, DEFAULT_FAST_TTL};
use storyreel_pipeline::pool::WorkerPool;
use storyreel_pipeline::retry::CallRunner;
use storyreel_pipeline::{Orchestrator, PipelineConfig, RetryPolicy, Services};
use tokio::time::Instant;

pub const REFINE_COST: f64 = 0.25;

// ---------------------------------------------------------------------------
// Event recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Dispatched(GenerationInput),
    Generated,
    ContinuationReady,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub chunk_index: ChunkIndex,
    pub kind: EventKind,
    pub at: Instant,
}

/// Timeline of fake service calls, on the Tokio clock.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn push(&self, chunk_index: ChunkIndex, kind: EventKind) {
        self.events.lock().unwrap().push(Event {
            chunk_index,
            kind,
            at: Instant::now(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn first(&self, chunk_index: ChunkIndex, matches: impl Fn(&EventKind) -> bool) -> Option<Instant> {
        self.events()
            .into_iter()
            .find(|e| e.chunk_index == chunk_index && matches(&e.kind))
            .map(|e| e.at)
    }

    pub fn dispatched_at(&self, chunk_index: ChunkIndex) -> Option<Instant> {
        self.first(chunk_index, |k| matches!(k, EventKind::Dispatched(_)))
    }

    pub fn generated_at(&self, chunk_index: ChunkIndex) -> Option<Instant> {
        self.first(chunk_index, |k| *k == EventKind::Generated)
    }

    pub fn continuation_at(&self, chunk_index: ChunkIndex) -> Option<Instant> {
        self.first(chunk_index, |k| *k == EventKind::ContinuationReady)
    }

    pub fn input_of(&self, chunk_index: ChunkIndex) -> Option<GenerationInput> {
        self.events().into_iter().find_map(|e| match e.kind {
            EventKind::Dispatched(input) if e.chunk_index == chunk_index => Some(input),
            _ => None,
        })
    }

    pub fn dispatch_count(&self, chunk_index: ChunkIndex) -> usize {
        self.events()
            .iter()
            .filter(|e| e.chunk_index == chunk_index && matches!(e.kind, EventKind::Dispatched(_)))
            .count()
    }
}

fn chunk_uri(index: ChunkIndex) -> String {
    format!("fake://chunk-{index}.mp4")
}

fn chunk_of(uri: &str) -> ChunkIndex {
    uri.trim_start_matches("fake://chunk-")
        .split('.')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(ChunkIndex::MAX)
}

// ---------------------------------------------------------------------------
// Generation service
// ---------------------------------------------------------------------------

/// Scripted generator: per-chunk latency and failures.
pub struct FakeGenerator {
    recorder: Arc<Recorder>,
    default_delay: Duration,
    delays: HashMap<ChunkIndex, Duration>,
    permanent: HashMap<ChunkIndex, String>,
    transient: Mutex<HashMap<ChunkIndex, u32>>,
    panics: Vec<ChunkIndex>,
}

impl FakeGenerator {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            default_delay: Duration::from_millis(100),
            delays: HashMap::new(),
            permanent: HashMap::new(),
            transient: Mutex::new(HashMap::new()),
            panics: Vec::new(),
        }
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn delay(mut self, chunk_index: ChunkIndex, delay: Duration) -> Self {
        self.delays.insert(chunk_index, delay);
        self
    }

    pub fn fail_permanently(mut self, chunk_index: ChunkIndex) -> Self {
        self.permanent.insert(chunk_index, "content policy".to_string());
        self
    }

    /// Panic inside the sequence task that generates `chunk_index`.
    pub fn panic_on(mut self, chunk_index: ChunkIndex) -> Self {
        self.panics.push(chunk_index);
        self
    }

    /// Fail the first `times` attempts of `chunk_index` with a transient error.
    pub fn fail_transiently(self, chunk_index: ChunkIndex, times: u32) -> Self {
        self.transient.lock().unwrap().insert(chunk_index, times);
        self
    }
}

#[async_trait]
impl GenerationService for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest, profile: &GenerationProfile) -> Result<Artifact, ServiceError> {
        let index = request.chunk_index;
        self.recorder.push(index, EventKind::Dispatched(request.input.clone()));

        let delay = self.delays.get(&index).copied().unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;

        if self.panics.contains(&index) {
            panic!("generator crashed on chunk {index}");
        }
        if let Some(reason) = self.permanent.get(&index) {
            return Err(ServiceError::Permanent(reason.clone()));
        }
        {
            let mut transient = self.transient.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ServiceError::Transient("rate limited".to_string()));
                }
            }
        }

        self.recorder.push(index, EventKind::Generated);
        Ok(Artifact::video(chunk_uri(index), effective_unit(profile)))
    }
}

// ---------------------------------------------------------------------------
// Compositor, matcher, refiner
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCompositor {
    recorder: Arc<Recorder>,
    /// Duration reported for the assembled clip instead of the planned one.
    pub assembled_duration: Option<f64>,
    pub fail_extraction: bool,
}

impl FakeCompositor {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            assembled_duration: None,
            fail_extraction: false,
        }
    }
}

#[async_trait]
impl MediaCompositor for FakeCompositor {
    async fn extract_trailing_frame(&self, video: &Artifact, at_secs: f64) -> Result<Artifact, ServiceError> {
        if self.fail_extraction {
            return Err(ServiceError::Permanent("decoder error".to_string()));
        }
        self.recorder.push(chunk_of(&video.uri), EventKind::ContinuationReady);
        Ok(Artifact::image(format!("{}#t={at_secs:.3}", video.uri)))
    }

    async fn concatenate_with_transitions(&self, plan: &StitchPlan) -> Result<Artifact, ServiceError> {
        let duration = self.assembled_duration.unwrap_or(plan.expected_duration);
        Ok(Artifact::video("fake://assembled.mp4", duration))
    }
}

/// Returns the configured recommendations per beat id.
#[derive(Default)]
pub struct FakeMatcher {
    pub recommendations: HashMap<String, Vec<AssetRecommendation>>,
    pub failing: Vec<String>,
}

impl FakeMatcher {
    pub fn recommend(mut self, beat_id: &str, uri: &str, confidence: f64) -> Self {
        self.recommendations
            .entry(beat_id.to_string())
            .or_default()
            .push(AssetRecommendation {
                artifact: Artifact::image(uri),
                confidence,
            });
        self
    }

    /// Every lookup for `beat_id` fails permanently.
    pub fn fail(mut self, beat_id: &str) -> Self {
        self.failing.push(beat_id.to_string());
        self
    }
}

#[async_trait]
impl AssetMatcher for FakeMatcher {
    async fn recommend(&self, beat: &Beat) -> Result<Vec<AssetRecommendation>, ServiceError> {
        if self.failing.contains(&beat.id) {
            return Err(ServiceError::Permanent(format!("asset index down for {}", beat.id)));
        }
        Ok(self.recommendations.get(&beat.id).cloned().unwrap_or_default())
    }
}

pub struct FakeRefiner;

#[async_trait]
impl Refiner for FakeRefiner {
    async fn refine(&self, video: &Artifact) -> Result<RefinedVideo, ServiceError> {
        Ok(RefinedVideo {
            video: Artifact {
                uri: format!("{}?refined", video.uri),
                ..video.clone()
            },
            cost: REFINE_COST,
        })
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn fixed_profile() -> GenerationProfile {
    ProfileRegistry::builtin().get("fixed-5s").unwrap().clone()
}

/// Fast-retry config so exhausted retries stay short on the paused clock.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        concurrency: 8,
        call_timeout: Duration::from_secs(300),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        },
        ..PipelineConfig::default()
    }
}

pub fn test_calls(concurrency: usize) -> CallRunner {
    let config = test_config();
    CallRunner::new(WorkerPool::new(concurrency), config.retry, config.call_timeout)
}

pub fn beat(id: &str, start: f64, duration: f64, transition: ShotTransition) -> Beat {
    Beat {
        id: id.to_string(),
        start_time: start,
        duration,
        shot: ShotDescriptor {
            framing: "medium".to_string(),
            transition,
        },
        prompt: format!("scene {id}"),
        reference: None,
    }
}

pub fn with_reference(mut beat: Beat, uri: &str) -> Beat {
    beat.reference = Some(Artifact::image(uri));
    beat
}

pub fn task(index: ChunkIndex, role: ChunkRole) -> ChunkTask {
    ChunkTask {
        chunk_index: index,
        beat_id: format!("b{index}"),
        role,
        prompt: format!("chunk {index}"),
        reference: None,
        start_time: f64::from(index) * 5.0,
    }
}

pub fn job(target: f64, beats: Vec<Beat>) -> Job {
    Job::new(target, "fixed-5s", beats)
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub fast: Arc<MemoryFastStore>,
    pub durable: Arc<MemoryDurableStore>,
    pub recorder: Arc<Recorder>,
}

pub struct HarnessBuilder {
    pub recorder: Arc<Recorder>,
    generator: Option<FakeGenerator>,
    compositor: Option<FakeCompositor>,
    matcher: FakeMatcher,
    config: PipelineConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            generator: None,
            compositor: None,
            matcher: FakeMatcher::default(),
            config: test_config(),
        }
    }

    pub fn generator(mut self, build: impl FnOnce(FakeGenerator) -> FakeGenerator) -> Self {
        self.generator = Some(build(FakeGenerator::new(self.recorder.clone())));
        self
    }

    pub fn compositor(mut self, build: impl FnOnce(FakeCompositor) -> FakeCompositor) -> Self {
        self.compositor = Some(build(FakeCompositor::new(self.recorder.clone())));
        self
    }

    pub fn matcher(mut self, matcher: FakeMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(mut self, build: impl FnOnce(&mut PipelineConfig)) -> Self {
        build(&mut self.config);
        self
    }

    pub fn build(self) -> Harness {
        let fast = Arc::new(MemoryFastStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let ledger = ProgressLedger::new(fast.clone(), durable.clone(), DEFAULT_FAST_TTL);
        let services = Services {
            generator: Arc::new(
                self.generator
                    .unwrap_or_else(|| FakeGenerator::new(self.recorder.clone())),
            ),
            compositor: Arc::new(
                self.compositor
                    .unwrap_or_else(|| FakeCompositor::new(self.recorder.clone())),
            ),
            asset_matcher: Arc::new(self.matcher),
            refiner: Arc::new(FakeRefiner),
        };
        Harness {
            orchestrator: Orchestrator::new(self.config, ProfileRegistry::builtin(), ledger, services),
            fast,
            durable,
            recorder: self.recorder,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::new().build()
}
