mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fixed_profile, task, test_calls, FakeCompositor, FakeGenerator, Recorder};
use storyreel_core::chunk::{ChunkRole, ChunkStatus};
use storyreel_core::continuity::GenerationInput;
use storyreel_pipeline::sequence::build_sequences;
use storyreel_pipeline::{ExecutionReport, NoopProgress, SequenceExecutor};
use tokio_util::sync::CancellationToken;

async fn execute(
    recorder: &Arc<Recorder>,
    generator: FakeGenerator,
    roles: &[ChunkRole],
    concurrency: usize,
) -> ExecutionReport {
    let tasks = roles
        .iter()
        .enumerate()
        .map(|(i, role)| task(i as u32, *role))
        .collect();
    let sequences = build_sequences(tasks).unwrap();
    let executor = SequenceExecutor::new(
        Arc::new(generator),
        Arc::new(FakeCompositor::new(recorder.clone())),
        test_calls(concurrency),
        fixed_profile(),
        0.1,
        CancellationToken::new(),
        Arc::new(NoopProgress),
    );
    executor.execute(sequences).await
}

// ---------------------------------------------------------------------------
// Ordering within a sequence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn follower_dispatches_only_after_predecessor_continuation() {
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone()).default_delay(Duration::from_secs(2));
    let roles = [ChunkRole::Head, ChunkRole::Follower, ChunkRole::Follower];

    let report = execute(&recorder, generator, &roles, 8).await;
    assert!(report.is_complete());

    for i in 1..3u32 {
        let ready = recorder.continuation_at(i - 1).unwrap();
        let dispatched = recorder.dispatched_at(i).unwrap();
        assert!(ready <= dispatched, "chunk {i} dispatched before its predecessor's frame");
    }
}

#[tokio::test(start_paused = true)]
async fn follower_is_conditioned_on_predecessor_trailing_frame() {
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone());
    let report = execute(&recorder, generator, &[ChunkRole::Head, ChunkRole::Follower], 8).await;

    assert_eq!(recorder.input_of(0), Some(GenerationInput::PromptOnly));
    let continuation = report.results[0].continuation.clone();
    assert_eq!(recorder.input_of(1), Some(GenerationInput::TrailingFrame(continuation.clone())));
    // Seeked 100ms before the 5s nominal end.
    assert!(continuation.uri.ends_with("#t=4.900"));
}

// ---------------------------------------------------------------------------
// Independence between sequences
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn fast_sequence_does_not_wait_for_slow_sibling() {
    // Sequence A: chunk 0 alone, slow. Sequence B: chunks 1 and 2, fast.
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone())
        .delay(0, Duration::from_secs(10))
        .delay(1, Duration::from_secs(1))
        .delay(2, Duration::from_secs(1));
    let roles = [ChunkRole::Head, ChunkRole::Head, ChunkRole::Follower];

    let report = execute(&recorder, generator, &roles, 8).await;
    assert!(report.is_complete());

    let slow_head_done = recorder.generated_at(0).unwrap();
    let fast_head_done = recorder.generated_at(1).unwrap();
    let fast_follower_dispatch = recorder.dispatched_at(2).unwrap();
    assert!(fast_head_done < slow_head_done);
    assert!(fast_follower_dispatch < slow_head_done);
}

#[tokio::test(start_paused = true)]
async fn all_heads_start_together() {
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone()).default_delay(Duration::from_secs(3));
    let roles = [ChunkRole::Head, ChunkRole::Head, ChunkRole::Head];

    execute(&recorder, generator, &roles, 8).await;

    let first = recorder.dispatched_at(0).unwrap();
    for i in 1..3 {
        assert_eq!(recorder.dispatched_at(i).unwrap(), first);
    }
}

#[tokio::test(start_paused = true)]
async fn worker_pool_bounds_concurrent_calls() {
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone()).default_delay(Duration::from_secs(1));

    execute(&recorder, generator, &[ChunkRole::Head, ChunkRole::Head], 1).await;

    let (a, b) = (recorder.dispatched_at(0).unwrap(), recorder.dispatched_at(1).unwrap());
    let (first_done, second_start) = if a < b {
        (recorder.generated_at(0).unwrap(), b)
    } else {
        (recorder.generated_at(1).unwrap(), a)
    };
    assert!(second_start >= first_done);
}

// ---------------------------------------------------------------------------
// Fan-in
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn fan_in_is_sorted_regardless_of_completion_order() {
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone())
        .delay(0, Duration::from_secs(9))
        .delay(1, Duration::from_secs(5))
        .delay(2, Duration::from_secs(1))
        .delay(3, Duration::from_secs(3));
    let roles = [ChunkRole::Head, ChunkRole::Head, ChunkRole::Head, ChunkRole::Follower];

    let report = execute(&recorder, generator, &roles, 8).await;

    let order: Vec<u32> = report.results.iter().map(|r| r.chunk_index).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert!(recorder.generated_at(2).unwrap() < recorder.generated_at(0).unwrap());
}

#[tokio::test(start_paused = true)]
async fn failed_head_abandons_only_its_own_sequence() {
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone()).fail_transiently(0, u32::MAX);
    let roles = [ChunkRole::Head, ChunkRole::Follower, ChunkRole::Head];

    let report = execute(&recorder, generator, &roles, 8).await;

    assert_eq!(report.missing, vec![0, 1]);
    assert_eq!(recorder.dispatch_count(0), 3);
    assert_eq!(recorder.dispatch_count(1), 0);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].chunk_index, 2);

    let statuses: Vec<ChunkStatus> = report.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![ChunkStatus::Failed, ChunkStatus::Abandoned, ChunkStatus::Succeeded]
    );
    assert!(report.failure_summary().contains("chunk 0"));
}

#[tokio::test(start_paused = true)]
async fn crashed_sequence_reports_its_own_sequence_id() {
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone()).panic_on(2);
    let roles = [ChunkRole::Head, ChunkRole::Follower, ChunkRole::Head, ChunkRole::Follower];

    let report = execute(&recorder, generator, &roles, 8).await;

    assert_eq!(report.missing, vec![2, 3]);
    let crashed: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.status == ChunkStatus::Failed)
        .map(|o| (o.chunk_index, o.sequence_id))
        .collect();
    // Sequences are numbered by head order: [0, 1] is sequence 0, [2, 3] is 1.
    assert_eq!(crashed, vec![(2, 1), (3, 1)]);
    assert_eq!(report.outcomes[0].status, ChunkStatus::Succeeded);
    assert_eq!(report.outcomes[1].status, ChunkStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_invisible_after_retry() {
    let recorder = Arc::new(Recorder::default());
    let generator = FakeGenerator::new(recorder.clone()).fail_transiently(1, 1);

    let report = execute(&recorder, generator, &[ChunkRole::Head, ChunkRole::Follower], 8).await;

    assert!(report.is_complete());
    assert_eq!(report.results[1].attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_executor_abandons_pending_tasks() {
    let recorder = Arc::new(Recorder::default());
    let cancel = CancellationToken::new();
    let executor = SequenceExecutor::new(
        Arc::new(FakeGenerator::new(recorder.clone()).default_delay(Duration::from_secs(60))),
        Arc::new(FakeCompositor::new(recorder.clone())),
        test_calls(8),
        fixed_profile(),
        0.1,
        cancel.clone(),
        Arc::new(NoopProgress),
    );
    let sequences = build_sequences(vec![task(0, ChunkRole::Head), task(1, ChunkRole::Follower)]).unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    let report = executor.execute(sequences).await;

    assert_eq!(report.missing, vec![0, 1]);
    assert!(report.outcomes.iter().all(|o| o.status == ChunkStatus::Abandoned));
    assert_eq!(recorder.dispatch_count(1), 0);
}
