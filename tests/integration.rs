//! Integration tests for the request/response bridge.

use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::StreamExt;

use streamgate::prelude::*;

fn config(name: &str, buffer_size: usize, timeout: Duration) -> ProcessorConfig {
    ProcessorConfig::new(name, buffer_size, timeout)
}

/// Opt into log output with e.g. `RUST_LOG=streamgate=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test]
async fn submit_resolves_through_the_pipeline() {
    init_tracing();
    let processor = IntoableProcessor::spawn(
        MapProcess::new(|s: String| s.len()),
        config("length", 16, Duration::from_secs(5)),
    )
    .unwrap();

    let len = processor.submit("abc".to_string()).await.unwrap();
    assert_eq!(len, 3);

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn identity_process_echoes_every_request() {
    let processor = IntoableProcessor::spawn(
        process_fn(|n: u64| async move { Ok(vec![n]) }),
        config("identity", 32, Duration::from_secs(3600)),
    )
    .unwrap();

    let futures: Vec<_> = (0..20).map(|n| processor.submit(n)).collect();
    for (n, future) in futures.into_iter().enumerate() {
        assert_eq!(future.await, Ok(n as u64));
    }

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_process_times_out_the_caller() {
    let processor = IntoableProcessor::spawn(
        process_fn(|s: String| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(vec![s])
        }),
        config("slow", 4, Duration::from_millis(100)),
    )
    .unwrap();

    let result = processor.submit("abc".to_string()).await;
    assert_eq!(result, Err(Error::timeout("\"abc\"")));

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_element_is_dropped_and_the_stream_continues() {
    init_tracing();
    let processor = IntoableProcessor::spawn(
        process_fn(|(n, m): (i64, i64)| async move {
            if m == 0 {
                return Err(Error::custom("division by zero"));
            }
            Ok(vec![n / m])
        }),
        config("divide", 4, Duration::from_millis(200)),
    )
    .unwrap();

    let bad = processor.submit((4, 0));
    let good = processor.submit((4, 2));

    assert_eq!(good.await, Ok(2));
    assert_eq!(bad.await, Err(Error::timeout("(4, 0)")));
    assert_eq!(processor.stats().dropped_elements, 1);

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_element_is_dropped_and_the_stream_continues() {
    let processor = IntoableProcessor::spawn(
        process_fn(|n: i32| async move {
            if n == 13 {
                panic!("unlucky");
            }
            Ok(vec![n])
        }),
        config("panicky", 4, Duration::from_millis(200)),
    )
    .unwrap();

    let bad = processor.submit(13);
    let good = processor.submit(7);

    assert_eq!(good.await, Ok(7));
    assert!(matches!(bad.await, Err(Error::Timeout { .. })));
    assert_eq!(processor.stats().dropped_elements, 1);

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn overflowing_a_stalled_pipeline_fails_fast() {
    let processor = IntoableProcessor::spawn(
        process_fn(|n: u32| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![n])
        }),
        config("stalled", 2, Duration::from_secs(7200)),
    )
    .unwrap();

    // Let intake pull the blocker out of the queue before filling it.
    let _blocker = processor.submit(0);
    tokio::time::sleep(Duration::from_millis(1)).await;

    let _first = processor.submit(1);
    let _second = processor.submit(2);
    let rejected = processor.submit(3);

    assert_eq!(
        rejected.await,
        Err(Error::unavailable("stalled")),
        "drop-newest must fail the excess submission immediately"
    );

    processor.abort();
}

#[tokio::test(start_paused = true)]
async fn shutdown_at_the_seventh_submission_drains_and_refuses_the_rest() {
    let processor = IntoableProcessor::spawn(
        process_fn(|n: u32| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(vec![n * 2])
        }),
        config("throttled", 2, Duration::from_secs(60)),
    )
    .unwrap();

    // Pace the first seven submissions against the 100ms-per-element process
    // so some drain live, some queue, and the overflow is dropped.
    let mut futures = Vec::new();
    for n in 0..7u32 {
        futures.push((n, processor.submit(n)));
        tokio::time::sleep(Duration::from_millis(45)).await;
    }

    // Trigger shutdown right after the seventh submission; the remaining
    // three race the closed queue and must be refused, not dropped.
    let handle = processor.handle();
    let drain = tokio::spawn(async move { handle.shutdown().await });
    tokio::time::sleep(Duration::from_millis(1)).await;
    for n in 7..10u32 {
        futures.push((n, processor.submit(n)));
    }

    drain.await.unwrap();

    let mut resolved = 0;
    let mut unavailable = 0;
    let mut refused = 0;
    for (n, future) in futures {
        match future.await {
            Ok(value) => {
                assert_eq!(value, n * 2);
                resolved += 1;
            }
            Err(Error::Unavailable { name }) => {
                assert_eq!(name, "throttled");
                unavailable += 1;
            }
            Err(Error::Shutdown) => refused += 1,
            Err(other) => panic!("unexpected failure: {}", other),
        }
    }

    assert!(resolved >= 5, "at least 5 values must be observed, got {}", resolved);
    assert!(
        refused >= 3,
        "submissions after the shutdown signal must fail with Shutdown, got {}",
        refused
    );
    assert_eq!(resolved + unavailable + refused, 10);

    // Drain already completed; a second shutdown observes the same signal.
    processor.shutdown().await;
    processor.when_done().await;
}

#[tokio::test(start_paused = true)]
async fn submissions_after_shutdown_are_refused() {
    let processor = IntoableProcessor::spawn(
        MapProcess::new(|n: u32| n),
        config("closing", 4, Duration::from_secs(5)),
    )
    .unwrap();

    processor.shutdown().await;
    assert_eq!(processor.submit(1).await, Err(Error::Shutdown));
}

#[tokio::test]
async fn construction_rejects_degenerate_bounds() {
    let zero_buffer = IntoableProcessor::spawn(
        MapProcess::new(|n: u32| n),
        config("bad", 0, Duration::from_secs(1)),
    );
    assert!(matches!(zero_buffer, Err(Error::InvalidArgument(_))));

    let zero_in_flight = IntoableProcessor::spawn(
        MapProcess::new(|n: u32| n),
        config("bad", 8, Duration::from_secs(1)).max_in_flight(0),
    );
    assert!(matches!(zero_in_flight, Err(Error::InvalidArgument(_))));
}

/// Buffers everything and flushes in reverse on drain, breaking positional
/// pairing on purpose.
struct ReverseOnDrain {
    buffered: Vec<u64>,
}

#[async_trait]
impl Process for ReverseOnDrain {
    type Request = u64;
    type Response = u64;

    async fn apply(&mut self, request: u64) -> Result<Vec<u64>> {
        self.buffered.push(request);
        Ok(vec![])
    }

    async fn finish(&mut self) -> Result<Vec<u64>> {
        self.buffered.reverse();
        Ok(std::mem::take(&mut self.buffered))
    }
}

#[tokio::test(start_paused = true)]
async fn correlation_matches_reordered_responses() {
    let processor = IntoableProcessor::spawn_correlated(
        ReverseOnDrain { buffered: Vec::new() },
        config("reorder", 128, Duration::from_secs(60)),
        Correlation::new(|r: &u64| *r, |s: &u64| *s, Duration::from_millis(100)),
    )
    .unwrap();

    let futures: Vec<_> = (0..100u64).map(|n| processor.submit(n)).collect();
    processor.shutdown().await;

    for (n, future) in futures.into_iter().enumerate() {
        assert_eq!(future.await, Ok(n as u64));
    }
}

#[tokio::test(start_paused = true)]
async fn duplicate_correlation_keys_favor_the_latest_submission() {
    let processor = IntoableProcessor::spawn_correlated(
        ReverseOnDrain { buffered: Vec::new() },
        config("dupes", 8, Duration::from_secs(60)),
        Correlation::new(|r: &u64| *r, |s: &u64| *s, Duration::from_secs(10)),
    )
    .unwrap();

    let displaced = processor.submit(7);
    let latest = processor.submit(7);
    processor.shutdown().await;

    assert_eq!(latest.await, Ok(7));
    // The displaced entry never receives a response.
    assert!(displaced.await.is_err());
}

#[tokio::test(start_paused = true)]
async fn unmatched_responses_are_counted_and_dropped() {
    let processor = IntoableProcessor::spawn_correlated(
        MapProcess::new(|n: u64| n + 1000),
        config("mismatch", 8, Duration::from_millis(200)),
        Correlation::new(|r: &u64| *r, |s: &u64| *s, Duration::from_millis(50)),
    )
    .unwrap();

    let orphaned = processor.submit(1);
    assert!(matches!(orphaned.await, Err(Error::Timeout { .. })));
    assert_eq!(processor.stats().unmatched_responses, 1);

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn checked_pairing_rejects_mismatched_responses() {
    let processor = IntoableProcessor::spawn_checked(
        MapProcess::new(|n: i64| n + 1),
        config("checked", 8, Duration::from_secs(5)),
        |request: &i64, response: &i64| request == response,
    )
    .unwrap();

    let result = processor.submit(4).await;
    assert_eq!(result, Err(Error::not_correlated("4", "5")));

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn checked_pairing_passes_matching_responses() {
    let processor = IntoableProcessor::spawn_checked(
        MapProcess::new(|n: i64| n),
        config("checked-ok", 8, Duration::from_secs(5)),
        |request: &i64, response: &i64| request == response,
    )
    .unwrap();

    assert_eq!(processor.submit(4).await, Ok(4));
    processor.shutdown().await;
}

#[tokio::test]
async fn splice_yields_responses_in_upstream_order() {
    let processor = IntoableProcessor::spawn(
        MapProcess::new(|s: &str| s.len()),
        config("lengths", 16, Duration::from_secs(5)),
    )
    .unwrap();

    let results: Vec<_> = tokio_stream::iter(["x", "yy", "zzz"])
        .splice_into(processor.sink(), 1)
        .collect()
        .await;
    assert_eq!(results, vec![Ok(1), Ok(2), Ok(3)]);

    processor.shutdown().await;
}

#[tokio::test]
async fn splice_keeps_order_under_parallelism() {
    let processor = IntoableProcessor::spawn(
        MapProcess::new(|n: u64| n * 10),
        config("ordered", 64, Duration::from_secs(5)),
    )
    .unwrap();

    let results: Vec<_> = tokio_stream::iter(0..20u64)
        .splice_into(processor.sink(), 4)
        .collect()
        .await;
    let expected: Vec<_> = (0..20u64).map(|n| Ok(n * 10)).collect();
    assert_eq!(results, expected);

    processor.shutdown().await;
}

#[tokio::test]
async fn splice_rejects_zero_parallelism() {
    let processor = IntoableProcessor::spawn(
        MapProcess::new(|n: u64| n),
        config("zero", 4, Duration::from_secs(5)),
    )
    .unwrap();

    let results: Vec<_> = tokio_stream::iter([1u64])
        .splice_into(processor.sink(), 0)
        .collect()
        .await;
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(Error::InvalidArgument(_))));

    processor.shutdown().await;
}

#[tokio::test]
async fn remote_splice_resolves_through_respondees() {
    let processor = IntoableProcessor::spawn(
        MapProcess::new(|s: &str| s.len()),
        config("remote-lengths", 16, Duration::from_secs(5)),
    )
    .unwrap();

    let results: Vec<_> = tokio_stream::iter(["x", "yy", "zzz"])
        .splice_into_remote(
            processor.sink(),
            RespondeeFactory::new(),
            Duration::from_secs(5),
            2,
        )
        .collect()
        .await;
    assert_eq!(results, vec![Ok(1), Ok(2), Ok(3)]);

    processor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn aborted_pipeline_loses_in_flight_requests() {
    let processor = IntoableProcessor::spawn(
        process_fn(|n: u32| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![n])
        }),
        config("killed", 8, Duration::from_secs(30)),
    )
    .unwrap();

    let pending = processor.submit(1);
    tokio::time::sleep(Duration::from_millis(1)).await;
    processor.abort();

    // The in-flight request is lost; its slot settles via Shutdown (dropped
    // writer) or its deadline, never with a value.
    assert!(pending.await.is_err());
    processor.when_done().await;
}

#[tokio::test(start_paused = true)]
async fn coordinator_drains_processors_before_later_phases() {
    let processor = IntoableProcessor::spawn(
        process_fn(|n: u32| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![n])
        }),
        config("coordinated", 8, Duration::from_secs(60)),
    )
    .unwrap();

    let pending = processor.submit(5);

    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
    coordinator.register_drain(processor.handle()).unwrap();

    let handle = processor.handle();
    coordinator
        .register(PHASE_SERVICE_STOP, "assert-drained", move || async move {
            // By this phase the drain already completed.
            handle.when_done().await;
        })
        .unwrap();

    coordinator.run().await;
    assert_eq!(pending.await, Ok(5));
    assert_eq!(processor.submit(9).await, Err(Error::Shutdown));
}
