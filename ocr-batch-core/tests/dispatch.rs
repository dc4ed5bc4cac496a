use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use ocr_batch_core::config::DispatchPolicy;
use ocr_batch_core::contract::{ErrorKind, InferenceResponse, ProviderError};
use ocr_batch_core::dispatch::{DispatchOutcome, Dispatcher};

fn response() -> InferenceResponse {
    InferenceResponse {
        content: "ok".to_string(),
        input_tokens: 10,
        output_tokens: 2,
        model_used: "test-model".to_string(),
        pages: None,
    }
}

fn transient() -> ProviderError {
    ProviderError::Transient {
        status: Some(503),
        message: "service unavailable".to_string(),
    }
}

fn policy(max_concurrent: usize, max_retries: u32) -> DispatchPolicy {
    DispatchPolicy {
        max_concurrent,
        max_retries,
        base_delay_ms: 1_000,
        max_delay_ms: 30_000,
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_until_success() {
    let dispatcher = Dispatcher::new(policy(5, 3));
    let calls = AtomicU32::new(0);

    let outcome = dispatcher
        .dispatch("doc.pdf", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(transient())
                } else {
                    Ok(response())
                }
            }
        })
        .await;

    match outcome {
        DispatchOutcome::Success {
            attempts, response, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(response.content, "ok");
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_total_attempts() {
    let dispatcher = Dispatcher::new(policy(5, 3));
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let outcome = dispatcher
        .dispatch("doc.pdf", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

    match outcome {
        DispatchOutcome::Failure { kind, attempts, .. } => {
            assert_eq!(kind, ErrorKind::Transient);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Backoff after attempts 1 and 2 only: 1s + 2s.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(3_000) && waited < Duration::from_millis(3_100));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_is_not_retried() {
    let dispatcher = Dispatcher::new(policy(5, 3));
    let calls = AtomicU32::new(0);

    let outcome = dispatcher
        .dispatch("doc.pdf", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::from_status(
                    403,
                    "not authorised to invoke this model",
                ))
            }
        })
        .await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.attempts(), 1);
    assert!(matches!(
        outcome,
        DispatchOutcome::Failure {
            kind: ErrorKind::Permanent,
            ..
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_covers_the_final_attempt_only() {
    let dispatcher = Dispatcher::new(policy(5, 3));
    let calls = AtomicU32::new(0);

    let outcome = dispatcher
        .dispatch("doc.pdf", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Err(transient())
                } else {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(response())
                }
            }
        })
        .await;

    assert!(outcome.is_success());
    let elapsed = outcome.elapsed_ms();
    assert!(
        (100..150).contains(&elapsed),
        "elapsed should reflect the last attempt, got {elapsed}ms"
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_the_bound() {
    let dispatcher = Dispatcher::new(policy(2, 1));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let calls = (0..4).map(|i| {
        let dispatcher = dispatcher.clone();
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        async move {
            let label = format!("doc{i}.pdf");
            dispatcher
                .dispatch(&label, || {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(response())
                    }
                })
                .await
        }
    });
    let outcomes = futures::future::join_all(calls).await;

    assert!(outcomes.iter().all(DispatchOutcome::is_success));
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    let wall = started.elapsed();
    assert!(wall >= Duration::from_millis(200) && wall < Duration::from_millis(300));
    assert_eq!(dispatcher.available_permits(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sleep_does_not_hold_a_permit() {
    let dispatcher = Dispatcher::new(DispatchPolicy {
        max_concurrent: 1,
        max_retries: 2,
        base_delay_ms: 1_000,
        max_delay_ms: 1_000,
    });
    let flaky_calls = AtomicU32::new(0);

    let flaky = dispatcher.dispatch("flaky.pdf", || {
        let n = flaky_calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n == 1 {
                Err(transient())
            } else {
                Ok(response())
            }
        }
    });
    let steady = async {
        // Let the flaky task take the only permit first.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let started = Instant::now();
        let outcome = dispatcher
            .dispatch("steady.pdf", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(response())
            })
            .await;
        (outcome, started.elapsed())
    };

    let (flaky, (steady, steady_wall)) = tokio::join!(flaky, steady);
    assert_eq!(flaky.attempts(), 2);
    assert!(steady.is_success());
    // The steady task ran during the flaky task's one-second backoff.
    assert!(steady_wall < Duration::from_millis(1_000));
}
