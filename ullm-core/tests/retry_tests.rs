//! Retry engine behavior against fake attempt functions

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use test_case::test_case;
use ullm_core::providers::{ErrorKind, ProviderError, RetryExecutor, RetryPolicy, RetryState};

fn quick_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts)
        .with_delays(Duration::from_millis(10), Duration::from_secs(10))
}

#[test_case(1 ; "one failure")]
#[test_case(2 ; "two failures")]
#[test_case(4 ; "four failures")]
fn test_rate_limited_then_success(failures: u32) {
    let executor = RetryExecutor::new(quick_policy(failures + 1)).with_label("test/model");
    let calls = AtomicU32::new(0);

    let result = executor.execute_blocking(|| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            Err(ProviderError::rate_limit("slow down").with_status(429))
        } else {
            Ok("done")
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
    assert_eq!(result.attempts, failures + 1);
    assert_eq!(result.delays.len() as u32, failures);
    assert!(
        result.delays.windows(2).all(|pair| pair[0] < pair[1]),
        "delays not strictly increasing: {:?}",
        result.delays
    );
    assert!(result.delays.iter().all(|d| *d <= Duration::from_secs(10)));
    assert_eq!(result.into_result().unwrap(), "done");
}

#[test]
fn test_authentication_is_never_retried() {
    let executor = RetryExecutor::new(quick_policy(10));
    let calls = AtomicU32::new(0);

    let result: ullm_core::providers::RetryResult<()> = executor.execute_blocking(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::authentication("bad key")
            .with_provider("openai")
            .with_status(401))
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(result.delays.is_empty());
    assert_eq!(result.state, RetryState::Failed { attempts: 1 });
    let error = result.into_result().unwrap_err();
    assert_eq!(error.kind, ErrorKind::Authentication);
    assert_eq!(error.status, Some(401));
}

#[test_case(ErrorKind::BadRequest)]
#[test_case(ErrorKind::Unknown)]
#[test_case(ErrorKind::Authentication)]
fn test_non_retryable_kinds(kind: ErrorKind) {
    let executor = RetryExecutor::new(quick_policy(3));
    let mut calls = 0;
    let result: ullm_core::providers::RetryResult<()> = executor.execute_blocking(|| {
        calls += 1;
        Err(ProviderError::new(kind, "nope"))
    });
    assert_eq!(calls, 1);
    assert_eq!(result.attempts, 1);
}

#[test_case(ErrorKind::RateLimit)]
#[test_case(ErrorKind::Timeout)]
#[test_case(ErrorKind::ServerError)]
fn test_retryable_kinds_exhaust_attempts(kind: ErrorKind) {
    let executor = RetryExecutor::new(quick_policy(3));
    let mut calls = 0;
    let result: ullm_core::providers::RetryResult<()> = executor.execute_blocking(|| {
        calls += 1;
        Err(ProviderError::new(kind, format!("attempt {}", calls)))
    });
    assert_eq!(calls, 3);
    assert_eq!(result.error_history.len(), 3);
    // The last error comes back untouched
    assert_eq!(result.into_result().unwrap_err().message, "attempt 3");
}

#[test]
fn test_single_attempt_propagates_error_unmodified() {
    let executor = RetryExecutor::new(RetryPolicy::no_retry());
    let original = ProviderError::server("upstream exploded")
        .with_provider("groq")
        .with_status(503);
    let expected = original.clone();

    let result: ullm_core::providers::RetryResult<()> =
        executor.execute_blocking(move || Err(original.clone()));
    let error = result.into_result().unwrap_err();
    assert_eq!(error.kind, expected.kind);
    assert_eq!(error.provider, expected.provider);
    assert_eq!(error.status, expected.status);
    assert_eq!(error.message, expected.message);
}

#[tokio::test]
async fn test_async_retry_matches_blocking() {
    let executor = RetryExecutor::new(quick_policy(3));
    let calls = &AtomicU32::new(0);

    let result = executor
        .execute(move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ProviderError::timeout("read timed out"))
            } else {
                Ok(n)
            }
        })
        .await;

    assert_eq!(result.attempts, 3);
    assert_eq!(result.state, RetryState::Success { attempts: 3 });
    assert!(result.total_delay() >= Duration::from_millis(30));
    assert_eq!(result.into_result().unwrap(), 3);
}

#[tokio::test]
async fn test_retry_after_hint_replaces_backoff() {
    let policy = quick_policy(2).with_jitter(1.0, 1.0);
    let executor = RetryExecutor::new(policy);
    let mut first = true;

    let result = executor
        .execute(|| {
            let fail = std::mem::replace(&mut first, false);
            async move {
                if fail {
                    Err(ProviderError::rate_limit("slow down")
                        .with_retry_after(Some(Duration::from_millis(50))))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert_eq!(result.delays, vec![Duration::from_millis(50)]);
}
