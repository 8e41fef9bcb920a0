//! End-to-end behaviour of the retry executor.

use std::error::Error as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ovirt_retry::{
    BoxError, CallKind, ErrorCode, ExponentialBackoff, Retrier, RetryConfig, RetryDecision,
    RetryPolicy, RetryStrategy, SdkError, TracingLogger, TypedError, has_error_code, retry,
    retry_async, wait_until,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const INVALID_GRANT: &str =
    "invalid_grant: The provided authorization grant for the auth code has expired.";

fn fast_policy(max_tries: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with(ExponentialBackoff::with_delays(
            2.0,
            Duration::from_millis(1),
            Duration::from_millis(4),
        ))
        .max_tries(max_tries)
}

/// Keeps every error the executor hands to the strategies.
#[derive(Debug, Clone, Default)]
struct SeenErrors(Arc<Mutex<Vec<TypedError>>>);

impl SeenErrors {
    fn take(&self) -> Vec<TypedError> {
        self.0.lock().map(|mut seen| std::mem::take(&mut *seen)).unwrap_or_default()
    }
}

impl RetryStrategy for SeenErrors {
    fn name(&self) -> &'static str {
        "seen_errors"
    }

    fn on_failure(&mut self, _attempt: u32, err: &TypedError) -> RetryDecision {
        if let Ok(mut seen) = self.0.lock() {
            seen.push(err.clone());
        }
        RetryDecision::Retry(Duration::ZERO)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to look up VM {id}")]
struct LookupError {
    id: u32,
    #[source]
    source: TypedError,
}

#[test]
fn disk_locked_three_times_then_success() {
    let seen = SeenErrors::default();
    let mut calls = 0;
    let result = retry(
        "attach disk",
        Some(&TracingLogger),
        fast_policy(5).with(seen.clone()),
        || {
            calls += 1;
            if calls <= 3 {
                Err("Cannot attach disk. Disk is locked. Please try again later.")
            } else {
                Ok("attached")
            }
        },
    );

    assert_eq!(result.ok(), Some("attached"));
    assert_eq!(calls, 4);

    let failures = seen.take();
    assert_eq!(failures.len(), 3);
    for err in &failures {
        assert_eq!(err.code(), ErrorCode::DiskLocked);
        assert!(has_error_code(err, ErrorCode::DiskLocked));
        assert!(err.message().contains("Cannot attach disk. Disk is locked."));
    }
}

#[test]
fn invalid_grant_runs_recovery_once() {
    let events = Mutex::new(Vec::new());
    let record = |event: &'static str| {
        if let Ok(mut events) = events.lock() {
            events.push(event);
        }
    };

    let mut calls = 0;
    let result = Retrier::new("list VMs", fast_policy(3))
        .with_recovery(|err: &TypedError| -> Result<(), BoxError> {
            assert_eq!(err.code(), ErrorCode::InvalidGrant);
            record("recover");
            Ok(())
        })
        .run(|| {
            calls += 1;
            record("call");
            if calls == 1 { Err(INVALID_GRANT) } else { Ok(calls) }
        });

    assert_eq!(result.ok(), Some(2));
    let events = events.into_inner().unwrap_or_default();
    assert_eq!(events, vec!["call", "recover", "call"]);
}

#[test]
fn nested_typed_error_is_not_retried() {
    let mut calls = 0;
    let err = retry("get VM", None, fast_policy(5), || {
        calls += 1;
        Err::<(), _>(LookupError {
            id: 42,
            source: TypedError::new(ErrorCode::NotFound, "VM 42 does not exist"),
        })
    })
    .unwrap_err();

    assert_eq!(calls, 1);
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert!(err.message().contains("VM 42 does not exist"), "{err}");
}

#[test]
fn failed_recovery_ends_the_loop() {
    let mut calls = 0;
    let err = Retrier::new("list VMs", fast_policy(5))
        .with_recovery(|_err: &TypedError| -> Result<(), BoxError> {
            Err("engine unreachable".into())
        })
        .run(|| {
            calls += 1;
            Err::<(), _>(INVALID_GRANT)
        })
        .unwrap_err();

    assert_eq!(calls, 1);
    assert!(
        err.message()
            .starts_with("failed to recover from invalid_grant while trying to list VMs"),
        "{err}"
    );
    assert!(err.message().contains("engine unreachable"));
}

#[test]
fn invalid_grant_without_recovery_is_retried() {
    let mut calls = 0;
    let err = retry("list VMs", None, fast_policy(2), || {
        calls += 1;
        Err::<(), _>(INVALID_GRANT)
    })
    .unwrap_err();

    assert_eq!(calls, 2);
    assert_eq!(err.code(), ErrorCode::InvalidGrant);
}

#[test]
fn not_found_is_called_exactly_once() {
    let mut calls = 0;
    let err = retry("get VM", None, fast_policy(10), || {
        calls += 1;
        Err::<(), _>(SdkError::NotFound("VM with ID 123 not found".to_string()))
    })
    .unwrap_err();

    assert_eq!(calls, 1);
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert!(err.message().contains("VM with ID 123 not found"));
}

#[test]
fn vendor_error_stays_reachable_through_the_chain() {
    let err = retry("get VM", None, fast_policy(10), || {
        Err::<(), _>(SdkError::NotFound("VM with ID 123 not found".to_string()))
    })
    .unwrap_err();

    let root: &(dyn std::error::Error + 'static) = &err;
    let sdk = std::iter::successors(Some(root), |e| (*e).source())
        .find_map(|e| e.downcast_ref::<SdkError>());
    assert!(matches!(sdk, Some(SdkError::NotFound(_))));
}

#[test]
fn terminal_codes_are_never_retried() {
    let terminal = [
        ErrorCode::BadArgument,
        ErrorCode::AccessDenied,
        ErrorCode::NotAnOvirtEngine,
        ErrorCode::TlsError,
        ErrorCode::NotFound,
        ErrorCode::MultipleResults,
        ErrorCode::Bug,
        ErrorCode::Unsupported,
        ErrorCode::FieldMissing,
        ErrorCode::PermanentHttpError,
        ErrorCode::UnexpectedDiskStatus,
        ErrorCode::CannotRunVm,
    ];

    for code in terminal {
        let mut calls = 0;
        let err = retry("update VM", None, fast_policy(10), || {
            calls += 1;
            Err::<(), _>(TypedError::new(code, "nope"))
        })
        .unwrap_err();
        assert_eq!(calls, 1, "{code}");
        assert_eq!(err.code(), code);
    }
}

#[test]
fn retryable_code_is_attempted_max_tries_times() {
    for limit in 1..=4 {
        let mut calls = 0;
        let err = retry("start VM", None, fast_policy(limit), || {
            calls += 1;
            Err::<(), _>(TypedError::new(ErrorCode::VmLocked, "VM is locked"))
        })
        .unwrap_err();

        assert_eq!(calls, limit);
        assert_eq!(err.code(), ErrorCode::VmLocked);
        assert!(
            err.message()
                .contains(&format!("giving up after {limit} attempt(s)")),
            "{err}"
        );
    }
}

#[test]
fn zero_tries_still_runs_once() {
    let mut calls = 0;
    let result = retry("start VM", None, RetryPolicy::new().max_tries(0), || {
        calls += 1;
        Err::<(), _>(TypedError::new(ErrorCode::Connection, "connection reset"))
    });

    assert!(result.is_err());
    assert_eq!(calls, 1);
}

#[test]
fn success_stops_the_loop() {
    let mut calls = 0;
    let result = retry("start VM", None, fast_policy(10), || {
        calls += 1;
        Ok::<_, TypedError>(calls)
    });

    assert_eq!(result.ok(), Some(1));
    assert_eq!(calls, 1);
}

#[test]
fn timeout_strategy_gives_up() {
    let mut calls = 0;
    let err = retry(
        "create disk",
        None,
        RetryPolicy::new().timeout(Duration::ZERO),
        || {
            calls += 1;
            Err::<(), _>(TypedError::new(ErrorCode::Conflict, "409 Conflict"))
        },
    )
    .unwrap_err();

    assert_eq!(calls, 1);
    assert!(err.message().contains("timeout"), "{err}");
}

#[test]
fn wait_until_polls_until_condition_holds() {
    let mut checks = 0;
    let status = wait_until("wait for VM to come up", None, fast_policy(10), || {
        checks += 1;
        Ok::<_, TypedError>(if checks < 3 { None } else { Some("up") })
    });

    assert_eq!(status.ok(), Some("up"));
    assert_eq!(checks, 3);
}

#[test]
fn wait_until_reports_pending_when_exhausted() {
    let err = wait_until("wait for disk to unlock", None, fast_policy(2), || {
        Ok::<Option<()>, TypedError>(None)
    })
    .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Pending);
}

#[test]
fn default_policy_comes_from_config() {
    let config = RetryConfig::default();
    let mut calls = 0;
    let result = retry(
        "list hosts",
        None,
        config.resolve(CallKind::Read, Some(fast_policy(2))),
        || {
            calls += 1;
            Err::<(), _>("connection reset by peer")
        },
    );

    assert!(result.is_err());
    assert_eq!(calls, 2);
}

#[tokio::test(start_paused = true)]
async fn async_retry_succeeds_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let result = retry_async(
        "upload image",
        Some(&TracingLogger),
        RetryPolicy::new().exponential_backoff(2.0).max_tries(5),
        || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(TypedError::new(ErrorCode::Connection, "connection reset"))
                } else {
                    Ok(n)
                }
            }
        },
    )
    .await;

    assert_eq!(result.ok(), Some(3));
}

#[tokio::test(start_paused = true)]
async fn async_wait_is_interrupted_by_cancellation() {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });

    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new()
        .with(ExponentialBackoff::with_delays(
            2.0,
            Duration::from_secs(30),
            Duration::from_secs(60),
        ))
        .cancel_on(token);
    let err = Retrier::new("download image", policy)
        .run_async(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TypedError::new(ErrorCode::Connection, "connection reset")) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.code(), ErrorCode::Connection);
    assert!(err.message().contains("operation cancelled"), "{err}");
}
