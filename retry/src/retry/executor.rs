//! Retry executor
//!
//! Runs an operation until it succeeds, fails with a code that must not be
//! retried, or the strategies of its [`RetryPolicy`] give up. Attempts are
//! strictly sequential; the only suspension point is the wait between them.
//!
//! Per call the executor moves through
//! `Attempting → {Success, Retrying, RecoveryAndRetrying, Failed}` where the
//! retrying states loop back to `Attempting` after their wait.

use std::future::Future;
use std::time::{Duration, Instant};

use futures::future::select_all;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, ErrorCode, Result, TypedError};
use crate::logger::{Logger, NOOP_LOGGER};
use crate::retry::classifier::classify;
use crate::retry::strategy::{RetryDecision, RetryPolicy};

/// Longest uninterrupted sleep of a blocking wait that can be cancelled.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Remediation run before the next attempt when an error's code can be
/// recovered from (an expired SSO token is fixed by reconnecting).
///
/// Closures taking `&TypedError` implement this trait.
pub trait Recovery: Send {
    fn recover(&mut self, err: &TypedError) -> std::result::Result<(), BoxError>;
}

impl<F> Recovery for F
where
    F: FnMut(&TypedError) -> std::result::Result<(), BoxError> + Send,
{
    fn recover(&mut self, err: &TypedError) -> std::result::Result<(), BoxError> {
        self(err)
    }
}

/// Configured retry loop for one call.
///
/// # Example
/// ```
/// use ovirt_retry::{ErrorCode, Retrier, RetryPolicy, TypedError};
///
/// let mut calls = 0;
/// let result = Retrier::new("start VM", RetryPolicy::new().max_tries(5)).run(|| {
///     calls += 1;
///     if calls < 3 {
///         Err(TypedError::new(ErrorCode::VmLocked, "VM is locked"))
///     } else {
///         Ok(calls)
///     }
/// });
/// assert_eq!(result.ok(), Some(3));
/// ```
pub struct Retrier<'a> {
    description: String,
    logger: &'a dyn Logger,
    policy: RetryPolicy,
    recovery: Option<Box<dyn Recovery + 'a>>,
}

/// What to do after a failed attempt.
enum Next {
    Wait(Duration, TypedError),
    Stop(TypedError),
}

impl<'a> Retrier<'a> {
    pub fn new(description: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            description: description.into(),
            logger: &NOOP_LOGGER,
            policy,
            recovery: None,
        }
    }

    pub fn with_logger(mut self, logger: &'a dyn Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_recovery(mut self, recovery: impl Recovery + 'a) -> Self {
        self.recovery = Some(Box::new(recovery));
        self
    }

    /// Run `operation` on the calling thread, sleeping between attempts.
    pub fn run<T, E, F>(mut self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, E>,
        E: Into<BoxError>,
    {
        self.begin();
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let err = match operation() {
                Ok(value) => return Ok(self.succeeded(value)),
                Err(err) => classify(err),
            };

            let (delay, err) = match self.after_failure(attempt, err) {
                Next::Wait(delay, err) => (delay, err),
                Next::Stop(err) => return Err(err),
            };

            let tokens = self.policy.cancellation_tokens();
            wait_blocking(delay, &tokens);
            if self.policy.is_cancelled() {
                return Err(self.give_up(err, attempt, "operation cancelled"));
            }
        }
    }

    /// Run an async `operation`; waits are tokio sleeps raced against the
    /// cancellation tokens of the policy.
    pub async fn run_async<T, E, F, Fut>(mut self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.begin();
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let err = match operation().await {
                Ok(value) => return Ok(self.succeeded(value)),
                Err(err) => classify(err),
            };

            let (delay, err) = match self.after_failure(attempt, err) {
                Next::Wait(delay, err) => (delay, err),
                Next::Stop(err) => return Err(err),
            };

            let tokens = self.policy.cancellation_tokens();
            wait_async(delay, &tokens).await;
            if self.policy.is_cancelled() {
                return Err(self.give_up(err, attempt, "operation cancelled"));
            }
        }
    }

    fn begin(&mut self) {
        if self.policy.is_empty() {
            self.logger.warning(format_args!(
                "No retry strategies configured for {}, retryable errors will be retried forever.",
                self.description
            ));
        }
        self.policy.start();
        self.logger.debug(format_args!("{}...", self.description));
    }

    fn succeeded<T>(&self, value: T) -> T {
        self.logger
            .debug(format_args!("Completed {}.", self.description));
        value
    }

    fn after_failure(&mut self, attempt: u32, err: TypedError) -> Next {
        if !err.can_auto_retry() {
            self.logger.debug(format_args!(
                "Failed to {}, non-retryable error encountered ({err}).",
                self.description
            ));
            return Next::Stop(err);
        }

        if err.can_recover() {
            if let Err(failure) = self.recover(&err) {
                return Next::Stop(failure);
            }
        }

        match self.policy.decide(attempt, &err) {
            RetryDecision::GiveUp(reason) => {
                self.logger.error(format_args!(
                    "Failed to {}, giving up after {attempt} attempt(s): {reason} ({err}).",
                    self.description
                ));
                Next::Stop(self.give_up(err, attempt, &reason))
            }
            RetryDecision::Retry(delay) => {
                if err.code() == ErrorCode::Pending {
                    self.logger.debug(format_args!(
                        "Still waiting to {} ({}), checking again in {delay:?}...",
                        self.description,
                        err.message()
                    ));
                } else {
                    self.logger.info(format_args!(
                        "Failed to {}, retrying in {delay:?}... ({err})",
                        self.description
                    ));
                }
                Next::Wait(delay, err)
            }
        }
    }

    // Without a registered recovery action the error is retried like any other.
    fn recover(&mut self, err: &TypedError) -> Result<()> {
        let Some(recovery) = self.recovery.as_mut() else {
            return Ok(());
        };

        self.logger.warning(format_args!(
            "Attempting recovery from {} while trying to {}...",
            err.code(),
            self.description
        ));
        let started = Instant::now();
        match recovery.recover(err) {
            Ok(()) => {
                self.logger.info(format_args!(
                    "Recovered from {} in {:?}.",
                    err.code(),
                    started.elapsed()
                ));
                Ok(())
            }
            Err(cause) => {
                let failure = TypedError::wrap(
                    cause,
                    ErrorCode::Unidentified,
                    format!(
                        "failed to recover from {} while trying to {}",
                        err.code(),
                        self.description
                    ),
                );
                self.logger
                    .error(format_args!("Recovery failed, giving up ({failure})."));
                Err(failure)
            }
        }
    }

    fn give_up(&self, err: TypedError, attempt: u32, reason: &str) -> TypedError {
        let code = err.code();
        TypedError::wrap(
            err,
            code,
            format!(
                "failed to {}, giving up after {attempt} attempt(s): {reason}",
                self.description
            ),
        )
    }
}

/// Run `operation` until it succeeds or `policy` gives up.
///
/// `logger` may be `None`, in which case nothing is logged. Every error
/// returned is typed.
pub fn retry<T, E, F>(
    description: &str,
    logger: Option<&dyn Logger>,
    policy: RetryPolicy,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> std::result::Result<T, E>,
    E: Into<BoxError>,
{
    let mut retrier = Retrier::new(description, policy);
    if let Some(logger) = logger {
        retrier = retrier.with_logger(logger);
    }
    retrier.run(operation)
}

/// Async counterpart of [`retry`].
pub async fn retry_async<T, E, F, Fut>(
    description: &str,
    logger: Option<&dyn Logger>,
    policy: RetryPolicy,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<BoxError>,
{
    let mut retrier = Retrier::new(description, policy);
    if let Some(logger) = logger {
        retrier = retrier.with_logger(logger);
    }
    retrier.run_async(operation).await
}

/// Poll `check` until it reports a value.
///
/// `check` returns `Ok(None)` while the awaited condition does not hold yet;
/// that is retried as [`ErrorCode::Pending`] until the policy gives up.
pub fn wait_until<T, E, F>(
    description: &str,
    logger: Option<&dyn Logger>,
    policy: RetryPolicy,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> std::result::Result<Option<T>, E>,
    E: Into<BoxError>,
{
    retry(description, logger, policy, || match check() {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(BoxError::from(TypedError::new(
            ErrorCode::Pending,
            format!("condition for {description} not met yet"),
        ))),
        Err(err) => Err(err.into()),
    })
}

fn wait_blocking(delay: Duration, tokens: &[CancellationToken]) {
    if delay.is_zero() {
        return;
    }
    if tokens.is_empty() {
        std::thread::sleep(delay);
        return;
    }

    let deadline = Instant::now() + delay;
    loop {
        if tokens.iter().any(CancellationToken::is_cancelled) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}

async fn wait_async(delay: Duration, tokens: &[CancellationToken]) {
    if delay.is_zero() {
        return;
    }
    if tokens.is_empty() {
        tokio::time::sleep(delay).await;
        return;
    }

    let cancelled = select_all(tokens.iter().map(|token| Box::pin(token.cancelled())));
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancelled => {}
    }
}
