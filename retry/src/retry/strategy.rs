//! Retry strategies
//!
//! A strategy is consulted after every failed attempt and answers two
//! questions: may the executor try again, and how long should it wait first.
//! Strategies are stateful and belong to a single call; build a fresh
//! [`RetryPolicy`] for every call.

use std::fmt;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio_util::sync::CancellationToken;

use crate::error::TypedError;

/// Answer of a strategy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after waiting at least this long.
    Retry(Duration),
    /// No attempts remain; the string says why.
    GiveUp(String),
}

/// Policy object consulted by the retry executor.
pub trait RetryStrategy: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Called once before the first attempt.
    fn start(&mut self) {}

    /// Called after attempt number `attempt` (1-based) failed with `err`.
    fn on_failure(&mut self, attempt: u32, err: &TypedError) -> RetryDecision;

    /// Token whose cancellation should cut the inter-attempt wait short.
    fn cancellation(&self) -> Option<&CancellationToken> {
        None
    }
}

/// Exponentially growing delay between attempts. Never gives up on its own.
pub struct ExponentialBackoff {
    builder: ExponentialBuilder,
    max_delay: Duration,
    delays: Option<backon::ExponentialBackoff>,
}

impl ExponentialBackoff {
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

    /// Start at one second and multiply by `factor` after every failure.
    pub fn new(factor: f32) -> Self {
        Self::with_delays(factor, Self::DEFAULT_INITIAL_DELAY, Self::DEFAULT_MAX_DELAY)
    }

    /// Factors below 1.0 and non-finite factors are treated as 1.0.
    pub fn with_delays(factor: f32, initial_delay: Duration, max_delay: Duration) -> Self {
        let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        let builder = ExponentialBuilder::default()
            .with_min_delay(initial_delay)
            .with_max_delay(max_delay)
            .with_factor(factor)
            .with_max_times(usize::MAX);
        Self {
            builder,
            max_delay,
            delays: None,
        }
    }

    /// Add random jitter to every delay.
    pub fn with_jitter(mut self) -> Self {
        self.builder = self.builder.with_jitter();
        self
    }
}

impl fmt::Debug for ExponentialBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExponentialBackoff")
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &'static str {
        "exponential_backoff"
    }

    fn start(&mut self) {
        self.delays = Some(self.builder.build());
    }

    fn on_failure(&mut self, _attempt: u32, _err: &TypedError) -> RetryDecision {
        let builder = self.builder;
        let delay = self
            .delays
            .get_or_insert_with(|| builder.build())
            .next()
            .unwrap_or(self.max_delay);
        RetryDecision::Retry(delay)
    }
}

/// Give up once `limit` attempts have failed.
///
/// A limit of zero behaves like one: the first attempt always runs.
#[derive(Debug, Clone, Copy)]
pub struct MaxTries {
    limit: u32,
}

impl MaxTries {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
        }
    }
}

impl RetryStrategy for MaxTries {
    fn name(&self) -> &'static str {
        "max_tries"
    }

    fn on_failure(&mut self, attempt: u32, _err: &TypedError) -> RetryDecision {
        if attempt >= self.limit {
            RetryDecision::GiveUp(format!("maximum of {} attempt(s) reached", self.limit))
        } else {
            RetryDecision::Retry(Duration::ZERO)
        }
    }
}

/// Give up once `limit` has elapsed since the call started.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    limit: Duration,
    started: Option<Instant>,
}

impl Timeout {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: None,
        }
    }
}

impl RetryStrategy for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    fn on_failure(&mut self, _attempt: u32, _err: &TypedError) -> RetryDecision {
        let started = *self.started.get_or_insert_with(Instant::now);
        if started.elapsed() >= self.limit {
            RetryDecision::GiveUp(format!("timeout of {:?} reached", self.limit))
        } else {
            RetryDecision::Retry(Duration::ZERO)
        }
    }
}

/// Give up once the token is cancelled. Waits are interrupted on cancellation.
#[derive(Debug, Clone)]
pub struct Cancellation {
    token: CancellationToken,
}

impl Cancellation {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl RetryStrategy for Cancellation {
    fn name(&self) -> &'static str {
        "cancellation"
    }

    fn on_failure(&mut self, _attempt: u32, _err: &TypedError) -> RetryDecision {
        if self.token.is_cancelled() {
            RetryDecision::GiveUp("operation cancelled".to_string())
        } else {
            RetryDecision::Retry(Duration::ZERO)
        }
    }

    fn cancellation(&self) -> Option<&CancellationToken> {
        Some(&self.token)
    }
}

/// Ordered set of strategies used for one call.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use ovirt_retry::RetryPolicy;
///
/// let policy = RetryPolicy::new()
///     .exponential_backoff(2.0)
///     .max_tries(10)
///     .timeout(Duration::from_secs(300));
/// assert_eq!(policy.names(), vec!["exponential_backoff", "max_tries", "timeout"]);
/// ```
#[derive(Debug, Default)]
pub struct RetryPolicy {
    strategies: Vec<Box<dyn RetryStrategy>>,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strategy: impl RetryStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn exponential_backoff(self, factor: f32) -> Self {
        self.with(ExponentialBackoff::new(factor))
    }

    pub fn max_tries(self, limit: u32) -> Self {
        self.with(MaxTries::new(limit))
    }

    pub fn timeout(self, limit: Duration) -> Self {
        self.with(Timeout::new(limit))
    }

    pub fn cancel_on(self, token: CancellationToken) -> Self {
        self.with(Cancellation::new(token))
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub(crate) fn start(&mut self) {
        for strategy in &mut self.strategies {
            strategy.start();
        }
    }

    /// Ask every strategy. The first give-up wins; otherwise the longest wait.
    ///
    /// All strategies are consulted even after one gives up so their state
    /// stays in step with the attempt count.
    pub(crate) fn decide(&mut self, attempt: u32, err: &TypedError) -> RetryDecision {
        let mut give_up = None;
        let mut wait = Duration::ZERO;

        for strategy in &mut self.strategies {
            match strategy.on_failure(attempt, err) {
                RetryDecision::Retry(delay) => wait = wait.max(delay),
                RetryDecision::GiveUp(reason) => {
                    give_up.get_or_insert(reason);
                }
            }
        }

        match give_up {
            Some(reason) => RetryDecision::GiveUp(reason),
            None => RetryDecision::Retry(wait),
        }
    }

    pub(crate) fn cancellation_tokens(&self) -> Vec<CancellationToken> {
        self.strategies
            .iter()
            .filter_map(|s| s.cancellation().cloned())
            .collect()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.strategies
            .iter()
            .filter_map(|s| s.cancellation())
            .any(CancellationToken::is_cancelled)
    }
}

impl From<Vec<Box<dyn RetryStrategy>>> for RetryPolicy {
    fn from(strategies: Vec<Box<dyn RetryStrategy>>) -> Self {
        Self { strategies }
    }
}
