//! Error classification and retry for oVirt engine calls
//!
//! Every call against the engine goes through [`retry`] (or one of its
//! siblings): failures are classified into a [`TypedError`] carrying an
//! [`ErrorCode`], terminal codes fail fast, transient ones are retried under
//! a [`RetryPolicy`], and an expired SSO token triggers a [`Recovery`]
//! action before the next attempt.
//!
//! Library defaults per call kind come from [`RetryConfig`], loaded in
//! layers by [`ConfigLoader`].

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod error;
pub mod logger;
pub mod retry;
pub mod sdk;

pub use config::{ConfigError, ConfigLoader, RetryConfig};
pub use error::{BoxError, ErrorCode, Result, TypedError, has_error_code};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use retry::{
    Cancellation, CallKind, ExponentialBackoff, MaxTries, Recovery, Retrier, RetryDecision,
    RetryPolicy, RetryStrategy, Timeout, classify, identify, retry, retry_async, wait_until,
};
pub use sdk::SdkError;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
