//! Retry logic for oVirt engine calls
//!
//! This module provides:
//! - Error classification (engine message rules plus structural fallbacks)
//! - Composable retry strategies (exponential backoff, attempt cap,
//!   overall timeout, cancellation)
//! - The retry executor with recovery for expired SSO tokens
//! - Default policies per call kind

pub mod classifier;
pub mod defaults;
pub mod executor;
pub mod strategy;

pub use classifier::{Identification, classify, identify};
pub use defaults::CallKind;
pub use executor::{Recovery, Retrier, retry, retry_async, wait_until};
pub use strategy::{
    Cancellation, ExponentialBackoff, MaxTries, RetryDecision, RetryPolicy, RetryStrategy,
    Timeout,
};
