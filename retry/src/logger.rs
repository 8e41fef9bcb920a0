//! Leveled logger consumed by the retry executor
//!
//! The executor reports progress through [`Logger`] rather than calling
//! `tracing` directly so that embedders can route retry chatter into their
//! own log sink (the Terraform provider forwards it to the plugin log).
//! [`TracingLogger`] is the default sink.

use std::fmt;

/// Leveled log sink. Implementations must not panic; a failing sink never
/// aborts a retry loop.
pub trait Logger: Send + Sync {
    fn debug(&self, args: fmt::Arguments<'_>);
    fn info(&self, args: fmt::Arguments<'_>);
    fn warning(&self, args: fmt::Arguments<'_>);
    fn error(&self, args: fmt::Arguments<'_>);
}

/// Forwards to `tracing` events under the `ovirt_retry` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "ovirt_retry", "{args}");
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(target: "ovirt_retry", "{args}");
    }

    fn warning(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "ovirt_retry", "{args}");
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(target: "ovirt_retry", "{args}");
    }
}

/// Discards everything. Used when no logger is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _args: fmt::Arguments<'_>) {}
    fn info(&self, _args: fmt::Arguments<'_>) {}
    fn warning(&self, _args: fmt::Arguments<'_>) {}
    fn error(&self, _args: fmt::Arguments<'_>) {}
}

pub(crate) static NOOP_LOGGER: NoopLogger = NoopLogger;
