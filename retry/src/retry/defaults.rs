//! Library default policies per kind of engine call

use crate::config::{CallConfig, RetryConfig};
use crate::retry::strategy::{ExponentialBackoff, MaxTries, RetryPolicy, Timeout};

/// Kind of call a default policy is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Lookups and listings.
    Read,
    /// Calls that change engine state.
    Write,
    /// Waiting for a VM, disk or transfer to reach a state.
    Long,
}

impl RetryConfig {
    fn call(&self, kind: CallKind) -> &CallConfig {
        match kind {
            CallKind::Read => &self.read,
            CallKind::Write => &self.write,
            CallKind::Long => &self.long,
        }
    }

    /// Fresh default strategies for `kind`.
    pub fn policy(&self, kind: CallKind) -> RetryPolicy {
        let mut backoff = ExponentialBackoff::with_delays(
            self.backoff.factor,
            self.backoff.initial_delay(),
            self.backoff.max_delay(),
        );
        if self.backoff.jitter {
            backoff = backoff.with_jitter();
        }

        let call = self.call(kind);
        let mut policy = RetryPolicy::new().with(backoff);
        if let Some(limit) = call.max_tries {
            policy = policy.with(MaxTries::new(limit));
        }
        policy.with(Timeout::new(call.timeout()))
    }

    /// Caller supplied strategies replace the defaults entirely.
    pub fn resolve(&self, kind: CallKind, overrides: Option<RetryPolicy>) -> RetryPolicy {
        overrides.unwrap_or_else(|| self.policy(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_read_policy() {
        let policy = RetryConfig::default().policy(CallKind::Read);
        assert_eq!(policy.names(), vec!["exponential_backoff", "max_tries", "timeout"]);
    }

    #[test]
    fn test_long_policy_has_no_try_cap() {
        let policy = RetryConfig::default().policy(CallKind::Long);
        assert_eq!(policy.names(), vec!["exponential_backoff", "timeout"]);
    }

    #[test]
    fn test_override_replaces_defaults() {
        let config = RetryConfig::default();
        let policy = config.resolve(CallKind::Write, Some(RetryPolicy::new().max_tries(1)));
        assert_eq!(policy.names(), vec!["max_tries"]);

        let policy = config.resolve(CallKind::Write, None);
        assert_eq!(policy.len(), 3);
    }

    #[test]
    fn test_empty_override_is_kept() {
        let policy = RetryConfig::default().resolve(CallKind::Read, Some(RetryPolicy::new()));
        assert!(policy.is_empty());
    }
}
