//! Retry settings
//!
//! Default delays and limits per [`CallKind`](crate::CallKind). Settings are
//! read in layers, each overriding the one before: the built-in defaults, an
//! optional `ovirt-retry.toml`, then `OVIRT_RETRY_*` variables (`__` separates
//! sections, so `OVIRT_RETRY_LONG__TIMEOUT_SECS=3600` sets `long.timeout_secs`).
//!
//! ```no_run
//! use ovirt_retry::{CallKind, config::ConfigLoader};
//!
//! let settings = ConfigLoader::load_default()?;
//! let policy = settings.policy(CallKind::Long);
//! # Ok::<(), ovirt_retry::ConfigError>(())
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::{BackoffConfig, CallConfig, ConfigLoader, RetryConfig};
