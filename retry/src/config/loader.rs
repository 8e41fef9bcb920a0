use crate::config::error::{ConfigError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay schedule shared by every call kind
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Plain reads (lookups, listings)
    #[serde(default = "default_read")]
    pub read: CallConfig,

    /// Mutating calls
    #[serde(default = "default_write")]
    pub write: CallConfig,

    /// Long running waits (VM status, disk status, image transfers)
    #[serde(default = "default_long")]
    pub long: CallConfig,
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied after every failed attempt
    #[serde(default = "default_factor")]
    pub factor: f32,

    /// Upper bound for a single delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomize delays
    #[serde(default)]
    pub jitter: bool,
}

/// Limits for one kind of call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Maximum attempts; unset means no cap besides the timeout
    #[serde(default)]
    pub max_tries: Option<u32>,

    /// Total time budget in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_factor() -> f32 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_read() -> CallConfig {
    CallConfig {
        max_tries: Some(10),
        timeout_secs: 300,
    }
}
fn default_write() -> CallConfig {
    CallConfig {
        max_tries: Some(10),
        timeout_secs: 300,
    }
}
fn default_long() -> CallConfig {
    CallConfig {
        max_tries: None,
        timeout_secs: 1200,
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            read: default_read(),
            write: default_write(),
            long: default_long(),
        }
    }
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl CallConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RetryConfig {
    /// Reject values that would make every call fail or spin.
    pub fn validate(&self) -> Result<()> {
        let backoff = &self.backoff;
        if !backoff.factor.is_finite() || backoff.factor < 1.0 {
            return Err(ConfigError::invalid(
                "backoff.factor",
                format!("must be at least 1.0, got {}", backoff.factor),
            ));
        }
        if backoff.initial_delay_ms > backoff.max_delay_ms {
            return Err(ConfigError::invalid(
                "backoff.initial_delay_ms",
                format!("exceeds backoff.max_delay_ms ({})", backoff.max_delay_ms),
            ));
        }

        for (name, call) in [("read", &self.read), ("write", &self.write), ("long", &self.long)] {
            if call.timeout_secs == 0 {
                return Err(ConfigError::invalid(
                    format!("{name}.timeout_secs"),
                    "must be greater than 0",
                ));
            }
            if call.max_tries == Some(0) {
                return Err(ConfigError::invalid(
                    format!("{name}.max_tries"),
                    "must be greater than 0 when set",
                ));
            }
        }

        Ok(())
    }
}

/// Reads [`RetryConfig`] from defaults, an optional file and the environment
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Built-in defaults, overridden by the file (if set, it must exist),
    /// overridden by `OVIRT_RETRY_*` variables. The result is validated.
    pub fn load(&self) -> Result<RetryConfig> {
        let mut builder = Config::builder();

        // Layer 1: Defaults
        let defaults_json = serde_json::to_string(&RetryConfig::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        // Layer 2: Config file
        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: Environment, double underscore for nesting
        // Example: OVIRT_RETRY_READ__MAX_TRIES=5
        builder = builder.add_source(
            Environment::with_prefix("OVIRT_RETRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: RetryConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            target: "ovirt_retry",
            file = ?self.config_path,
            "loaded retry configuration"
        );
        Ok(config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./ovirt-retry.toml
    /// 2. XDG config: ~/.config/ovirt-retry/config.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./ovirt-retry.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("ovirt-retry").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<RetryConfig> {
        let loader = match Self::find_config_file() {
            Some(config_path) => ConfigLoader::new().with_file(config_path),
            None => ConfigLoader::new(),
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
