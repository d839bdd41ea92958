//! Configuration management for ThrottleX.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, ThrottleError};
use crate::policy::{AlgorithmKind, Policy};

/// Prefix for environment variable overrides, e.g.
/// `THROTTLEX__DEFAULT_POLICY__CAPACITY=50`.
const ENV_PREFIX: &str = "THROTTLEX";

/// Main configuration for ThrottleX.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Policy applied to keys with no persisted policy
    #[serde(default)]
    pub default_policy: DefaultPolicyConfig,

    /// Optional YAML file of policies to provision at startup
    #[serde(default)]
    pub policies_path: Option<String>,

    /// In-memory storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// The process-wide default policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPolicyConfig {
    #[serde(default = "default_kind")]
    pub kind: AlgorithmKind,

    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Tokens per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u64,

    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

impl Default for DefaultPolicyConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
            window_seconds: default_window_seconds(),
        }
    }
}

fn default_kind() -> AlgorithmKind {
    AlgorithmKind::TokenBucket
}

fn default_capacity() -> u64 {
    100
}

fn default_refill_rate() -> u64 {
    10
}

fn default_window_seconds() -> u64 {
    60
}

impl DefaultPolicyConfig {
    /// Produce the default policy for a specific key.
    pub fn bind(&self, key: &str) -> Policy {
        Policy {
            key: key.to_string(),
            kind: self.kind.clone(),
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            window_seconds: self.window_seconds,
        }
    }

    /// The default must itself be a valid policy.
    pub fn validate(&self) -> Result<()> {
        self.bind("default")
            .validate()
            .map_err(|e| ThrottleError::Config(format!("Invalid default policy: {}", e)))
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// How often expired sliding window buckets are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Buckets older than this many seconds are dropped by the sweeper
    #[serde(default = "default_bucket_retention")]
    pub bucket_retention_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            bucket_retention_secs: default_bucket_retention(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_bucket_retention() -> u64 {
    3600
}

impl ThrottleConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottleConfig =
            serde_yaml::from_str(yaml).map_err(|e| ThrottleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an optional config file and `THROTTLEX__*` environment variables
    /// over the built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&str>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(env);

        let config: ThrottleConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.default_policy.validate()?;
        if self.storage.bucket_retention_secs == 0 {
            return Err(ThrottleError::Config(
                "storage.bucket_retention_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// How long window buckets must be kept: the configured retention,
    /// stretched to cover a sliding window default policy.
    pub fn bucket_retention(&self) -> Duration {
        let mut secs = self.storage.bucket_retention_secs;
        if self.default_policy.kind == AlgorithmKind::SlidingWindow {
            secs = secs.max(self.default_policy.window_seconds);
        }
        Duration::from_secs(secs)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
