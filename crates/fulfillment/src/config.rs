//! Processor and supplier configuration.
//!
//! Defaults match production values; every knob can be overridden from the
//! environment (`FULFILLMENT_*`, `SUPPLIER_*`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_POLL_INTERVAL_MS: &str = "FULFILLMENT_POLL_INTERVAL_MS";
pub const ENV_BATCH_SIZE: &str = "FULFILLMENT_BATCH_SIZE";
pub const ENV_MAX_ATTEMPTS: &str = "FULFILLMENT_MAX_ATTEMPTS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "FULFILLMENT_REQUEST_TIMEOUT_MS";
pub const ENV_BACKOFF_BASE_MS: &str = "FULFILLMENT_BACKOFF_BASE_MS";
pub const ENV_BACKOFF_CAP_MS: &str = "FULFILLMENT_BACKOFF_CAP_MS";
pub const ENV_BACKOFF_JITTER_MS: &str = "FULFILLMENT_BACKOFF_JITTER_MS";
pub const ENV_SUPPLIER_BASE_URL: &str = "SUPPLIER_BASE_URL";
pub const ENV_SUPPLIER_TIMEOUT_MS: &str = "SUPPLIER_REQUEST_TIMEOUT_MS";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid unsigned integer: {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Retry delay parameters (see `backoff::BackoffPolicy`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay of the first retry, doubled on every further attempt.
    pub base_delay: Duration,
    /// Upper bound of the exponential component.
    pub cap_delay: Duration,
    /// Jitter is drawn uniformly from `[0, max_jitter)`.
    pub max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

/// Fulfillment processor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentConfig {
    /// How often the scheduler ticks
    pub poll_interval: Duration,
    /// Maximum jobs (and therefore supplier calls) per tick
    pub batch_size: usize,
    /// Attempt budget per job
    pub max_attempts: u32,
    /// Hard timeout around a single supplier call
    pub request_timeout: Duration,
    /// Retry delay parameters
    pub backoff: BackoffConfig,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            batch_size: 5,
            max_attempts: 15,
            request_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }
}

impl FulfillmentConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Load from process environment, falling back to defaults per key.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (environment, test fixtures, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = read_u64(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = read_u64(&lookup, ENV_BATCH_SIZE)? {
            config.batch_size = usize::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                key: ENV_BATCH_SIZE,
                value: n.to_string(),
            })?;
        }
        if let Some(n) = read_u64(&lookup, ENV_MAX_ATTEMPTS)? {
            config.max_attempts = u32::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                key: ENV_MAX_ATTEMPTS,
                value: n.to_string(),
            })?;
        }
        if let Some(ms) = read_u64(&lookup, ENV_REQUEST_TIMEOUT_MS)? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, ENV_BACKOFF_BASE_MS)? {
            config.backoff.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, ENV_BACKOFF_CAP_MS)? {
            config.backoff.cap_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, ENV_BACKOFF_JITTER_MS)? {
            config.backoff.max_jitter = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be > 0".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request_timeout must be > 0".to_string()));
        }
        if self.backoff.base_delay > self.backoff.cap_delay {
            return Err(ConfigError::Invalid(
                "backoff base_delay must not exceed cap_delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Supplier HTTP endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierConfig {
    /// Base URL without trailing slash, e.g. `https://supplier.example/api`
    pub base_url: String,
    /// Client-level timeout; the worker applies its own hard timeout on top.
    pub request_timeout: Duration,
}

impl SupplierConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_SUPPLIER_BASE_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_SUPPLIER_BASE_URL))?;
        let mut config = Self::new(base_url.trim());
        if let Some(ms) = read_u64(&lookup, ENV_SUPPLIER_TIMEOUT_MS)? {
            config.request_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn read_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
    }
}
