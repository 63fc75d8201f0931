//! Retry delay policy: capped exponential growth plus uniform jitter.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BackoffConfig;

/// Computes how long a job waits before its next supplier call.
///
/// `delay(attempt) = min(base * 2^(attempt - 1), cap) + jitter`, where jitter is
/// uniform in `[0, max_jitter)`. Attempts are 1-indexed: pass the attempt count
/// *after* incrementing it, so the first retry waits `base + jitter`.
///
/// Only the jitter term is random; [`BackoffPolicy::seeded`] makes it
/// reproducible.
#[derive(Debug)]
pub struct BackoffPolicy {
    base_delay: Duration,
    cap_delay: Duration,
    max_jitter: Duration,
    rng: Mutex<StdRng>,
}

impl BackoffPolicy {
    pub fn new(config: &BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic jitter sequence, for tests and replays.
    pub fn seeded(config: &BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &BackoffConfig, rng: StdRng) -> Self {
        Self {
            base_delay: config.base_delay,
            cap_delay: config.cap_delay,
            max_jitter: config.max_jitter,
            rng: Mutex::new(rng),
        }
    }

    /// The non-random component for `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.cap_delay, |d| d.min(self.cap_delay))
    }

    /// Full delay for `attempt`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.jitter()
    }

    /// Upper bound (exclusive of the last jitter millisecond) of any `delay()`.
    pub fn max_delay(&self) -> Duration {
        self.cap_delay + self.max_jitter
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_millis(rng.random_range(0..max_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}
