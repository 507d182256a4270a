//! Sizing and lifecycle limits for a `ConnectionPool`

use std::time::Duration;

use serde::{Deserialize, Serialize};
use templar_core::{Result, TemplarError};

const DEFAULT_MIN_SIZE: usize = 1;
const DEFAULT_MAX_SIZE: usize = 10;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 10 * 60 * 1000;
const DEFAULT_MAX_LIFETIME_MS: u64 = 30 * 60 * 1000;

/// How many backend connections a pool may hold and for how long.
///
/// Every field may be omitted in a config file; missing fields fall back to
/// the defaults (1 idle connection kept warm, at most 10 open, 30s to acquire,
/// idle connections closed after 10 minutes, any connection recycled after
/// 30 minutes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections `warm_up` opens ahead of demand
    min_size: usize,
    /// Upper bound on connections open at once, idle or borrowed
    max_size: usize,
    /// How long `get` waits for a free slot before `PoolExhausted`
    acquire_timeout_ms: u64,
    idle_timeout_ms: u64,
    /// `None` keeps connections regardless of age
    max_lifetime_ms: Option<u64>,
}

impl PoolConfig {
    /// # Panics
    ///
    /// If `max_size` is 0 or `min_size` exceeds it. Configurations read from
    /// files should go through `validate` instead.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        let config = Self {
            min_size,
            max_size,
            ..Self::unchecked_defaults()
        };
        if let Err(e) = config.check_sizes() {
            panic!("{}", e);
        }
        config
    }

    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    pub fn without_max_lifetime(mut self) -> Self {
        self.max_lifetime_ms = None;
        self
    }

    /// Sizing check for deserialized configurations, which bypass `new`
    pub fn validate(&self) -> Result<()> {
        self.check_sizes().map_err(TemplarError::Configuration)
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }

    fn unchecked_defaults() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_lifetime_ms: Some(DEFAULT_MAX_LIFETIME_MS),
        }
    }

    fn check_sizes(&self) -> std::result::Result<(), String> {
        if self.max_size == 0 {
            return Err(format!("pool max_size must be greater than 0, got {}", self.max_size));
        }
        if self.min_size > self.max_size {
            return Err(format!(
                "pool min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::unchecked_defaults()
    }
}
