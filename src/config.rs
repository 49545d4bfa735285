//! Centralized configuration for weftdb.
//!
//! Goals:
//! - Single place for tunables instead of scattering env lookups.
//! - Config::from_env() reads WEFT_* variables; builder setters override.
//!
//! The only tunables today govern the open-retry loop used when another
//! handle holds a file locked: the delay between attempts and an optional
//! attempt bound. An unbounded loop (attempts = 0) reproduces the classic
//! behavior; a bound gives callers a way out of indefinite waits.

use std::time::Duration;

use crate::consts::RETRY_DELAY_MS;

#[derive(Clone, Debug)]
pub struct Config {
    /// Delay between attempts to open a contended file, in milliseconds.
    /// Env: WEFT_RETRY_DELAY_MS (default 150)
    pub retry_delay_ms: u64,

    /// Maximum open attempts before giving up; 0 means retry forever.
    /// Env: WEFT_RETRY_ATTEMPTS (default 0)
    pub retry_attempts: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_delay_ms: RETRY_DELAY_MS,
            retry_attempts: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("WEFT_RETRY_DELAY_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.retry_delay_ms = n;
            }
        }
        if let Ok(v) = std::env::var("WEFT_RETRY_ATTEMPTS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.retry_attempts = n;
            }
        }

        cfg
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u64) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.retry_delay_ms),
            max_attempts: self.retry_attempts,
        }
    }
}

/// Resolved retry parameters handed to the lock layer.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// 0 = unbounded.
    pub max_attempts: u64,
}
