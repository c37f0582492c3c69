// src/backoff.rs
//! Reconnect delay policy: exponential growth with jitter, capped.

use crate::config::MonitorConfig;
use rand::Rng;
use std::time::Duration;

/// Lower bound of the jitter multiplier
pub const JITTER_MIN: f64 = 1.10;
/// Upper bound of the jitter multiplier
pub const JITTER_MAX: f64 = 1.30;

/// Compute the delay before reconnect attempt `attempt`.
///
/// `base * 2^attempt`, multiplied by a uniform factor in
/// [`JITTER_MIN`, `JITTER_MAX`] when jitter is enabled, clamped to `max`.
pub fn delay<R: Rng + ?Sized>(
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter_enabled: bool,
    rng: &mut R,
) -> Duration {
    let base_secs = base.as_secs_f64();
    let max_secs = max.as_secs_f64();

    // 2^1023 is the largest finite power of two for f64
    let exp = attempt.min(1023) as i32;
    let mut secs = base_secs * 2f64.powi(exp);

    if jitter_enabled {
        secs *= rng.gen_range(JITTER_MIN..=JITTER_MAX);
    }

    if !secs.is_finite() || secs > max_secs {
        secs = max_secs;
    }

    Duration::from_secs_f64(secs.max(0.0))
}

/// Reconnect backoff configuration for one connection manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: bool,
    disabled: bool,
}

impl BackoffPolicy {
    /// Exponential policy with jitter enabled
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: true,
            disabled: false,
        }
    }

    /// Always reconnect immediately.
    pub fn disabled() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter: false,
            disabled: true,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        if config.disable_backoff {
            Self::disabled()
        } else {
            Self::new(config.reconnect_timeout, config.max_reconnect_timeout)
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        if self.disabled {
            return Duration::ZERO;
        }
        delay(attempt, self.base, self.max, self.jitter, rng)
    }
}
