//! Exponential backoff with symmetric jitter.
//!
//! `delay(attempt) = min(max, base * multiplier^attempt) * (1 ± jitter)`

use crate::config::BackoffConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Source of uniformly distributed values in `[0, 1)`.
pub type RandomSource = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Computes retry delays from a 0-indexed attempt number.
#[derive(Clone)]
pub struct Backoff {
    config: BackoffConfig,
    random: RandomSource,
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl Backoff {
    /// Creates a calculator that draws jitter from the thread-local RNG.
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_random(config, Arc::new(rand::random::<f64>))
    }

    /// Creates a calculator with an explicit random source, for deterministic tests.
    pub fn with_random(config: BackoffConfig, random: RandomSource) -> Self {
        Self { config, random }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// The delay before retry number `attempt`, without jitter.
    pub fn capped(&self, attempt: u32) -> Duration {
        if self.config.base.is_zero() {
            return Duration::ZERO;
        }
        let max = self.config.max.as_secs_f64();
        let exp = self.config.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let raw = self.config.base.as_secs_f64() * exp;
        // powi overflows to inf well before u32::MAX attempts
        let capped = if raw.is_finite() { raw.min(max) } else { max };
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// The delay before retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.capped(attempt);
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || capped.is_zero() {
            return capped;
        }

        let r = (self.random)().clamp(0.0, 1.0);
        let spread = capped.as_secs_f64() * jitter;
        let offset = (2.0 * r - 1.0) * spread;
        Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(value: f64) -> RandomSource {
        Arc::new(move || value)
    }

    #[test]
    fn doubles_until_cap() {
        let b = Backoff::new(BackoffConfig::without_jitter());
        let secs: Vec<u64> = (0..7).map(|a| b.delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn first_attempt_is_base() {
        let b = Backoff::new(BackoffConfig {
            base: Duration::from_millis(250),
            ..BackoffConfig::without_jitter()
        });
        assert_eq!(b.delay(0), Duration::from_millis(250));
    }

    #[test]
    fn huge_attempts_stay_capped() {
        let b = Backoff::new(BackoffConfig::without_jitter());
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_bounds_follow_random_source() {
        let config = BackoffConfig {
            jitter: 0.5,
            ..BackoffConfig::default()
        };
        let low = Backoff::with_random(config.clone(), fixed(0.0));
        let mid = Backoff::with_random(config.clone(), fixed(0.5));
        let high = Backoff::with_random(config, fixed(1.0));

        assert_eq!(low.delay(2), Duration::from_secs(2));
        assert_eq!(mid.delay(2), Duration::from_secs(4));
        assert_eq!(high.delay(2), Duration::from_secs(6));
    }

    #[test]
    fn random_jitter_stays_in_band() {
        let b = Backoff::new(BackoffConfig {
            jitter: 0.2,
            ..BackoffConfig::default()
        });
        for attempt in 0..10 {
            let capped = b.capped(attempt).as_secs_f64();
            for _ in 0..50 {
                let d = b.delay(attempt).as_secs_f64();
                assert!(d >= capped * 0.8 - 1e-9, "{d} below band for {capped}");
                assert!(d <= capped * 1.2 + 1e-9, "{d} above band for {capped}");
            }
        }
    }

    #[test]
    fn zero_base_means_zero_delay() {
        let b = Backoff::new(BackoffConfig {
            base: Duration::ZERO,
            ..BackoffConfig::default()
        });
        for attempt in [0, 5, 1000, u32::MAX] {
            assert_eq!(b.delay(attempt), Duration::ZERO);
        }
    }
}
