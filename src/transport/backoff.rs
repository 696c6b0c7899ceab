//! Exponential backoff for transport reconnection

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            multiplier: 2.0,
            jitter_factor: 0.5,
        }
    }
}

/// Exponential backoff calculator with jitter.
///
/// Delay `n` (zero-based) is `initial * multiplier^n`, capped at `max_delay_ms`,
/// then spread by up to `jitter_factor` in either direction and capped again.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Get the next delay duration
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(32) as i32;
        self.attempt = self.attempt.saturating_add(1);

        let max = self.config.max_delay_ms.max(1) as f64;
        let base = (self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent)).min(max);

        let jitter_range = base * self.config.jitter_factor.clamp(0.0, 1.0);
        let delay = if jitter_range > 0.0 {
            base + rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            base
        };

        Duration::from_millis(delay.clamp(1.0, max) as u64)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial: u64, max: u64) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: initial,
            max_delay_ms: max,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_first_delay_is_initial() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(250, 10_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(1000, 5000));

        for _ in 0..10 {
            backoff.next_delay();
        }

        assert_eq!(backoff.next_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1500,
            multiplier: 2.0,
            jitter_factor: 0.5,
        };
        let mut backoff = ExponentialBackoff::with_config(config);

        for _ in 0..50 {
            let delay = backoff.next_delay().as_millis();
            assert!((1..=1500).contains(&delay), "delay {} out of bounds", delay);
        }
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(100, 10_000));

        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
