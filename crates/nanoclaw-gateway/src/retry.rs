//! Backoff policy for scheduled offline queue retries

use nanoclaw_core::RetryConfig;
use std::time::Duration;

/// Exponential backoff between retry passes
///
/// The delay starts at `interval` and grows by `multiplier` after every pass
/// in which nothing was delivered, up to `max_backoff`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            interval: config.interval,
            max_backoff: config.max_backoff.max(config.interval),
            multiplier: config.multiplier.max(1.0),
        }
    }

    /// Delay before the next pass after `failed_passes` consecutive failed passes
    pub fn delay(&self, failed_passes: u32) -> Duration {
        if failed_passes == 0 {
            return self.interval;
        }
        let exponent = failed_passes.min(i32::MAX as u32) as i32;
        let secs = self.interval.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_grows_then_caps() {
        let p = policy();
        assert_eq!(p.delay(0), Duration::from_secs(10));
        assert_eq!(p.delay(1), Duration::from_secs(20));
        assert_eq!(p.delay(2), Duration::from_secs(40));
        assert_eq!(p.delay(3), Duration::from_secs(60));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_from_config_clamps_nonsense() {
        let config = RetryConfig {
            enabled: true,
            interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(5),
            multiplier: 0.5,
        };
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.max_backoff, Duration::from_secs(30));
        assert_eq!(p.delay(4), Duration::from_secs(30));
    }

    #[test]
    fn test_default_matches_config_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.interval, Duration::from_secs(300));
        assert_eq!(p.max_backoff, Duration::from_secs(1800));
    }
}
