//! Reconnect policy: exponential backoff with jitter and a delay cap.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;
pub const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// When false, a dropped or failed connection is not retried.
    pub enabled: bool,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,
    /// Give up after this many consecutive failed attempts (None = never).
    pub max_retries: Option<u32>,
    /// Symmetric jitter range, 0.0 to 1.0 (0.2 = ±20%).
    pub jitter_factor: f64,
    /// A connection that stays up this long resets the failure count. One
    /// that drops sooner counts as a failed attempt.
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: None,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            stable_after: DEFAULT_STABLE_AFTER,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| failures <= max)
    }

    /// Consecutive-failure count after a session that was up for `uptime`.
    pub fn failures_after_drop(&self, failures: u32, uptime: Duration) -> u32 {
        if uptime >= self.stable_after {
            0
        } else {
            failures.saturating_add(1)
        }
    }

    /// Delay before retry number `attempt` (zero-based), with jitter drawn
    /// from the thread RNG.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_random(attempt, rand::random::<f64>())
    }

    /// `min(max_delay, base * 2^attempt) * (1 + (2r - 1) * jitter)` for
    /// `r` in `[0, 1)`.
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let exponential = base_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(max_ms);

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let random = random.clamp(0.0, 1.0);
        let factor = 1.0 + (random * 2.0 - 1.0) * jitter;
        let millis = (capped as f64 * factor).round().max(0.0) as u64;
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectPolicy {
        ReconnectPolicy {
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn delays_double_until_the_cap() {
        let p = no_jitter();
        assert_eq!(p.delay_with_random(0, 0.5), Duration::from_secs(1));
        assert_eq!(p.delay_with_random(1, 0.5), Duration::from_secs(2));
        assert_eq!(p.delay_with_random(2, 0.5), Duration::from_secs(4));
        assert_eq!(p.delay_with_random(4, 0.5), Duration::from_secs(16));
        assert_eq!(p.delay_with_random(5, 0.5), Duration::from_secs(30));
        assert_eq!(p.delay_with_random(40, 0.5), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_range() {
        let p = ReconnectPolicy::default();
        let low = p.delay_with_random(3, 0.0);
        let high = p.delay_with_random(3, 0.999_999);
        assert_eq!(low, Duration::from_millis(6400));
        assert!(high <= Duration::from_millis(9600));
        assert!(high > Duration::from_millis(9500));

        for attempt in 0..20 {
            let d = p.delay_for(attempt);
            assert!(d <= p.max_delay.mul_f64(1.0 + p.jitter_factor));
        }
    }

    #[test]
    fn max_retries_bounds_attempts() {
        let p = ReconnectPolicy {
            max_retries: Some(3),
            ..Default::default()
        };
        assert!(p.should_retry(1));
        assert!(p.should_retry(3));
        assert!(!p.should_retry(4));

        assert!(ReconnectPolicy::default().should_retry(10_000));
        assert!(!ReconnectPolicy::disabled().should_retry(0));
    }

    #[test]
    fn short_lived_sessions_count_as_failures() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.failures_after_drop(0, Duration::from_millis(10)), 1);
        assert_eq!(p.failures_after_drop(2, Duration::from_secs(1)), 3);
        assert_eq!(p.failures_after_drop(2, DEFAULT_STABLE_AFTER), 0);
        assert_eq!(p.failures_after_drop(7, Duration::from_secs(60)), 0);
    }
}
