//! Reconnection backoff policy.

use std::time::Duration;

/// Exponential backoff parameters for a contract monitor.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay floor in milliseconds.
    pub floor_ms: u64,
    /// Delay cap in milliseconds.
    pub cap_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Attempts after which recovery stops permanently.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor_ms: 1000,
            cap_ms: 30_000,
            multiplier: 1.5,
            max_attempts: 50,
        }
    }
}

impl BackoffPolicy {
    /// Delay before re-entering Connecting for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_delay_ms(
            attempt,
            self.floor_ms,
            self.cap_ms,
            self.multiplier,
        ))
    }

    /// True once the attempt counter has exceeded the cap.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

/// Pure backoff computation: `min(floor * multiplier^attempt, cap)` ms.
pub fn backoff_delay_ms(attempt: u32, floor_ms: u64, cap_ms: u64, multiplier: f64) -> u64 {
    let raw = floor_ms as f64 * multiplier.powi(attempt as i32);
    if raw >= cap_ms as f64 {
        cap_ms
    } else {
        raw as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backoff_table() {
        // delay(n) = min(1000 * 1.5^n, 30000)
        assert_eq!(backoff_delay_ms(0, 1000, 30_000, 1.5), 1000);
        assert_eq!(backoff_delay_ms(1, 1000, 30_000, 1.5), 1500);
        assert_eq!(backoff_delay_ms(2, 1000, 30_000, 1.5), 2250);
        assert_eq!(backoff_delay_ms(3, 1000, 30_000, 1.5), 3375);
        assert_eq!(backoff_delay_ms(8, 1000, 30_000, 1.5), 25_628);
        // 1.5^9 crosses the cap
        assert_eq!(backoff_delay_ms(9, 1000, 30_000, 1.5), 30_000);
        assert_eq!(backoff_delay_ms(40, 1000, 30_000, 1.5), 30_000);
    }

    #[test]
    fn test_backoff_monotone() {
        let mut prev = 0;
        for n in 0..60 {
            let d = backoff_delay_ms(n, 1000, 30_000, 1.5);
            assert!(d >= prev, "delay decreased at attempt {n}");
            prev = d;
        }
    }

    #[test]
    fn test_policy_exhaustion() {
        let policy = BackoffPolicy::default();
        assert!(!policy.exhausted(50));
        assert!(policy.exhausted(51));
    }

    #[test]
    fn test_policy_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(1500));
        assert_eq!(policy.delay(20), Duration::from_millis(30_000));
    }
}
