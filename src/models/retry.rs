use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Strategy deciding how long to wait before retry attempt `n` (1-indexed).
///
/// Implemented by [`RetryPolicy`] (exponential with jitter),
/// [`LinearBackoff`], and [`FixedBackoff`]. The queue backend and the retry
/// executor both take the strategy as an injected dependency.
pub trait Backoff: Send + Sync {
    /// Returns the delay before the `attempt`-th retry.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with jitter.
///
/// `delay(n) = min(max, initial * multiplier^(n-1))`, then uniformly
/// sampled from `[delay * (1 - jitter), delay * (1 + jitter)]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Initial delay in milliseconds.
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds.
    pub max_delay_ms: u32,
    /// Multiplier for exponential growth (must be positive).
    pub multiplier: f64,
    /// Jitter factor in `[0.0, 1.0]`. 0.1 means +/-10% randomness.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given parameters.
    ///
    /// `jitter` is clamped to `[0.0, 1.0]`.
    #[must_use]
    pub const fn new(initial_delay_ms: u32, max_delay_ms: u32, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Calculates the jittered delay for a retry attempt (1-indexed).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Calculates the jittered delay with a caller-supplied RNG.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped_ms = self.base_delay_ms(attempt);
        let jitter = self.jitter.abs();
        let factor = if jitter == 0.0 {
            1.0
        } else {
            1.0 + rng.gen_range(-jitter..=jitter)
        };
        Duration::from_millis(f64_to_millis((capped_ms * factor).max(0.0)))
    }

    /// Calculates the delay without jitter, for deterministic tests.
    #[must_use]
    pub fn delay_without_jitter(&self, attempt: u32) -> Duration {
        Duration::from_millis(f64_to_millis(self.base_delay_ms(attempt)))
    }

    fn base_delay_ms(&self, attempt: u32) -> f64 {
        // Cap the exponent so multiplier^n stays finite.
        const MAX_EXP: i32 = 30;
        let exp = i32::try_from(attempt.saturating_sub(1)).map_or(MAX_EXP, |e| e.min(MAX_EXP));
        let base = f64::from(self.initial_delay_ms) * self.multiplier.powi(exp);
        base.min(f64::from(self.max_delay_ms))
    }
}

impl Backoff for RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }
}

/// Linear backoff: `initial + (n - 1) * step`, capped at `max`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinearBackoff {
    pub initial_delay_ms: u32,
    pub step_ms: u32,
    pub max_delay_ms: u32,
}

impl LinearBackoff {
    #[must_use]
    pub const fn new(initial_delay_ms: u32, step_ms: u32, max_delay_ms: u32) -> Self {
        Self {
            initial_delay_ms,
            step_ms,
            max_delay_ms,
        }
    }
}

impl Backoff for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let steps = u64::from(attempt.saturating_sub(1));
        let ms = u64::from(self.initial_delay_ms) + steps * u64::from(self.step_ms);
        Duration::from_millis(ms.min(u64::from(self.max_delay_ms)))
    }
}

/// Fixed backoff: the same delay for every attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay_ms: u32,
}

impl FixedBackoff {
    #[must_use]
    pub const fn new(delay_ms: u32) -> Self {
        Self { delay_ms }
    }
}

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::from_millis(u64::from(self.delay_ms))
    }
}

/// Converts f64 milliseconds to u64 with saturation.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn f64_to_millis(val: f64) -> u64 {
    if !val.is_finite() || val < 0.0 {
        0
    } else if val >= f64::from(u32::MAX) {
        u64::from(u32::MAX)
    } else {
        val as u64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_delay_ms, 100);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter, 0.1);
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let policy = RetryPolicy::default();

        // Attempt 1: initial delay.
        assert_eq!(policy.delay_without_jitter(1), Duration::from_millis(100));
        // Attempt 2: 100 * 2 = 200ms.
        assert_eq!(policy.delay_without_jitter(2), Duration::from_millis(200));
        // Attempt 3: 100 * 4 = 400ms.
        assert_eq!(policy.delay_without_jitter(3), Duration::from_millis(400));
        // Attempt 6: 100 * 32 = 3200ms.
        assert_eq!(policy.delay_without_jitter(6), Duration::from_millis(3200));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::default();

        // Attempt 10 would be 100 * 512 = 51200ms, capped at 30000ms.
        assert_eq!(
            policy.delay_without_jitter(10),
            Duration::from_millis(30_000)
        );
        assert_eq!(
            policy.delay_without_jitter(30),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_without_jitter(0), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();

        for _ in 0..100 {
            let delay_ms = policy.delay(1).as_millis() as f64;
            assert!(
                (90.0..=110.0).contains(&delay_ms),
                "delay {delay_ms} outside [90, 110]"
            );
        }
    }

    #[test]
    fn test_jitter_bounds_at_cap() {
        let policy = RetryPolicy::default();

        for _ in 0..100 {
            let delay_ms = policy.delay(20).as_millis() as f64;
            assert!(
                (27_000.0..=33_000.0).contains(&delay_ms),
                "delay {delay_ms} outside [27000, 33000]"
            );
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy::new(1000, 60_000, 2.0, 0.0);
        for _ in 0..10 {
            assert_eq!(policy.delay(1), Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_jitter_clamped_at_construction() {
        let policy = RetryPolicy::new(100, 1000, 2.0, 5.0);
        assert_eq!(policy.jitter, 1.0);
    }

    #[test]
    fn test_custom_multiplier() {
        let policy = RetryPolicy::new(500, 10_000, 3.0, 0.0);
        assert_eq!(policy.delay_without_jitter(1), Duration::from_millis(500));
        assert_eq!(policy.delay_without_jitter(2), Duration::from_millis(1500));
        assert_eq!(policy.delay_without_jitter(3), Duration::from_millis(4500));
        // 500 * 27 = 13500ms, capped at 10000ms.
        assert_eq!(
            policy.delay_without_jitter(4),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = LinearBackoff::new(100, 50, 1000);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(150));
        assert_eq!(backoff.delay(5), Duration::from_millis(300));
        // 100 + 99 * 50 = 5050ms, capped at 1000ms.
        assert_eq!(backoff.delay(100), Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = FixedBackoff::new(250);
        assert_eq!(backoff.delay(1), Duration::from_millis(250));
        assert_eq!(backoff.delay(42), Duration::from_millis(250));
    }

    #[test]
    fn test_policy_serialization() {
        let policy = RetryPolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        let decoded: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, decoded);
    }
}
