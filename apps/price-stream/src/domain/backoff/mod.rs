//! Reconnection Backoff
//!
//! Exponential backoff for re-opening a dropped price stream:
//!
//! ```text
//! delay(attempt) = min(initial * multiplier^(attempt - 1), max)
//! ```
//!
//! With the defaults (1s, x1.5, 60s cap) the sequence is 1000ms, 1500ms,
//! 2250ms, 3375ms, ... reaching the cap on the 12th attempt. Optional jitter
//! randomizes each delay by ±`jitter_factor` and is still clamped to the cap.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction (e.g., 0.1 = ±10% randomization). 0 disables it.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 1.5,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor,
        }
    }
}

/// Deterministic delay for the given 1-based `attempt`.
///
/// An `attempt` of 0 is treated as 1. Results that overflow or are not finite
/// clamp to `max_delay`. A multiplier below 1 (or not finite) is treated as 1,
/// so the sequence never shrinks.
#[must_use]
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.max(1) - 1).unwrap_or(i32::MAX);
    let multiplier = if config.multiplier.is_finite() && config.multiplier >= 1.0 {
        config.multiplier
    } else {
        1.0
    };

    #[allow(clippy::cast_precision_loss)]
    let initial_millis = config.initial_delay.as_millis() as f64;
    let scaled = (initial_millis * multiplier.powi(exponent)).round();

    let max_millis = u64::try_from(config.max_delay.as_millis()).unwrap_or(u64::MAX);
    if !scaled.is_finite() || scaled < 0.0 {
        return Duration::from_millis(max_millis);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = scaled as u64;
    Duration::from_millis(millis.min(max_millis))
}

/// Attempt counter plus the delay sequence it drives.
///
/// # Example
///
/// ```rust
/// use price_stream::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Duration::from_millis(1000));
/// assert_eq!(policy.next_delay(), Duration::from_millis(1500));
///
/// // Transport opened again
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Count one more failed attempt and return the delay before retrying.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);
        let delay = backoff_delay(&self.config, self.attempt_count);
        self.apply_jitter(delay)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Number of failed attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// The configuration driving this policy.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);

        #[allow(clippy::cast_precision_loss)]
        let max_millis = self.config.max_delay.as_millis() as f64;
        let adjusted_millis = (base_millis + jitter).clamp(1.0, max_millis.max(1.0));

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.multiplier - 1.5).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn default_sequence() {
        let config = ReconnectConfig::default();
        let millis: Vec<u128> = (1..=4)
            .map(|attempt| backoff_delay(&config, attempt).as_millis())
            .collect();
        assert_eq!(millis, vec![1000, 1500, 2250, 3375]);
    }

    #[test]
    fn reaches_cap_on_twelfth_attempt() {
        let config = ReconnectConfig::default();
        // 1000 * 1.5^10 ≈ 57665
        assert_eq!(backoff_delay(&config, 11), Duration::from_millis(57_665));
        assert_eq!(backoff_delay(&config, 12), Duration::from_secs(60));
        assert_eq!(backoff_delay(&config, 100), Duration::from_secs(60));
    }

    #[test]
    fn attempt_zero_behaves_like_one() {
        let config = ReconnectConfig::default();
        assert_eq!(backoff_delay(&config, 0), backoff_delay(&config, 1));
    }

    #[test]
    fn huge_attempt_clamps_to_max() {
        let config = ReconnectConfig::default();
        assert_eq!(backoff_delay(&config, u32::MAX), config.max_delay);
    }

    #[test]
    fn policy_counts_and_resets() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        assert_eq!(policy.next_delay(), Duration::from_millis(1000));
        assert_eq!(policy.next_delay(), Duration::from_millis(1500));
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });

            let millis = policy.next_delay().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn jitter_never_exceeds_max() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            jitter_factor: 0.5,
            ..ReconnectConfig::default()
        });
        for _ in 0..50 {
            assert!(policy.next_delay() <= Duration::from_secs(60));
        }
    }

    #[test]
    fn shrinking_multipliers_hold_the_initial_delay() {
        for multiplier in [0.5, 0.0, -2.0, f64::NAN] {
            let config = ReconnectConfig {
                multiplier,
                ..ReconnectConfig::default()
            };
            let millis: Vec<u128> = (1..=5)
                .map(|attempt| backoff_delay(&config, attempt).as_millis())
                .collect();
            assert_eq!(millis, vec![1000; 5], "multiplier {multiplier}");
        }
    }

    proptest! {
        #[test]
        fn delays_are_non_decreasing_and_capped(attempt in 1u32..500) {
            let config = ReconnectConfig::default();
            let current = backoff_delay(&config, attempt);
            let next = backoff_delay(&config, attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(next <= config.max_delay);
        }

        #[test]
        fn custom_configs_respect_cap(
            initial_ms in 1u64..10_000,
            max_ms in 1u64..120_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..200,
        ) {
            let config = ReconnectConfig::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
                0.0,
            );
            prop_assert!(backoff_delay(&config, attempt) <= config.max_delay);
        }

        #[test]
        fn any_multiplier_is_non_decreasing(
            multiplier in -10.0f64..10.0,
            attempt in 1u32..100,
        ) {
            let config = ReconnectConfig {
                multiplier,
                ..ReconnectConfig::default()
            };
            prop_assert!(backoff_delay(&config, attempt + 1) >= backoff_delay(&config, attempt));
        }
    }
}
