//! Reconnection Backoff
//!
//! Exponential backoff with jitter for re-establishing the push bridge
//! connection after an unexpected drop.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::WebSocketSettings;

/// Default jitter as a fraction of the base delay.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on the base delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the base delay (0.1 = ±10%).
    pub jitter: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_websocket_settings(&WebSocketSettings::default())
    }
}

impl ReconnectConfig {
    /// Build from connection settings.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter: DEFAULT_JITTER,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// Same parameters without jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }
}

/// Tracks attempts since the last successful connection.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.base_delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        Some(self.jittered(base))
    }

    /// Forget past attempts after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn base_delay(&self, attempt: u32) -> Duration {
        let max_ms = self.config.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled =
            self.config.initial_delay.as_millis() as f64 * self.config.multiplier.powi(exponent);

        let millis = if scaled.is_finite() && scaled > 0.0 {
            scaled.min(max_ms)
        } else if scaled.is_finite() {
            0.0
        } else {
            max_ms
        };

        Duration::from_millis(millis.round() as u64)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range(-self.config.jitter..=self.config.jitter);
        base.mul_f64((1.0 + factor).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let mut policy = ReconnectPolicy::new(config(0));
        let delays: Vec<u128> = (0..6)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000, 4000]);
        assert_eq!(policy.attempt_count(), 6);
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(config(2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut policy = ReconnectPolicy::new(config(2));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let mut cfg = config(0);
        cfg.jitter = 0.1;
        let mut policy = ReconnectPolicy::new(cfg);
        for _ in 0..50 {
            policy.reset();
            let delay = policy.next_delay().unwrap().as_millis();
            assert!((449..=551).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn from_settings_uses_defaults() {
        let cfg = ReconnectConfig::default();
        assert_eq!(cfg.initial_delay, Duration::from_millis(500));
        assert_eq!(cfg.max_delay, Duration::from_secs(30));
        assert_eq!(cfg.max_attempts, 0);
        assert!(cfg.without_jitter().jitter.abs() < f64::EPSILON);
    }
}
