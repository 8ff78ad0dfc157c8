//! Retry policy selection for connect attempts.

use std::time::Duration;

/// Retry behavior applied inside [`Transport::open`](crate::Transport::open).
///
/// The connection manager selects the policy before each open and resets it
/// to [`RetryPolicy::NoRetry`] once connected, so steady-state failures are
/// never masked by hidden transport-level retries.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
    /// The transport must not retry internally.
    #[default]
    NoRetry,
    /// The transport absorbs short-lived flaps during the handshake with
    /// increasing, jittered delays.
    ExponentialBackoffWithJitter(BackoffConfig),
}

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Attempts per `open` call before the failure is reported to the caller.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        // Add ±25% jitter.
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}
