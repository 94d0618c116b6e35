//! Retry classification and backoff.

use {
    rand::Rng,
    std::time::Duration,
    trellis_channels::SendError,
    trellis_config::DeliveryConfig,
    crate::receipt::FailureKind,
};

/// What the pipeline should do with a failed send attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Retry after the backoff delay.
    RetryAfter(Duration),
    /// Rate limited: hold the whole lane for the channel-provided window,
    /// then retry without consuming extra backoff.
    Defer(Duration),
    /// Give up with the given failure kind.
    Fail(FailureKind),
}

/// Exponential backoff with jitter, attempts capped by config.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base:         Duration,
    max:          Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base:         Duration::from_millis(config.base_backoff_ms),
            max:          Duration::from_millis(config.max_backoff_ms),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts failures
    /// so far starting at 1. Jittered by up to 10% to avoid thundering
    /// herds against a recovering channel.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let raw = self
            .base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max);
        let jitter = rand::rng().random_range(0.0..=0.1);
        raw.mul_f64(1.0 + jitter).min(self.max)
    }

    /// Classify a send failure after `attempt` total attempts.
    #[must_use]
    pub fn classify(&self, error: &SendError, attempt: u32) -> RetryDecision {
        match error {
            SendError::RateLimited { retry_after } => {
                if attempt >= self.max_attempts {
                    RetryDecision::Fail(FailureKind::RateLimited)
                } else {
                    RetryDecision::Defer(*retry_after)
                }
            },
            SendError::Transient { .. } => {
                if attempt >= self.max_attempts {
                    // Retryable in principle; the receipt keeps that
                    // distinct from a hard rejection.
                    RetryDecision::Fail(FailureKind::Exhausted)
                } else {
                    RetryDecision::RetryAfter(self.backoff(attempt))
                }
            },
            SendError::Rejected { .. } | SendError::Auth { .. } => {
                RetryDecision::Fail(FailureKind::Terminal)
            },
        }
    }
}
