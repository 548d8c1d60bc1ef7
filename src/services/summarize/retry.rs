//! Retry policy for classified external calls.

use std::time::Duration;

use crate::adapters::llm::CallOutcome;
use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Decide what to do after call number `attempt` (1-based) ended with
    /// `outcome`. `jitter` in `[0, 1)` adds up to one base delay on top of the
    /// capped backoff. Only transient outcomes are retried.
    pub fn decide(&self, outcome: &CallOutcome, attempt: u32, jitter: f64) -> RetryDecision {
        match outcome {
            CallOutcome::Transient(_) if attempt < self.max_attempts => {
                let extra = self.base_delay.mul_f64(jitter.clamp(0.0, 1.0));
                RetryDecision::RetryAfter(self.backoff(attempt) + extra)
            }
            _ => RetryDecision::GiveUp,
        }
    }
}
