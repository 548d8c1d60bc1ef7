use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::PricingConfig;

/// Rough token estimate used for cost reporting (4 characters per token).
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars / 4) as u64
}

/// Gateway counters; updated lock-free from any task.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    calls: AtomicU64,
    cache_hits: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    // USD * 1e9 to keep sub-cent precision in an integer
    cost_nano_usd: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub cache_hits: u64,
    pub errors: u64,
    pub retries: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

fn nano_usd(tokens: u64, per_million: f64) -> u64 {
    (tokens as f64 * per_million * 1_000.0).round() as u64
}

impl GatewayMetrics {
    /// One external dispatch with `prompt_chars` of input.
    pub fn record_call(&self, prompt_chars: usize, pricing: &PricingConfig) {
        let tokens = estimate_tokens(prompt_chars);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(tokens, Ordering::Relaxed);
        self.cost_nano_usd
            .fetch_add(nano_usd(tokens, pricing.input_per_million), Ordering::Relaxed);
    }

    pub fn record_output(&self, response_chars: usize, pricing: &PricingConfig) {
        let tokens = estimate_tokens(response_chars);
        self.output_tokens.fetch_add(tokens, Ordering::Relaxed);
        self.cost_nano_usd
            .fetch_add(nano_usd(tokens, pricing.output_per_million), Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            estimated_cost_usd: self.cost_nano_usd.load(Ordering::Relaxed) as f64 / 1e9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_estimate() {
        let metrics = GatewayMetrics::default();
        let pricing = PricingConfig {
            input_per_million: 1.0,
            output_per_million: 2.0,
        };
        metrics.record_call(4_000_000, &pricing);
        metrics.record_output(400_000, &pricing);

        let snap = metrics.snapshot();
        assert_eq!(snap.calls, 1);
        assert_eq!(snap.input_tokens, 1_000_000);
        assert_eq!(snap.output_tokens, 100_000);
        assert!((snap.estimated_cost_usd - 1.2).abs() < 1e-9);
    }
}
