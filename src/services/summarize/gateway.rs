//! Summarization gateway: content-addressed cache, per-key single flight,
//! shared rate limit and classified retries in front of a [`SummaryBackend`].
//!
//! All state lives in the gateway value; several gateways can coexist (one
//! per test, for instance) without sharing anything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::metrics::{GatewayMetrics, MetricsSnapshot};
use super::rate_limit::RateLimiter;
use super::response::{json_span, parse_summary};
use super::retry::{RetryDecision, RetryPolicy};
use crate::adapters::llm::{CallOutcome, SummaryBackend};
use crate::adapters::sqlite::{cache, DbPool};
use crate::config::{AppConfig, PricingConfig};
use crate::error::{DigestError, Result};
use crate::types::SummaryPayload;

/// Hex SHA-256 of `prompt || 0x00 || model`.
pub fn cache_key(prompt: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub payload: SummaryPayload,
    pub model: String,
    pub key: String,
    pub cached: bool,
}

pub struct SummaryGateway {
    pool: DbPool,
    backend: Arc<dyn SummaryBackend>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    call_timeout: Duration,
    pricing: PricingConfig,
    metrics: GatewayMetrics,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    closed: AtomicBool,
}

impl SummaryGateway {
    pub fn new(pool: DbPool, backend: Arc<dyn SummaryBackend>, config: &AppConfig) -> Self {
        info!(
            model = backend.model(),
            max_calls = config.rate_limit.max_calls,
            window_secs = config.rate_limit.window_secs,
            "Summary gateway ready"
        );
        Self {
            pool,
            backend,
            limiter: RateLimiter::new(config.rate_limit.max_calls, config.rate_limit.window()),
            policy: RetryPolicy::from_config(&config.rate_limit),
            call_timeout: config.llm.timeout(),
            pricing: config.pricing.clone(),
            metrics: GatewayMetrics::default(),
            in_flight: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting calls and return the final counters.
    pub fn shutdown(&self) -> MetricsSnapshot {
        self.closed.store(true, Ordering::SeqCst);
        let snapshot = self.metrics.snapshot();
        info!(
            calls = snapshot.calls,
            cache_hits = snapshot.cache_hits,
            errors = snapshot.errors,
            cost_usd = snapshot.estimated_cost_usd,
            "Summary gateway shut down"
        );
        snapshot
    }

    /// Summarize `user_prompt`, from cache when possible.
    ///
    /// At most one external call is made per cache key at any time; callers
    /// racing on the same key wait and then read the cached result. `force`
    /// evicts the cached entry first.
    pub async fn summarize(&self, system_prompt: &str, user_prompt: &str, force: bool) -> Result<GatewayResponse> {
        if self.is_closed() {
            return Err(DigestError::ShutDown);
        }

        let prompt = format!("{}\n\n{}", system_prompt, user_prompt);
        let key = cache_key(&prompt, self.model());

        if force {
            let conn = self.pool.get()?;
            if cache::evict(&conn, &key)? {
                debug!(key = %key, "Evicted cache entry");
            }
        } else if let Some(hit) = self.lookup(&key)? {
            return Ok(hit);
        }

        let lock = self.key_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            // Re-check: the previous holder of this key may have filled the cache
            let cached = if force { Ok(None) } else { self.lookup(&key) };
            match cached {
                Ok(Some(hit)) => Ok(hit),
                Ok(None) => self.call_with_retry(&key, system_prompt, user_prompt, prompt.len()).await,
                Err(e) => Err(e),
            }
        };
        self.release_key(&key, lock).await;
        result
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.in_flight.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_key(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut map = self.in_flight.lock().await;
        // One reference in the map plus ours: nobody else is waiting
        if Arc::strong_count(&lock) <= 2 {
            map.remove(key);
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<GatewayResponse>> {
        let conn = self.pool.get()?;
        let Some(entry) = cache::get_entry(&conn, key)? else {
            return Ok(None);
        };
        match parse_summary(&entry.response) {
            Ok(payload) => {
                cache::record_hit(&conn, key)?;
                self.metrics.record_cache_hit();
                debug!(key = %key, "Cache hit");
                Ok(Some(GatewayResponse {
                    payload,
                    model: entry.model,
                    key: key.to_string(),
                    cached: true,
                }))
            }
            Err(e) => {
                warn!(key = %key, "Dropping unreadable cache entry: {}", e);
                cache::evict(&conn, key)?;
                Ok(None)
            }
        }
    }

    async fn call_with_retry(
        &self,
        key: &str,
        system_prompt: &str,
        user_prompt: &str,
        prompt_chars: usize,
    ) -> Result<GatewayResponse> {
        let mut attempt: u32 = 0;
        loop {
            if self.is_closed() {
                return Err(DigestError::ShutDown);
            }
            attempt += 1;

            self.limiter.acquire().await;
            self.metrics.record_call(prompt_chars, &self.pricing);
            debug!(key = %key, attempt, "Dispatching summarization call");

            let outcome = match tokio::time::timeout(
                self.call_timeout,
                self.backend.complete(system_prompt, user_prompt),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => CallOutcome::Transient(format!("timed out after {:?}", self.call_timeout)),
            };

            let failure = match outcome {
                CallOutcome::Success(text) => return self.accept(key, &text),
                other => other,
            };

            match self.policy.decide(&failure, attempt, rand::random::<f64>()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(key = %key, attempt, ?delay, "Transient summarization failure: {:?}", failure);
                    self.metrics.record_retry();
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    self.metrics.record_error();
                    return Err(match failure {
                        CallOutcome::Transient(msg) => {
                            DigestError::Transient(format!("{} (gave up after {} attempts)", msg, attempt))
                        }
                        CallOutcome::Permanent(msg) | CallOutcome::Success(msg) => DigestError::Permanent(msg),
                    });
                }
            }
        }
    }

    /// Parse a successful completion and cache it; unparseable text is not cached.
    fn accept(&self, key: &str, text: &str) -> Result<GatewayResponse> {
        self.metrics.record_output(text.len(), &self.pricing);

        let payload = match parse_summary(text) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_error();
                return Err(e);
            }
        };

        let conn = self.pool.get()?;
        let stored = json_span(text).unwrap_or(text);
        if !cache::insert_if_absent(&conn, key, self.model(), stored)? {
            debug!(key = %key, "Cache entry already present; keeping the first writer");
        }

        Ok(GatewayResponse {
            payload,
            model: self.model().to_string(),
            key: key.to_string(),
            cached: false,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::sqlite::create_memory_pool;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Backend that replays scripted outcomes, then repeats `fallback`.
    pub(crate) struct ScriptedBackend {
        pub calls: AtomicUsize,
        script: std::sync::Mutex<VecDeque<CallOutcome>>,
        fallback: CallOutcome,
        delay: Duration,
    }

    impl ScriptedBackend {
        pub(crate) fn new(script: Vec<CallOutcome>, fallback: CallOutcome) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: std::sync::Mutex::new(script.into()),
                fallback,
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn ok(json: &str) -> Self {
            Self::new(vec![], CallOutcome::Success(json.to_string()))
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SummaryBackend for ScriptedBackend {
        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> CallOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    pub(crate) const GOOD: &str = r#"{"tldr":"Fix slab leak","key_points":["adds kfree"],"importance":"high"}"#;

    pub(crate) fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.rate_limit.max_calls = 100;
        config.rate_limit.max_attempts = 3;
        config.rate_limit.base_delay_ms = 100;
        config.rate_limit.max_delay_ms = 1_000;
        config.llm.timeout_secs = 5;
        config
    }

    fn gateway(backend: Arc<ScriptedBackend>, config: &AppConfig) -> SummaryGateway {
        SummaryGateway::new(create_memory_pool().unwrap(), backend, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_identical_call_is_cache_hit() {
        let backend = Arc::new(ScriptedBackend::ok(GOOD));
        let gw = gateway(backend.clone(), &test_config());

        let first = gw.summarize("sys", "thread text", false).await.unwrap();
        let second = gw.summarize("sys", "thread text", false).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.key, second.key);
        assert_eq!(second.payload.tldr, "Fix slab leak");
        assert_eq!(backend.count(), 1);

        let snap = gw.snapshot();
        assert_eq!(snap.calls, 1);
        assert_eq!(snap.cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_calls_single_flight() {
        let backend = Arc::new(ScriptedBackend::ok(GOOD).with_delay(Duration::from_millis(500)));
        let gw = Arc::new(gateway(backend.clone(), &test_config()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gw = gw.clone();
            handles.push(tokio::spawn(async move {
                gw.summarize("sys", "same prompt", false).await
            }));
        }
        let mut fresh = 0;
        for h in handles {
            if !h.await.unwrap().unwrap().cached {
                fresh += 1;
            }
        }

        assert_eq!(backend.count(), 1);
        assert_eq!(fresh, 1);
        assert!(gw.in_flight.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let backend = Arc::new(ScriptedBackend::new(
            vec![
                CallOutcome::Transient("HTTP 503".into()),
                CallOutcome::Transient("HTTP 429".into()),
            ],
            CallOutcome::Success(GOOD.into()),
        ));
        let gw = gateway(backend.clone(), &test_config());

        let response = gw.summarize("sys", "retry me", false).await.unwrap();
        assert_eq!(response.payload.tldr, "Fix slab leak");
        assert_eq!(backend.count(), 3);
        assert_eq!(gw.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_and_permanent() {
        let backend = Arc::new(ScriptedBackend::new(vec![], CallOutcome::Transient("HTTP 502".into())));
        let gw = gateway(backend.clone(), &test_config());
        let err = gw.summarize("sys", "flaky", false).await.unwrap_err();
        assert!(matches!(err, DigestError::Transient(_)));
        assert!(err.is_transient());
        assert_eq!(backend.count(), 3);

        let backend = Arc::new(ScriptedBackend::new(vec![], CallOutcome::Permanent("HTTP 400".into())));
        let gw = gateway(backend.clone(), &test_config());
        let err = gw.summarize("sys", "rejected", false).await.unwrap_err();
        assert!(matches!(err, DigestError::Permanent(_)));
        assert_eq!(backend.count(), 1);
        assert_eq!(gw.snapshot().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let backend = Arc::new(ScriptedBackend::ok(GOOD).with_delay(Duration::from_secs(30)));
        let gw = gateway(backend.clone(), &test_config());
        let err = gw.summarize("sys", "slow", false).await.unwrap_err();
        assert!(matches!(err, DigestError::Transient(_)));
        assert_eq!(backend.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_response_not_cached_or_retried() {
        let backend = Arc::new(ScriptedBackend::new(
            vec![CallOutcome::Success("I cannot summarize this.".into())],
            CallOutcome::Success(GOOD.into()),
        ));
        let gw = gateway(backend.clone(), &test_config());

        let err = gw.summarize("sys", "text", false).await.unwrap_err();
        assert!(matches!(err, DigestError::InvalidResponse(_)));
        assert_eq!(backend.count(), 1);

        // Nothing was cached, so the next call goes out again
        let ok = gw.summarize("sys", "text", false).await.unwrap();
        assert!(!ok.cached);
        assert_eq!(backend.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_evicts_and_recalls() {
        let backend = Arc::new(ScriptedBackend::ok(GOOD));
        let gw = gateway(backend.clone(), &test_config());

        gw.summarize("sys", "text", false).await.unwrap();
        let forced = gw.summarize("sys", "text", true).await.unwrap();
        assert!(!forced.cached);
        assert_eq!(backend.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_rate_limit_delays_excess_calls() {
        let mut config = test_config();
        config.rate_limit.max_calls = 2;
        config.rate_limit.window_secs = 60;
        let backend = Arc::new(ScriptedBackend::ok(GOOD));
        let gw = gateway(backend.clone(), &config);

        let start = tokio::time::Instant::now();
        for prompt in ["one", "two", "three"] {
            gw.summarize("sys", prompt, false).await.unwrap();
        }
        assert_eq!(backend.count(), 3);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_calls() {
        let backend = Arc::new(ScriptedBackend::ok(GOOD));
        let gw = gateway(backend.clone(), &test_config());
        gw.summarize("sys", "text", false).await.unwrap();

        let snap = gw.shutdown();
        assert_eq!(snap.calls, 1);
        assert!(matches!(
            gw.summarize("sys", "text", false).await,
            Err(DigestError::ShutDown)
        ));
    }

    #[test]
    fn test_cache_key_depends_on_model() {
        assert_ne!(cache_key("p", "a"), cache_key("p", "b"));
        assert_eq!(cache_key("p", "a"), cache_key("p", "a"));
        assert_eq!(cache_key("p", "a").len(), 64);
    }
}
