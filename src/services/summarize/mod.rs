//! Summarization Cache & Rate Limiter, and the Orchestrator driving it
//!
//! Every external summarization call goes through one [`SummaryGateway`]:
//! content-addressed cache, single flight per key, shared rolling-window
//! budget, bounded retries with jittered backoff.

mod gateway;
mod metrics;
mod orchestrator;
mod rate_limit;
mod response;
mod retry;
mod truncate;

pub use gateway::{cache_key, GatewayResponse, SummaryGateway};
pub use metrics::{estimate_tokens, GatewayMetrics, MetricsSnapshot};
pub use orchestrator::{BatchReport, Orchestrator};
pub use rate_limit::RateLimiter;
pub use response::{json_span, parse_summary};
pub use retry::{RetryDecision, RetryPolicy};
pub use truncate::{cap_body, render_thread, RenderedThread};
