use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Rolling-window limiter shared by every caller of one gateway.
///
/// Keeps the dispatch instants of the last window; a caller is admitted when
/// fewer than `max_calls` of them are younger than `window`, otherwise it
/// sleeps until the oldest one ages out.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    dispatched: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            dispatched: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// Wait for a free slot and claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut log = self.dispatched.lock().await;
                let now = Instant::now();
                while log
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    log.pop_front();
                }
                if log.len() < self.max_calls {
                    log.push_back(now);
                    return;
                }
                match log.front() {
                    Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            debug!("Rate limit reached, waiting {:?}", wait);
            sleep(wait).await;
        }
    }

    /// Dispatches counted in the current window.
    pub async fn in_window(&self) -> usize {
        let log = self.dispatched.lock().await;
        let now = Instant::now();
        log.iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }
}
