//! Per-service rate limiting, bounded concurrency, and retry with backoff.
//!
//! Infrastructure for the outermost remote call of a service; nothing wraps
//! calls in retries implicitly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tracing::warn;

/// Sliding-window rate limiter: at most `calls` within `period`.
pub struct RateLimiter {
    calls: usize,
    period: Duration,
    timestamps: Mutex<Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(calls: usize, period: Duration) -> Self {
        Self {
            calls,
            period,
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Wait until a call slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                timestamps.retain(|ts| now.duration_since(*ts) < self.period);

                if timestamps.len() < self.calls {
                    timestamps.push(now);
                    None
                } else {
                    // Oldest slot frees up first.
                    timestamps
                        .first()
                        .map(|oldest| self.period.saturating_sub(now.duration_since(*oldest)))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay.max(Duration::from_millis(1))).await,
            }
        }
    }
}

/// Exponential backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds or attempts are exhausted; the
    /// last error is returned.
    pub async fn retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        "Attempt failed: {}. Retrying in {:.1}s",
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.multiplier).min(self.max_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

struct ServiceEntry {
    rate_limiter: Option<Arc<RateLimiter>>,
    semaphore: Option<Arc<Semaphore>>,
}

/// Per-service limits: a rate limiter and/or a concurrency bound.
#[derive(Default)]
pub struct ServiceLimits {
    services: Mutex<HashMap<String, ServiceEntry>>,
}

impl ServiceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn configure_rate_limit(&self, service: &str, calls: usize, period: Duration) {
        let mut services = self.services.lock().await;
        services
            .entry(service.to_string())
            .or_insert_with(|| ServiceEntry {
                rate_limiter: None,
                semaphore: None,
            })
            .rate_limiter = Some(Arc::new(RateLimiter::new(calls, period)));
    }

    pub async fn configure_concurrency(&self, service: &str, max_concurrent: usize) {
        let mut services = self.services.lock().await;
        services
            .entry(service.to_string())
            .or_insert_with(|| ServiceEntry {
                rate_limiter: None,
                semaphore: None,
            })
            .semaphore = Some(Arc::new(Semaphore::new(max_concurrent)));
    }

    /// Run `operation` under the service's configured limits.
    pub async fn run<T, F, Fut>(&self, service: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // Clone the handles out so no map lock is held while waiting.
        let (limiter, semaphore) = {
            let services = self.services.lock().await;
            match services.get(service) {
                Some(entry) => (entry.rate_limiter.clone(), entry.semaphore.clone()),
                None => (None, None),
            }
        };

        if let Some(limiter) = limiter {
            limiter.acquire().await;
        }

        match semaphore {
            Some(semaphore) => {
                // Closed semaphores don't happen here; fall through without
                // a permit if they somehow do.
                let _permit = semaphore.acquire().await;
                operation().await
            }
            None => operation().await,
        }
    }
}
