//! Shared HTTP request core for every adapter: rate limiting, conditional
//! GET, retry-with-backoff, circuit breaking, and latency/retry metrics,
//! all in one place so adapters only implement `normalize`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use super::cache::{cache_key, CacheValidatorStore};
use super::circuit_breaker::CircuitBreaker;
use super::rate_limiter::RateLimiter;
use crate::error::IngestError;

/// A transport abstraction over the actual network call, so retry/backoff
/// logic can be exercised in tests without a live server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<TransportResponse, IngestError>;
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An injectable retry/backoff delay, mirroring the coordinator's
/// `SleepFn` so the `Retry-After`/jittered-backoff paths can be exercised
/// in tests without a real wall-clock sleep.
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<()> + Send + Sync>;

pub fn real_sleep() -> SleepFn {
    Arc::new(|duration| Box::pin(tokio::time::sleep(duration)) as BoxFuture<()>)
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a valid timeout");
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<TransportResponse, IngestError> {
        let response = self.client.get(url).headers(headers).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct HttpMetricsState {
    pub request_count: u64,
    pub not_modified: u64,
    pub retry_429: u64,
    pub retry_5xx: u64,
    pub retry_other: u64,
    latencies_ms: Vec<f64>,
}

impl HttpMetricsState {
    fn record_latency(&mut self, elapsed: Duration) {
        self.latencies_ms.push(elapsed.as_secs_f64() * 1000.0);
    }

    /// `(average, p95)` of recorded request latencies, in milliseconds.
    pub fn latency_stats(&self) -> (f64, f64) {
        if self.latencies_ms.is_empty() {
            return (0.0, 0.0);
        }
        let mut sorted = self.latencies_ms.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let average = sorted.iter().sum::<f64>() / sorted.len() as f64;
        let index = ((sorted.len() as f64 * 0.95).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        (average, sorted[index])
    }
}

pub struct HttpAdapterCoreConfig {
    pub source_name: String,
    pub rate_limit_per_second: f64,
    pub max_retries: u32,
    pub timeout: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
    /// Injectable retry/backoff delay; defaults to a real `tokio::time::sleep`
    /// via [`real_sleep`], and is overridden in tests so the `Retry-After`
    /// and jittered-backoff paths run with no actual wall-clock delay.
    pub sleep: SleepFn,
}

/// Shared request machinery for a single adapter instance. One core is
/// constructed per adapter and reused across its lifetime so rate-limit
/// tokens and circuit breaker state persist between calls.
pub struct HttpAdapterCore {
    source_name: String,
    max_retries: u32,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    cache: CacheValidatorStore,
    transport: Box<dyn Transport>,
    metrics: std::sync::Mutex<HttpMetricsState>,
    retry_attempts: std::sync::atomic::AtomicU64,
    sleep: SleepFn,
}

impl HttpAdapterCore {
    pub fn new(config: HttpAdapterCoreConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            max_retries: config.max_retries,
            rate_limiter: RateLimiter::new(config.rate_limit_per_second, 1.0),
            circuit_breaker: CircuitBreaker::new(
                config.source_name.clone(),
                config.circuit_breaker_threshold,
                config.circuit_breaker_cooldown,
            ),
            cache: CacheValidatorStore::new(),
            source_name: config.source_name,
            transport,
            metrics: std::sync::Mutex::new(HttpMetricsState::default()),
            sleep: config.sleep,
            retry_attempts: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Issue a conditional GET to `url` with `params` folded into the cache
    /// key, applying rate limiting, retries, and circuit breaking. Returns
    /// `None` when the upstream responded `304 Not Modified`.
    pub async fn get(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Option<TransportResponse>, IngestError> {
        self.rate_limiter.acquire().await;

        let key = cache_key(url, params);
        let validator = self.cache.validator_for(&key);
        let headers = validator.apply(&HeaderMap::new());

        let response = self.request_with_retries(url, headers).await?;

        if response.status != StatusCode::NOT_MODIFIED {
            self.cache.record_response(&key, &response.headers);
        }

        if response.status == StatusCode::NOT_MODIFIED {
            Ok(None)
        } else {
            Ok(Some(response))
        }
    }

    async fn request_with_retries(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<TransportResponse, IngestError> {
        let mut attempt: u32 = 0;
        loop {
            self.circuit_breaker.ensure_allowance()?;
            attempt += 1;
            let start = Instant::now();

            match self.transport.get(url, headers.clone()).await {
                Ok(response) => {
                    self.record_http_attempt(start.elapsed(), Some(response.status));

                    if should_retry_status(response.status) {
                        if attempt > self.max_retries {
                            self.circuit_breaker.register_failure();
                            return Err(IngestError::HttpStatus {
                                url: url.to_string(),
                                status: response.status.as_u16(),
                            });
                        }
                        let delay = status_retry_delay(&response, attempt);
                        self.register_status_retry(response.status, attempt, delay);
                        (self.sleep)(delay).await;
                        continue;
                    }

                    self.circuit_breaker.register_non_retryable_response();
                    return Ok(response);
                }
                Err(err) => {
                    self.record_http_attempt(start.elapsed(), None);
                    if attempt > self.max_retries {
                        self.circuit_breaker.register_failure();
                        return Err(err);
                    }
                    let delay = exception_retry_delay(attempt);
                    self.register_exception_retry(attempt, delay);
                    (self.sleep)(delay).await;
                }
            }
        }
    }

    fn record_http_attempt(&self, elapsed: Duration, status: Option<StatusCode>) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.request_count += 1;
        metrics.record_latency(elapsed);
        if status == Some(StatusCode::NOT_MODIFIED) {
            metrics.not_modified += 1;
        }
    }

    fn register_status_retry(&self, status: StatusCode, attempt: u32, delay: Duration) {
        let mut metrics = self.metrics.lock().unwrap();
        if status == StatusCode::TOO_MANY_REQUESTS {
            metrics.retry_429 += 1;
        } else if status.is_server_error() {
            metrics.retry_5xx += 1;
        } else {
            metrics.retry_other += 1;
        }
        drop(metrics);
        self.retry_attempts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tracing::warn!(
            adapter = %self.source_name,
            status = status.as_u16(),
            delay_secs = delay.as_secs_f64(),
            attempt,
            "retrying after status response"
        );
    }

    fn register_exception_retry(&self, attempt: u32, delay: Duration) {
        self.metrics.lock().unwrap().retry_other += 1;
        self.retry_attempts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tracing::warn!(
            adapter = %self.source_name,
            delay_secs = delay.as_secs_f64(),
            attempt,
            "retrying after transport error"
        );
    }

    /// Reset per-operation counters and return the accumulated metrics
    /// snapshot, mirroring how each adapter call starts from a clean slate.
    pub fn take_metrics(&self) -> (HttpMetricsState, u64, u64) {
        let metrics = std::mem::take(&mut *self.metrics.lock().unwrap());
        let retries = self
            .retry_attempts
            .swap(0, std::sync::atomic::Ordering::Relaxed);
        let rate_limit_hits = self.rate_limiter.pop_hit_count();
        (metrics, retries, rate_limit_hits)
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::from_u16(425).unwrap()
    ) || status.is_server_error()
}

fn status_retry_delay(response: &TransportResponse, attempt: u32) -> Duration {
    if response.status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(retry_after) = response
            .headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            let jitter = rand::thread_rng().gen_range(0.25..0.75);
            return Duration::from_secs(retry_after) + Duration::from_secs_f64(jitter);
        }
    }
    let base = (0.5_f64 * 2f64.powi(attempt as i32 - 1)).min(30.0);
    let jitter = rand::thread_rng().gen_range(0.0..0.5);
    Duration::from_secs_f64(base + jitter)
}

fn exception_retry_delay(attempt: u32) -> Duration {
    let base = (1.0_f64 * 2f64.powi(attempt as i32 - 1)).min(45.0);
    let jitter = rand::thread_rng().gen_range(0.25..0.75);
    Duration::from_secs_f64(base + jitter)
}
