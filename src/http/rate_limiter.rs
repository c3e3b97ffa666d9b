//! Token-bucket rate limiter used in front of every outbound adapter
//! request.
//!
//! A hand-rolled bucket rather than a general-purpose crate: callers need
//! to know exactly how many times `acquire` had to wait so that count can
//! flow straight into [`crate::http::response::AdapterMetrics::rate_limit_hits`].

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

struct State {
    tokens: f64,
    last_refill: Instant,
    hit_count: u64,
}

/// A token bucket admitting `rate` requests per second, with a burst
/// capacity of `burst` tokens.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            state: Mutex::new(State {
                tokens: burst,
                last_refill: Instant::now(),
                hit_count: 0,
            }),
        }
    }

    /// Wait, if necessary, until a token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    state.hit_count += 1;
                    Some(Duration::from_secs_f64(deficit / self.rate))
                }
            };

            match wait {
                None => return,
                Some(delay) => sleep(delay).await,
            }
        }
    }

    /// Return and reset the count of `acquire` calls that had to wait.
    pub fn pop_hit_count(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.hit_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_capacity_is_immediately_available() {
        let limiter = RateLimiter::new(1.0, 3.0);
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.pop_hit_count(), 0);
    }

    #[tokio::test]
    async fn exhausting_the_bucket_counts_as_a_hit() {
        let limiter = RateLimiter::new(1000.0, 1.0);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.pop_hit_count(), 1);
    }

    #[tokio::test]
    async fn pop_hit_count_resets_after_reading() {
        let limiter = RateLimiter::new(1000.0, 1.0);
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.pop_hit_count();
        assert_eq!(limiter.pop_hit_count(), 0);
    }
}
