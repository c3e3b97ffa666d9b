//! Per-adapter circuit breaker, opened after a run of consecutive
//! request failures and cleared either by a cooldown elapsing or by any
//! subsequent non-retryable response.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::IngestError;

/// Abstraction over `Instant::now()` so tests can drive the clock
/// directly instead of sleeping in real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

pub struct CircuitBreaker {
    source_name: String,
    threshold: u32,
    cooldown: Duration,
    clock: Box<dyn Clock>,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(source_name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self::with_clock(source_name, threshold, cooldown, Box::new(SystemClock))
    }

    pub fn with_clock(
        source_name: impl Into<String>,
        threshold: u32,
        cooldown: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            threshold: threshold.max(1),
            cooldown: cooldown.max(Duration::from_secs(5)),
            clock,
            state: Mutex::new(State {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    /// Raise [`IngestError::CircuitOpen`] if the breaker is currently open;
    /// otherwise clear an elapsed cooldown and return.
    pub fn ensure_allowance(&self) -> Result<(), IngestError> {
        let mut state = self.state.lock().unwrap();
        let Some(open_until) = state.open_until else {
            return Ok(());
        };
        let now = self.clock.now();
        if now >= open_until {
            tracing::info!(adapter = %self.source_name, "circuit breaker reset after cooldown");
            state.open_until = None;
            state.consecutive_failures = 0;
            return Ok(());
        }
        Err(IngestError::CircuitOpen {
            adapter: self.source_name.clone(),
            retry_after_secs: (open_until - now).as_secs_f64(),
        })
    }

    /// Record a failed request attempt, opening the breaker once
    /// `threshold` consecutive failures accumulate.
    pub fn register_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.consecutive_failures += 1;
        if state.consecutive_failures < self.threshold {
            return;
        }
        state.open_until = Some(self.clock.now() + self.cooldown);
        tracing::error!(
            adapter = %self.source_name,
            cooldown_secs = self.cooldown.as_secs_f64(),
            threshold = self.threshold,
            "circuit breaker opened"
        );
        state.consecutive_failures = 0;
    }

    /// Any non-retryable response (success, 4xx other than 408/425/429,
    /// etc.) clears the consecutive-failure counter.
    pub fn register_non_retryable_response(&self) {
        let mut state = self.state.lock().unwrap();
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().unwrap().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeClock {
        now: AtomicU64,
        epoch: Instant,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                now: AtomicU64::new(0),
                epoch: Instant::now(),
            }
        }

        fn advance(&self, secs: u64) {
            self.now.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.epoch + Duration::from_secs(self.now.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("votes", 3, Duration::from_secs(60));
        breaker.register_failure();
        breaker.register_failure();
        assert!(breaker.ensure_allowance().is_ok());
        breaker.register_failure();
        assert!(breaker.ensure_allowance().is_err());
    }

    #[test]
    fn resets_after_cooldown_elapses() {
        let clock = std::sync::Arc::new(FakeClock::new());

        struct ArcClock(std::sync::Arc<FakeClock>);
        impl Clock for ArcClock {
            fn now(&self) -> Instant {
                self.0.now()
            }
        }

        let breaker = CircuitBreaker::with_clock(
            "votes",
            1,
            Duration::from_secs(30),
            Box::new(ArcClock(clock.clone())),
        );
        breaker.register_failure();
        assert!(breaker.ensure_allowance().is_err());

        clock.advance(31);
        assert!(breaker.ensure_allowance().is_ok());
    }

    #[test]
    fn non_retryable_response_clears_the_counter() {
        let breaker = CircuitBreaker::new("votes", 3, Duration::from_secs(60));
        breaker.register_failure();
        breaker.register_failure();
        breaker.register_non_retryable_response();
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
