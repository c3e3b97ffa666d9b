//! Job functions (C5): thin async closures that consult the watermark
//! store (C1), call a source adapter (C4), persist the resulting domain
//! records, and advance the watermark. Each [`Job`] is the unit the
//! coordinator (C6) schedules; the coordinator itself never knows what a
//! job actually does.

pub mod definitions;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A callable job body. Returns a fresh future on every invocation so the
/// same `Job` can be retried by the coordinator.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

/// A static job definition: what to run, how many times, and what it
/// depends on within the same hourly window.
#[derive(Clone)]
pub struct Job {
    pub name: String,
    pub func: JobFn,
    pub max_attempts: u32,
    pub retry_delay_seconds: f64,
    pub dependencies: Vec<String>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_seconds", &self.retry_delay_seconds)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new(name: impl Into<String>, func: JobFn) -> Self {
        Self {
            name: name.into(),
            func,
            max_attempts: 2,
            retry_delay_seconds: 60.0,
            dependencies: Vec::new(),
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn retry_delay_seconds(mut self, seconds: f64) -> Self {
        self.retry_delay_seconds = seconds;
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// Wrap a `Fn() -> impl Future<Output = anyhow::Result<()>>` closure into
/// the boxed-future shape the coordinator expects.
pub fn job_fn<F, Fut>(f: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as BoxFuture<anyhow::Result<()>>)
}
