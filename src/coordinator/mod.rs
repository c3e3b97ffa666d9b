//! The hourly coordinator: executes a job DAG for one hourly window,
//! honoring dependencies, parallelizing independent jobs up to a worker
//! cap, retrying each job with exponential backoff, and marking
//! dependency-unmet jobs as skipped. A single pass over a `pending` map
//! plus a bounded set of in-flight jobs, looping until `pending` drains.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::checkpoint::{truncate_error, CheckpointStore, PreparedRun};
use crate::jobs::Job;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An injectable delay, so tests can run the retry/backoff paths without
/// real wall-clock sleeps.
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<()> + Send + Sync>;

fn real_sleep() -> SleepFn {
    Arc::new(|duration| Box::pin(tokio::time::sleep(duration)) as BoxFuture<()>)
}

/// Outcome of a single job within a window, as returned by
/// [`run_window`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct JobResult {
    pub status: JobStatus,
    pub attempt: u32,
    pub duration_seconds: f64,
}

impl JobResult {
    fn success(attempt: u32, duration_seconds: f64) -> Self {
        Self {
            status: JobStatus::Success,
            attempt,
            duration_seconds,
        }
    }

    fn failed(attempt: u32, duration_seconds: f64) -> Self {
        Self {
            status: JobStatus::Failed,
            attempt,
            duration_seconds,
        }
    }

    fn skipped() -> Self {
        Self {
            status: JobStatus::Skipped,
            attempt: 0,
            duration_seconds: 0.0,
        }
    }
}

/// Tuning knobs for a single [`run_window`] call.
pub struct CoordinatorOptions {
    /// Bounded worker pool size; defaults to `min(jobs.len(), 4)`.
    pub max_workers: Option<usize>,
    pub sleep: SleepFn,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            sleep: real_sleep(),
        }
    }
}

/// Execute `jobs` for `window_start`, returning a result for every job.
/// Never returns an `Err` for job-level failures — those are first-class
/// results (`JobStatus::Failed` / `JobStatus::Skipped`); callers translate
/// the returned map into process exit codes.
pub async fn run_window(
    jobs: Vec<Job>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    window_start: DateTime<Utc>,
    options: CoordinatorOptions,
) -> HashMap<String, JobResult> {
    let max_workers = options
        .max_workers
        .unwrap_or_else(|| jobs.len().clamp(1, 4))
        .max(1);
    let semaphore = Arc::new(Semaphore::new(max_workers));
    let sleep = options.sleep;

    let mut pending: HashMap<String, Job> =
        jobs.into_iter().map(|job| (job.name.clone(), job)).collect();
    let mut results: HashMap<String, JobResult> = HashMap::new();
    let mut running: JoinSet<(String, JobResult)> = JoinSet::new();

    loop {
        let mut progressed = false;
        let candidate_names: Vec<String> = pending.keys().cloned().collect();

        for name in candidate_names {
            let Some(job) = pending.get(&name) else {
                continue;
            };

            // A completed dependency that didn't succeed skips this job
            // immediately (spec step 2), regardless of whether any other
            // dependency is still pending — a known failure is a verdict,
            // not something more waiting can change.
            let failed_deps: Vec<&String> = job
                .dependencies
                .iter()
                .filter(|dep| {
                    results
                        .get(*dep)
                        .map(|r| r.status != JobStatus::Success)
                        .unwrap_or(false)
                })
                .collect();

            if !failed_deps.is_empty() {
                let reason = failed_deps
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                tracing::warn!(job = %name, unmet = %reason, "skipping job: unmet dependencies");
                let _ = checkpoint_store
                    .mark_skipped(&name, window_start, &reason)
                    .await;
                results.insert(name.clone(), JobResult::skipped());
                pending.remove(&name);
                progressed = true;
                continue;
            }

            let unmet: Vec<&String> = job
                .dependencies
                .iter()
                .filter(|dep| !results.contains_key(*dep))
                .collect();
            if !unmet.is_empty() {
                continue;
            }

            let job = pending.remove(&name).expect("checked present above");
            match checkpoint_store.prepare_run(&job.name, window_start).await {
                Ok(PreparedRun {
                    run_required: false,
                    attempt,
                }) => {
                    tracing::debug!(job = %name, "already succeeded for this window");
                    results.insert(name, JobResult::success(attempt, 0.0));
                    progressed = true;
                }
                Ok(PreparedRun {
                    run_required: true,
                    attempt,
                }) => {
                    progressed = true;
                    let semaphore = semaphore.clone();
                    let checkpoint_store = checkpoint_store.clone();
                    let sleep = sleep.clone();
                    running.spawn(async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .expect("semaphore is never closed");
                        let job_name = job.name.clone();
                        let result =
                            execute_with_retries(&job, attempt, &checkpoint_store, window_start, &sleep)
                                .await;
                        (job_name, result)
                    });
                }
                Err(err) => {
                    // Row-lock contention or a transient database error:
                    // this isn't an attempt, just retry preparing this job
                    // next pass (it stays in `pending`).
                    tracing::warn!(job = %name, error = %err, "checkpoint preparation failed, will retry");
                    pending.insert(name, job);
                }
            }
        }

        if running.is_empty() {
            if progressed {
                continue;
            }
            break;
        }

        if let Some(Ok((name, result))) = running.join_next().await {
            results.insert(name, result);
        }
    }

    for name in pending.into_keys() {
        tracing::error!(job = %name, "job never became runnable: cyclic or unresolved dependency");
        let _ = checkpoint_store
            .mark_skipped(&name, window_start, "cyclic or unresolved dependency")
            .await;
        results.insert(name, JobResult::skipped());
    }

    results
}

/// Run a single job through its retry policy, persisting each attempt's
/// outcome to the checkpoint store, and return its final result.
async fn execute_with_retries(
    job: &Job,
    start_attempt: u32,
    checkpoint_store: &Arc<dyn CheckpointStore>,
    window_start: DateTime<Utc>,
    sleep: &SleepFn,
) -> JobResult {
    let mut attempt = start_attempt;
    loop {
        let started = Instant::now();
        let outcome = (job.func)().await;
        let duration = started.elapsed().as_secs_f64();

        match outcome {
            Ok(()) => {
                let _ = checkpoint_store
                    .mark_success(&job.name, attempt, duration)
                    .await;
                return JobResult::success(attempt, duration);
            }
            Err(err) => {
                let final_attempt = attempt >= job.max_attempts;
                let message = truncate_error(&format!("{err:#}"));
                let _ = checkpoint_store
                    .record_attempt_failure(&job.name, attempt, duration, &message, final_attempt)
                    .await;

                if final_attempt {
                    tracing::error!(job = %job.name, attempt, error = %err, "job failed permanently");
                    return JobResult::failed(attempt, duration);
                }

                let retry_index = attempt - start_attempt;
                let delay_secs =
                    (job.retry_delay_seconds * 2f64.powi(retry_index as i32 - 1)).max(0.0);
                let next_attempt = attempt + 1;
                tracing::warn!(
                    job = %job.name,
                    attempt,
                    next_attempt,
                    delay_secs,
                    error = %err,
                    "job attempt failed, retrying"
                );
                let _ = checkpoint_store
                    .prepare_retry(&job.name, window_start, next_attempt)
                    .await;
                sleep(Duration::from_secs_f64(delay_secs)).await;
                attempt = next_attempt;
            }
        }
    }
}

/// Truncate the window start to the beginning of the clock hour (UTC),
/// the correlation key used across a single coordinator run.
pub fn current_window_start() -> DateTime<Utc> {
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(now.time().hour(), 0, 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::memory::InMemoryCheckpointStore;
    use crate::jobs::job_fn;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn no_op_sleep() -> SleepFn {
        Arc::new(|_| Box::pin(async {}) as BoxFuture<()>)
    }

    fn window() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn linear_dag_runs_in_dependency_order() {
        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let make_job = |name: &'static str| {
            let order = order.clone();
            Job::new(name, job_fn(move || {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(name);
                    Ok(())
                }
            }))
        };

        let jobs = vec![
            make_job("a"),
            make_job("b").depends_on(["a"]),
            make_job("c").depends_on(["b"]),
        ];

        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let results = run_window(
            jobs,
            checkpoint_store,
            window(),
            CoordinatorOptions {
                max_workers: Some(4),
                sleep: no_op_sleep(),
            },
        )
        .await;

        assert_eq!(results["a"].status, JobStatus::Success);
        assert_eq!(results["b"].status, JobStatus::Success);
        assert_eq!(results["c"].status, JobStatus::Success);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn dependency_failure_cascades_to_a_skip() {
        let failing = Job::new(
            "a",
            job_fn(|| async { anyhow::bail!("boom") }),
        )
        .max_attempts(2)
        .retry_delay_seconds(0.0);
        let dependent = Job::new("b", job_fn(|| async { Ok(()) })).depends_on(["a"]);

        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let results = run_window(
            vec![failing, dependent],
            checkpoint_store.clone(),
            window(),
            CoordinatorOptions {
                max_workers: Some(4),
                sleep: no_op_sleep(),
            },
        )
        .await;

        assert_eq!(results["a"].status, JobStatus::Failed);
        assert_eq!(results["a"].attempt, 2);
        assert_eq!(results["b"].status, JobStatus::Skipped);

        let checkpoint_b = checkpoint_store.get("b").await.unwrap();
        assert!(checkpoint_b.last_error.contains('a'));
        assert_eq!(checkpoint_b.last_attempt, 0);
    }

    #[tokio::test]
    async fn a_job_that_succeeds_on_a_later_attempt_records_the_right_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let job = Job::new("flaky", {
            let calls = calls.clone();
            job_fn(move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("not yet");
                    }
                    Ok(())
                }
            })
        })
        .max_attempts(3)
        .retry_delay_seconds(0.0);

        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let results = run_window(
            vec![job],
            checkpoint_store,
            window(),
            CoordinatorOptions {
                max_workers: Some(1),
                sleep: no_op_sleep(),
            },
        )
        .await;

        assert_eq!(results["flaky"].status, JobStatus::Success);
        assert_eq!(results["flaky"].attempt, 3);
    }

    #[tokio::test]
    async fn a_window_already_marked_success_is_not_rerun() {
        let calls = Arc::new(AtomicU32::new(0));
        let job_fn_factory = || {
            let calls = calls.clone();
            job_fn(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let w = window();

        run_window(
            vec![Job::new("votes", job_fn_factory())],
            checkpoint_store.clone(),
            w,
            CoordinatorOptions::default(),
        )
        .await;
        run_window(
            vec![Job::new("votes", job_fn_factory())],
            checkpoint_store,
            w,
            CoordinatorOptions::default(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn independent_jobs_both_run_regardless_of_each_others_outcome() {
        let a = Job::new("a", job_fn(|| async { anyhow::bail!("boom") }))
            .max_attempts(1)
            .retry_delay_seconds(0.0);
        let b = Job::new("b", job_fn(|| async { Ok(()) }));

        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let results = run_window(
            vec![a, b],
            checkpoint_store,
            window(),
            CoordinatorOptions {
                max_workers: Some(4),
                sleep: no_op_sleep(),
            },
        )
        .await;

        assert_eq!(results["a"].status, JobStatus::Failed);
        assert_eq!(results["b"].status, JobStatus::Success);
    }

    #[tokio::test]
    async fn parallelism_never_exceeds_the_worker_cap() {
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_observed = Arc::new(AtomicU32::new(0));

        let make_job = |name: &'static str| {
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            Job::new(
                name,
                job_fn(move || {
                    let in_flight = in_flight.clone();
                    let max_observed = max_observed.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_observed.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
        };

        let jobs = vec![
            make_job("a"),
            make_job("b"),
            make_job("c"),
            make_job("d"),
            make_job("e"),
        ];

        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        run_window(
            jobs,
            checkpoint_store,
            window(),
            CoordinatorOptions {
                max_workers: Some(2),
                sleep: no_op_sleep(),
            },
        )
        .await;

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    /// Delegates to an inner store but records the relative order of
    /// `mark_skipped` calls against an external event log, so a test can
    /// observe *when* a skip happened relative to other in-flight work.
    struct RecordingCheckpointStore {
        inner: Arc<dyn CheckpointStore>,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl CheckpointStore for RecordingCheckpointStore {
        async fn prepare_run(
            &self,
            job_name: &str,
            window_start: DateTime<Utc>,
        ) -> Result<PreparedRun, crate::error::IngestError> {
            self.inner.prepare_run(job_name, window_start).await
        }

        async fn prepare_retry(
            &self,
            job_name: &str,
            window_start: DateTime<Utc>,
            attempt: u32,
        ) -> Result<(), crate::error::IngestError> {
            self.inner
                .prepare_retry(job_name, window_start, attempt)
                .await
        }

        async fn mark_success(
            &self,
            job_name: &str,
            attempt: u32,
            duration_seconds: f64,
        ) -> Result<(), crate::error::IngestError> {
            self.inner
                .mark_success(job_name, attempt, duration_seconds)
                .await
        }

        async fn record_attempt_failure(
            &self,
            job_name: &str,
            attempt: u32,
            duration_seconds: f64,
            error: &str,
            final_attempt: bool,
        ) -> Result<(), crate::error::IngestError> {
            self.inner
                .record_attempt_failure(job_name, attempt, duration_seconds, error, final_attempt)
                .await
        }

        async fn mark_skipped(
            &self,
            job_name: &str,
            window_start: DateTime<Utc>,
            reason: &str,
        ) -> Result<(), crate::error::IngestError> {
            self.order.lock().unwrap().push(format!("skipped:{job_name}"));
            self.inner.mark_skipped(job_name, window_start, reason).await
        }

        async fn get(&self, job_name: &str) -> Result<crate::checkpoint::Checkpoint, crate::error::IngestError> {
            self.inner.get(job_name).await
        }
    }

    #[tokio::test]
    async fn a_job_is_skipped_as_soon_as_one_dependency_fails_without_waiting_on_siblings() {
        let order = Arc::new(Mutex::new(Vec::<String>::new()));

        let failing = Job::new("fails_fast", job_fn(|| async { anyhow::bail!("boom") }))
            .max_attempts(1)
            .retry_delay_seconds(0.0);

        let slow = {
            let order = order.clone();
            Job::new(
                "slow_sibling",
                job_fn(move || {
                    let order = order.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        order.lock().unwrap().push("completed:slow_sibling".to_string());
                        Ok(())
                    }
                }),
            )
        };

        let dependent =
            Job::new("dependent", job_fn(|| async { Ok(()) })).depends_on(["fails_fast", "slow_sibling"]);

        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(RecordingCheckpointStore {
            inner: Arc::new(InMemoryCheckpointStore::new()),
            order: order.clone(),
        });

        let results = run_window(
            vec![failing, slow, dependent],
            checkpoint_store,
            window(),
            CoordinatorOptions {
                max_workers: Some(4),
                sleep: no_op_sleep(),
            },
        )
        .await;

        assert_eq!(results["dependent"].status, JobStatus::Skipped);

        let order = order.lock().unwrap();
        let skip_index = order
            .iter()
            .position(|e| e == "skipped:dependent")
            .expect("dependent was skipped");
        let slow_done_index = order
            .iter()
            .position(|e| e == "completed:slow_sibling")
            .expect("slow sibling completed");
        assert!(
            skip_index < slow_done_index,
            "expected dependent to be skipped before the still-running sibling finished, got order {:?}",
            *order
        );
    }
}
