//! Weekday hourly scheduler (C7): a process-global singleton that ticks
//! on the hour in a configured IANA time zone and runs the job DAG
//! through the coordinator (C6), skipping Saturdays and Sundays in that
//! zone. There is deliberately one scheduler per process — a second
//! `start()` call is an error, matching the original's module-level
//! `_scheduler_lock`/`_scheduler` pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tokio::sync::Notify;

use crate::checkpoint::CheckpointStore;
use crate::coordinator::{self, CoordinatorOptions, JobResult};
use crate::error::IngestError;
use crate::jobs::Job;

struct Scheduler {
    jobs: Vec<Job>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    time_zone: Tz,
    max_workers: Option<usize>,
    shutdown: Arc<Notify>,
}

static SCHEDULER: OnceLock<Mutex<Option<Arc<Scheduler>>>> = OnceLock::new();

fn registry() -> &'static Mutex<Option<Arc<Scheduler>>> {
    SCHEDULER.get_or_init(|| Mutex::new(None))
}

/// Start the background tick loop. Only one scheduler may be running in
/// the process at a time; call [`shutdown`] before starting another.
pub fn start(
    jobs: Vec<Job>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    time_zone: &str,
    max_workers: Option<usize>,
) -> Result<(), IngestError> {
    let tz: Tz = time_zone
        .parse()
        .map_err(|_| IngestError::other(format!("invalid scheduler time zone: {time_zone}")))?;

    let mut guard = registry().lock().expect("scheduler registry poisoned");
    if guard.is_some() {
        return Err(IngestError::other(
            "scheduler already started in this process",
        ));
    }

    let scheduler = Arc::new(Scheduler {
        jobs,
        checkpoint_store,
        time_zone: tz,
        max_workers,
        shutdown: Arc::new(Notify::new()),
    });

    tokio::spawn(tick_loop(scheduler.clone(), true));
    *guard = Some(scheduler);
    Ok(())
}

/// Stop the tick loop. A no-op if no scheduler is running.
pub fn shutdown() {
    let scheduler = registry()
        .lock()
        .expect("scheduler registry poisoned")
        .take();
    if let Some(scheduler) = scheduler {
        scheduler.shutdown.notify_waiters();
    }
}

/// Force an immediate run of the current window, bypassing the weekday
/// gate. Returns `None` if no scheduler has been started.
pub async fn run_now() -> Option<HashMap<String, JobResult>> {
    let scheduler = registry()
        .lock()
        .expect("scheduler registry poisoned")
        .clone();
    let scheduler = scheduler?;
    Some(
        coordinator::run_window(
            scheduler.jobs.clone(),
            scheduler.checkpoint_store.clone(),
            coordinator::current_window_start(),
            CoordinatorOptions {
                max_workers: scheduler.max_workers,
                ..Default::default()
            },
        )
        .await,
    )
}

/// Block until [`shutdown`] is called. Intended for binaries whose main
/// thread has nothing else to do once the scheduler is running.
pub async fn wait_forever() {
    let scheduler = registry()
        .lock()
        .expect("scheduler registry poisoned")
        .clone();
    if let Some(scheduler) = scheduler {
        scheduler.shutdown.notified().await;
    }
}

async fn tick_loop(scheduler: Arc<Scheduler>, run_immediately: bool) {
    if run_immediately {
        let now = coordinator::current_window_start();
        if is_weekday_in(scheduler.time_zone, now) {
            tracing::info!(window_start = %now, "running current window immediately on start");
            let results = run_for_window(&scheduler, now).await;
            tracing::info!(window_start = %now, ?results, "finished startup window");
        } else {
            tracing::debug!(window_start = %now, "skipping weekend window on start");
        }
    }

    loop {
        let next = next_hour_boundary(Utc::now());
        let delay = (next - Utc::now()).to_std().unwrap_or_default();
        let deadline = tokio::time::Instant::now() + delay;

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = scheduler.shutdown.notified() => return,
        }

        if !is_weekday_in(scheduler.time_zone, next) {
            tracing::debug!(window_start = %next, "skipping weekend window");
            continue;
        }

        tracing::info!(window_start = %next, "starting scheduled window");
        let results = run_for_window(&scheduler, next).await;
        tracing::info!(window_start = %next, ?results, "finished scheduled window");
    }
}

async fn run_for_window(
    scheduler: &Arc<Scheduler>,
    window_start: DateTime<Utc>,
) -> HashMap<String, JobResult> {
    coordinator::run_window(
        scheduler.jobs.clone(),
        scheduler.checkpoint_store.clone(),
        window_start,
        CoordinatorOptions {
            max_workers: scheduler.max_workers,
            ..Default::default()
        },
    )
    .await
}

/// The next top-of-hour instant strictly after `now`, in UTC. Shared with
/// the Kafka publisher loop (C8), which ticks on the same hourly cadence.
pub(crate) fn next_hour_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .date_naive()
        .and_hms_opt(now.hour(), 0, 0)
        .expect("hour is always a valid hms component");
    let truncated = DateTime::<Utc>::from_naive_utc_and_offset(truncated, Utc);
    truncated + ChronoDuration::hours(1)
}

/// Whether `at` (a UTC instant) falls on a weekday in `tz`.
pub(crate) fn is_weekday_in(tz: Tz, at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&tz);
    !matches!(local.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn next_hour_boundary_rounds_up_to_the_following_hour() {
        let now = DateTime::parse_from_rfc3339("2026-07-28T14:17:03Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_hour_boundary(now);
        assert_eq!(next.to_rfc3339(), "2026-07-28T15:00:00+00:00");
    }

    #[test]
    fn next_hour_boundary_is_idempotent_on_exact_boundaries() {
        let now = DateTime::parse_from_rfc3339("2026-07-28T14:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next_hour_boundary(now), now + ChronoDuration::hours(1));
    }

    #[test]
    fn weekend_windows_are_skipped_in_the_configured_zone() {
        // 2026-08-01 is a Saturday.
        let saturday = DateTime::parse_from_rfc3339("2026-08-01T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!is_weekday_in(chrono_tz::UTC, saturday));

        let monday = DateTime::parse_from_rfc3339("2026-08-03T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(is_weekday_in(chrono_tz::UTC, monday));
    }

    #[test]
    fn a_local_time_zone_can_shift_a_day_across_the_weekend_boundary() {
        // Friday 23:30 UTC is already Saturday in a UTC+1 zone.
        let friday_night = DateTime::parse_from_rfc3339("2026-07-31T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(is_weekday_in(chrono_tz::UTC, friday_night));
        assert!(!is_weekday_in(chrono_tz::Europe::Paris, friday_night));
    }

    #[tokio::test]
    async fn run_now_without_a_started_scheduler_returns_none() {
        // Exercises the no-scheduler-yet path; a started scheduler is
        // process-global and covered indirectly through the CLI binaries.
        shutdown();
        assert!(run_now().await.is_none());
    }

    #[tokio::test]
    async fn start_runs_the_current_window_immediately() {
        use crate::checkpoint::memory::InMemoryCheckpointStore;
        use crate::jobs::job_fn;
        use std::sync::atomic::{AtomicU32, Ordering};

        shutdown();

        let calls = Arc::new(AtomicU32::new(0));
        let job = Job::new("startup_job", {
            let calls = calls.clone();
            job_fn(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        });

        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        start(vec![job], checkpoint_store, "UTC", Some(1)).unwrap();

        // The startup run happens on a freshly spawned task; give it a
        // chance to run before asserting.
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        shutdown();
    }
}
