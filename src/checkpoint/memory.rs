//! In-memory [`CheckpointStore`], used by tests and the single-process
//! "run once" binary when no database is configured.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{truncate_error, Checkpoint, CheckpointStatus, CheckpointStore, PreparedRun};
use crate::error::IngestError;

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    rows: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry<'a>(
        rows: &'a mut HashMap<String, Checkpoint>,
        job_name: &str,
    ) -> &'a mut Checkpoint {
        rows.entry(job_name.to_string())
            .or_insert_with(|| Checkpoint::idle(job_name))
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn prepare_run(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
    ) -> Result<PreparedRun, IngestError> {
        let mut rows = self.rows.lock().unwrap();
        let checkpoint = Self::entry(&mut rows, job_name);

        if checkpoint.last_window_start == Some(window_start)
            && checkpoint.status == CheckpointStatus::Success
        {
            return Ok(PreparedRun {
                run_required: false,
                attempt: checkpoint.last_attempt.max(1),
            });
        }

        let attempt = if checkpoint.last_window_start == Some(window_start) {
            checkpoint.last_attempt + 1
        } else {
            1
        };

        checkpoint.last_window_start = Some(window_start);
        checkpoint.last_started_at = Some(Utc::now());
        checkpoint.last_attempt = attempt;
        checkpoint.status = CheckpointStatus::Running;
        checkpoint.last_error.clear();
        checkpoint.last_duration_seconds = None;

        Ok(PreparedRun {
            run_required: true,
            attempt,
        })
    }

    async fn prepare_retry(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
        attempt: u32,
    ) -> Result<(), IngestError> {
        let mut rows = self.rows.lock().unwrap();
        let checkpoint = Self::entry(&mut rows, job_name);
        checkpoint.last_window_start = Some(window_start);
        checkpoint.last_started_at = Some(Utc::now());
        checkpoint.last_attempt = attempt;
        checkpoint.status = CheckpointStatus::Running;
        checkpoint.last_error.clear();
        Ok(())
    }

    async fn mark_success(
        &self,
        job_name: &str,
        attempt: u32,
        duration_seconds: f64,
    ) -> Result<(), IngestError> {
        let mut rows = self.rows.lock().unwrap();
        let checkpoint = Self::entry(&mut rows, job_name);
        checkpoint.last_completed_at = Some(Utc::now());
        checkpoint.last_attempt = attempt;
        checkpoint.status = CheckpointStatus::Success;
        checkpoint.last_error.clear();
        checkpoint.last_duration_seconds = Some(duration_seconds);
        Ok(())
    }

    async fn record_attempt_failure(
        &self,
        job_name: &str,
        attempt: u32,
        duration_seconds: f64,
        error: &str,
        final_attempt: bool,
    ) -> Result<(), IngestError> {
        let mut rows = self.rows.lock().unwrap();
        let checkpoint = Self::entry(&mut rows, job_name);
        checkpoint.last_attempt = attempt;
        checkpoint.last_error = truncate_error(error);
        checkpoint.last_duration_seconds = Some(duration_seconds);
        if final_attempt {
            checkpoint.last_completed_at = Some(Utc::now());
            checkpoint.status = CheckpointStatus::Failed;
        }
        Ok(())
    }

    async fn mark_skipped(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), IngestError> {
        let mut rows = self.rows.lock().unwrap();
        let checkpoint = Self::entry(&mut rows, job_name);
        let now = Utc::now();
        checkpoint.last_window_start = Some(window_start);
        checkpoint.last_started_at = Some(now);
        checkpoint.last_completed_at = Some(now);
        checkpoint.last_attempt = 0;
        checkpoint.status = CheckpointStatus::Skipped;
        checkpoint.last_error = format!("Skipped due to unmet dependencies: {reason}");
        checkpoint.last_duration_seconds = Some(0.0);
        Ok(())
    }

    async fn get(&self, job_name: &str) -> Result<Checkpoint, IngestError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(Self::entry(&mut rows, job_name).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn a_successful_window_is_not_rerun() {
        let store = InMemoryCheckpointStore::new();
        let w = window(1000);

        let first = store.prepare_run("votes", w).await.unwrap();
        assert!(first.run_required);
        assert_eq!(first.attempt, 1);
        store.mark_success("votes", 1, 0.5).await.unwrap();

        let second = store.prepare_run("votes", w).await.unwrap();
        assert!(!second.run_required);
        assert_eq!(second.attempt, 1);
    }

    #[tokio::test]
    async fn a_new_window_after_success_gets_attempt_one_again() {
        let store = InMemoryCheckpointStore::new();
        store.prepare_run("votes", window(1000)).await.unwrap();
        store.mark_success("votes", 1, 0.1).await.unwrap();

        let prepared = store.prepare_run("votes", window(2000)).await.unwrap();
        assert!(prepared.run_required);
        assert_eq!(prepared.attempt, 1);
    }

    #[tokio::test]
    async fn retrying_within_a_window_increments_attempt() {
        let store = InMemoryCheckpointStore::new();
        let w = window(1000);
        let first = store.prepare_run("votes", w).await.unwrap();
        assert_eq!(first.attempt, 1);
        store
            .record_attempt_failure("votes", 1, 0.2, "boom", false)
            .await
            .unwrap();

        let retry = store.prepare_run("votes", w).await.unwrap();
        assert!(retry.run_required);
        assert_eq!(retry.attempt, 2);
    }

    #[tokio::test]
    async fn mark_skipped_records_the_reason() {
        let store = InMemoryCheckpointStore::new();
        store
            .mark_skipped("committee_evidence", window(1000), "committees")
            .await
            .unwrap();
        let checkpoint = store.get("committee_evidence").await.unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Skipped);
        assert!(checkpoint.last_error.contains("committees"));
    }
}
