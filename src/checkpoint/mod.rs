//! Per-job-per-window execution state (C2).

#[cfg(feature = "database")]
pub mod postgres;

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IngestError;

/// Checkpoint status, one of `{IDLE, RUNNING, SUCCESS, FAILED, SKIPPED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(
    feature = "database",
    sqlx(type_name = "text", rename_all = "lowercase")
)]
pub enum CheckpointStatus {
    Idle,
    Running,
    Success,
    Failed,
    Skipped,
}

impl CheckpointStatus {
    pub fn has_completed(self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

/// The maximum length a persisted error string may reach before being
/// truncated with an ellipsis.
pub const MAX_ERROR_LEN: usize = 2000;

/// Truncate `error` to [`MAX_ERROR_LEN`] characters, suffixing an ellipsis
/// when truncation happened.
pub fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut truncated: String = error.chars().take(MAX_ERROR_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

/// A single job's checkpoint row.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub job_name: String,
    pub last_window_start: Option<DateTime<Utc>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_attempt: u32,
    pub status: CheckpointStatus,
    pub last_error: String,
    pub last_duration_seconds: Option<f64>,
}

impl Checkpoint {
    pub fn idle(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            last_window_start: None,
            last_started_at: None,
            last_completed_at: None,
            last_attempt: 0,
            status: CheckpointStatus::Idle,
            last_error: String::new(),
            last_duration_seconds: None,
        }
    }
}

/// Outcome of [`CheckpointStore::prepare_run`].
#[derive(Debug, Clone, Copy)]
pub struct PreparedRun {
    pub run_required: bool,
    pub attempt: u32,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Acquire row-level exclusion for `job_name` and decide whether a fresh
    /// execution is required for `window_start`:
    ///
    /// - If the checkpoint already recorded SUCCESS for this exact window,
    ///   return `run_required: false`.
    /// - Otherwise, compute the attempt number (continuing the window's
    ///   attempt counter, or starting fresh at 1 for a new window), persist
    ///   `RUNNING` + `last_started_at`, and return `run_required: true`.
    async fn prepare_run(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
    ) -> Result<PreparedRun, IngestError>;

    /// Re-arm the checkpoint as `RUNNING` ahead of a retry attempt.
    async fn prepare_retry(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
        attempt: u32,
    ) -> Result<(), IngestError>;

    /// Record a successful attempt.
    async fn mark_success(
        &self,
        job_name: &str,
        attempt: u32,
        duration_seconds: f64,
    ) -> Result<(), IngestError>;

    /// Record a failed attempt. `final` distinguishes a terminal failure
    /// (after exhausting `max_attempts`) from an intermediate one that will
    /// be retried.
    async fn record_attempt_failure(
        &self,
        job_name: &str,
        attempt: u32,
        duration_seconds: f64,
        error: &str,
        final_attempt: bool,
    ) -> Result<(), IngestError>;

    /// Record a dependency skip, with `reason` naming the unmet
    /// dependencies.
    async fn mark_skipped(
        &self,
        job_name: &str,
        window_start: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), IngestError>;

    /// Fetch the current row, creating an idle one if absent.
    async fn get(&self, job_name: &str) -> Result<Checkpoint, IngestError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_error_passes_short_strings_through() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn truncate_error_caps_long_strings_with_ellipsis() {
        let long = "x".repeat(3000);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_LEN);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn has_completed_covers_success_and_skipped_only() {
        assert!(CheckpointStatus::Success.has_completed());
        assert!(CheckpointStatus::Skipped.has_completed());
        assert!(!CheckpointStatus::Running.has_completed());
        assert!(!CheckpointStatus::Failed.has_completed());
        assert!(!CheckpointStatus::Idle.has_completed());
    }
}
