//! Persisted history of adapter fetch operations, used for pipeline
//! health monitoring and for recovering the last successful fetch
//! parameters of a job (e.g. resuming bill imports at the right
//! parliament/session).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct FetchLogEntry {
    pub source: String,
    pub status: String,
    pub records_attempted: i64,
    pub records_succeeded: i64,
    pub records_failed: i64,
    pub duration_seconds: f64,
    pub fetch_params: Map<String, Value>,
    pub error_count: i64,
    pub error_summary: Vec<Value>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait FetchLogStore: Send + Sync {
    async fn create_log(&self, entry: FetchLogEntry) -> Result<(), IngestError>;

    async fn logs_since(
        &self,
        cutoff: DateTime<Utc>,
        source: Option<&str>,
    ) -> Result<Vec<FetchLogEntry>, IngestError>;

    /// Scan recent successful logs for `source`, newest first, returning the
    /// `fetch_params` of the first one whose `parliament`/`session` fields
    /// (when present) match the given filters.
    async fn last_successful_window(
        &self,
        source: &str,
        parliament: Option<i64>,
        session: Option<i64>,
    ) -> Result<Option<Map<String, Value>>, IngestError>;
}

pub(crate) fn matches_window(
    params: &Map<String, Value>,
    parliament: Option<i64>,
    session: Option<i64>,
) -> bool {
    if let Some(expected) = parliament {
        let stored = params.get("parliament").and_then(Value::as_i64);
        if stored != Some(expected) {
            return false;
        }
    }
    if let Some(expected) = session {
        let stored = params.get("session").and_then(Value::as_i64);
        if stored != Some(expected) {
            return false;
        }
    }
    true
}

pub mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryFetchLogStore {
        entries: Mutex<Vec<FetchLogEntry>>,
    }

    impl InMemoryFetchLogStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl FetchLogStore for InMemoryFetchLogStore {
        async fn create_log(&self, entry: FetchLogEntry) -> Result<(), IngestError> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        async fn logs_since(
            &self,
            cutoff: DateTime<Utc>,
            source: Option<&str>,
        ) -> Result<Vec<FetchLogEntry>, IngestError> {
            let entries = self.entries.lock().unwrap();
            let mut matched: Vec<FetchLogEntry> = entries
                .iter()
                .filter(|e| e.created_at >= cutoff)
                .filter(|e| source.map(|s| s == e.source).unwrap_or(true))
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(matched)
        }

        async fn last_successful_window(
            &self,
            source: &str,
            parliament: Option<i64>,
            session: Option<i64>,
        ) -> Result<Option<Map<String, Value>>, IngestError> {
            let entries = self.entries.lock().unwrap();
            let mut candidates: Vec<&FetchLogEntry> = entries
                .iter()
                .filter(|e| e.source == source && e.status == "success")
                .collect();
            candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(candidates
                .into_iter()
                .find(|e| matches_window(&e.fetch_params, parliament, session))
                .map(|e| e.fetch_params.clone()))
        }
    }
}

#[cfg(feature = "database")]
pub mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub struct PgFetchLogStore {
        pool: PgPool,
    }

    impl PgFetchLogStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl FetchLogStore for PgFetchLogStore {
        async fn create_log(&self, entry: FetchLogEntry) -> Result<(), IngestError> {
            sqlx::query(
                "INSERT INTO fetch_log \
                 (source, status, records_attempted, records_succeeded, records_failed, \
                  duration_seconds, fetch_params, error_count, error_summary, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(&entry.source)
            .bind(&entry.status)
            .bind(entry.records_attempted)
            .bind(entry.records_succeeded)
            .bind(entry.records_failed)
            .bind(entry.duration_seconds)
            .bind(Value::Object(entry.fetch_params.clone()))
            .bind(entry.error_count)
            .bind(Value::Array(entry.error_summary.clone()))
            .bind(entry.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn logs_since(
            &self,
            cutoff: DateTime<Utc>,
            source: Option<&str>,
        ) -> Result<Vec<FetchLogEntry>, IngestError> {
            let rows = if let Some(source) = source {
                sqlx::query(
                    "SELECT source, status, records_attempted, records_succeeded, \
                            records_failed, duration_seconds, fetch_params, error_count, \
                            error_summary, created_at \
                     FROM fetch_log WHERE created_at >= $1 AND source = $2 \
                     ORDER BY created_at DESC",
                )
                .bind(cutoff)
                .bind(source)
                .fetch_all(&self.pool)
                .await?
            } else {
                sqlx::query(
                    "SELECT source, status, records_attempted, records_succeeded, \
                            records_failed, duration_seconds, fetch_params, error_count, \
                            error_summary, created_at \
                     FROM fetch_log WHERE created_at >= $1 \
                     ORDER BY created_at DESC",
                )
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?
            };

            rows.into_iter().map(row_to_entry).collect()
        }

        async fn last_successful_window(
            &self,
            source: &str,
            parliament: Option<i64>,
            session: Option<i64>,
        ) -> Result<Option<Map<String, Value>>, IngestError> {
            let rows = sqlx::query(
                "SELECT source, status, records_attempted, records_succeeded, \
                        records_failed, duration_seconds, fetch_params, error_count, \
                        error_summary, created_at \
                 FROM fetch_log WHERE source = $1 AND status = 'success' \
                 ORDER BY created_at DESC LIMIT 200",
            )
            .bind(source)
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                let entry = row_to_entry(row)?;
                if matches_window(&entry.fetch_params, parliament, session) {
                    return Ok(Some(entry.fetch_params));
                }
            }
            Ok(None)
        }
    }

    fn row_to_entry(row: sqlx::postgres::PgRow) -> Result<FetchLogEntry, IngestError> {
        let fetch_params: Value = row.try_get("fetch_params")?;
        let error_summary: Value = row.try_get("error_summary")?;
        Ok(FetchLogEntry {
            source: row.try_get("source")?,
            status: row.try_get("status")?,
            records_attempted: row.try_get("records_attempted")?,
            records_succeeded: row.try_get("records_succeeded")?,
            records_failed: row.try_get("records_failed")?,
            duration_seconds: row.try_get("duration_seconds")?,
            fetch_params: fetch_params.as_object().cloned().unwrap_or_default(),
            error_count: row.try_get("error_count")?,
            error_summary: error_summary.as_array().cloned().unwrap_or_default(),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryFetchLogStore;
    use super::*;
    use serde_json::json;

    fn entry(source: &str, status: &str, parliament: i64, session: i64) -> FetchLogEntry {
        let mut params = Map::new();
        params.insert("parliament".into(), json!(parliament));
        params.insert("session".into(), json!(session));
        FetchLogEntry {
            source: source.into(),
            status: status.into(),
            records_attempted: 10,
            records_succeeded: 10,
            records_failed: 0,
            duration_seconds: 1.0,
            fetch_params: params,
            error_count: 0,
            error_summary: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn last_successful_window_skips_failed_and_mismatched_entries() {
        let store = InMemoryFetchLogStore::new();
        store
            .create_log(entry("bill_integration_service", "error", 44, 1))
            .await
            .unwrap();
        store
            .create_log(entry("bill_integration_service", "success", 43, 1))
            .await
            .unwrap();
        store
            .create_log(entry("bill_integration_service", "success", 44, 1))
            .await
            .unwrap();

        let window = store
            .last_successful_window("bill_integration_service", Some(44), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(window.get("parliament").unwrap(), &json!(44));
    }

    #[tokio::test]
    async fn last_successful_window_returns_none_when_nothing_matches() {
        let store = InMemoryFetchLogStore::new();
        store
            .create_log(entry("votes", "success", 44, 1))
            .await
            .unwrap();
        let window = store
            .last_successful_window("votes", Some(45), None)
            .await
            .unwrap();
        assert!(window.is_none());
    }
}
