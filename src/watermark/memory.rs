//! In-memory watermark store, used by tests and by any caller that doesn't
//! need cross-process persistence.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{apply_update, Watermark, WatermarkStore, WatermarkUpdate};
use crate::error::IngestError;

#[derive(Default)]
pub struct InMemoryWatermarkStore {
    rows: Mutex<HashMap<String, Watermark>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, job_name: &str) -> Result<Watermark, IngestError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.entry(job_name.to_string()).or_default().clone())
    }

    async fn update(
        &self,
        job_name: &str,
        update: WatermarkUpdate,
    ) -> Result<Watermark, IngestError> {
        let mut rows = self.rows.lock().unwrap();
        let current = rows.entry(job_name.to_string()).or_default();
        let next = apply_update(current, &update);
        *current = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn replaying_the_same_sequence_is_idempotent() {
        let store = InMemoryWatermarkStore::new();
        let ts = DateTime::from_timestamp(1000, 0).unwrap();

        for _ in 0..2 {
            store
                .update(
                    "votes",
                    WatermarkUpdate {
                        token: Some("44:1:3".into()),
                        timestamp: Some(ts),
                        metadata: None,
                    },
                )
                .await
                .unwrap();
        }

        let watermark = store.get("votes").await.unwrap();
        assert_eq!(watermark.token, Some("44:1:3".into()));
        assert_eq!(watermark.timestamp, Some(ts));
    }

    #[tokio::test]
    async fn final_timestamp_is_the_max_over_a_sequence() {
        let store = InMemoryWatermarkStore::new();
        let updates = [(10, "a"), (30, "b"), (20, "c"), (30, "d")];
        for (secs, token) in updates {
            store
                .update(
                    "job",
                    WatermarkUpdate {
                        token: Some(token.into()),
                        timestamp: Some(DateTime::from_timestamp(secs, 0).unwrap()),
                        metadata: None,
                    },
                )
                .await
                .unwrap();
        }
        let watermark = store.get("job").await.unwrap();
        assert_eq!(watermark.timestamp, Some(DateTime::from_timestamp(30, 0).unwrap()));
        // ties at ts=30: "b" then "d" — "d" is the most recent equal-timestamp
        // update that differed from the prior token, so it wins.
        assert_eq!(watermark.token, Some("d".into()));
    }
}
