//! Persisted per-job high-water marks (C1).
//!
//! The update rules here are what make every job re-runnable: a replay over
//! the same window must never regress `last_timestamp`, and `last_token` only
//! moves forward under the rules in [`WatermarkStore::update`].

#[cfg(feature = "database")]
pub mod postgres;

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::IngestError;

/// A stored watermark for a single job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watermark {
    pub token: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
}

/// Inputs to [`WatermarkStore::update`]. Any field left `None` is left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct WatermarkUpdate {
    pub token: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<Map<String, Value>>,
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Return the stored watermark for `job_name`, creating an empty record
    /// as a side effect if none exists.
    async fn get(&self, job_name: &str) -> Result<Watermark, IngestError>;

    /// Atomically apply `update` under the rules of §4.1:
    ///
    /// - A `timestamp` writes only when strictly greater than stored
    ///   (`None` stored counts as "greater").
    /// - A `token` writes when the timestamp advanced, OR when the stored
    ///   timestamp equals the new timestamp and the token differs, OR when
    ///   no timestamp is tracked at all.
    /// - `metadata` is shallow-merged and persisted only if it changed.
    /// - A no-op update must not touch the record.
    async fn update(
        &self,
        job_name: &str,
        update: WatermarkUpdate,
    ) -> Result<Watermark, IngestError>;
}

/// Decide whether a newly observed `(token, timestamp)` pair represents an
/// item past the stored watermark for `job_name`. Adapters call this while
/// paginating to early-skip already-seen records.
pub fn should_process(watermark: &Watermark, token: &str, timestamp: DateTime<Utc>) -> bool {
    match watermark.timestamp {
        None => true,
        Some(stored) => {
            timestamp > stored
                || (timestamp == stored && token != watermark.token.as_deref().unwrap_or(""))
        }
    }
}

/// Compute the next `Watermark` for a plain in-process merge, used by both
/// store implementations so the rules live in exactly one place.
pub(crate) fn apply_update(current: &Watermark, update: &WatermarkUpdate) -> Watermark {
    let mut next = current.clone();

    let timestamp_advanced = match (&update.timestamp, &current.timestamp) {
        (Some(new_ts), None) => {
            next.timestamp = Some(*new_ts);
            true
        }
        (Some(new_ts), Some(stored)) if new_ts > stored => {
            next.timestamp = Some(*new_ts);
            true
        }
        _ => false,
    };

    if let Some(token) = &update.token {
        let should_update_token = if timestamp_advanced || current.timestamp.is_none() {
            true
        } else if let Some(new_ts) = update.timestamp {
            current.timestamp == Some(new_ts) && current.token.as_deref() != Some(token.as_str())
        } else {
            current.token.as_deref() != Some(token.as_str())
        };
        if should_update_token {
            next.token = Some(token.clone());
        }
    }

    if let Some(metadata) = &update.metadata {
        let mut merged = current.metadata.clone();
        for (k, v) in metadata {
            merged.insert(k.clone(), v.clone());
        }
        if merged != current.metadata {
            next.metadata = merged;
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn timestamp_never_regresses() {
        let current = Watermark {
            token: Some("a".into()),
            timestamp: Some(ts(100)),
            metadata: Map::new(),
        };
        let update = WatermarkUpdate {
            token: Some("b".into()),
            timestamp: Some(ts(50)),
            metadata: None,
        };
        let next = apply_update(&current, &update);
        assert_eq!(next.timestamp, Some(ts(100)));
        // token does not advance either: timestamp didn't advance, and the
        // stored timestamp != the (older, rejected) new timestamp.
        assert_eq!(next.token, Some("a".into()));
    }

    #[test]
    fn token_moves_at_equal_timestamp_when_it_differs() {
        let current = Watermark {
            token: Some("1:1:1".into()),
            timestamp: Some(ts(100)),
            metadata: Map::new(),
        };
        let update = WatermarkUpdate {
            token: Some("1:1:2".into()),
            timestamp: Some(ts(100)),
            metadata: None,
        };
        let next = apply_update(&current, &update);
        assert_eq!(next.token, Some("1:1:2".into()));
        assert_eq!(next.timestamp, Some(ts(100)));
    }

    #[test]
    fn metadata_shallow_merges() {
        let mut meta = Map::new();
        meta.insert("a".into(), json!(1));
        let current = Watermark {
            token: None,
            timestamp: None,
            metadata: meta,
        };
        let mut incoming = Map::new();
        incoming.insert("b".into(), json!(2));
        let update = WatermarkUpdate {
            token: None,
            timestamp: None,
            metadata: Some(incoming),
        };
        let next = apply_update(&current, &update);
        assert_eq!(next.metadata.get("a"), Some(&json!(1)));
        assert_eq!(next.metadata.get("b"), Some(&json!(2)));
    }

    #[test]
    fn noop_update_is_a_true_noop() {
        let current = Watermark {
            token: Some("x".into()),
            timestamp: Some(ts(10)),
            metadata: Map::new(),
        };
        let next = apply_update(&current, &WatermarkUpdate::default());
        assert_eq!(next, current);
    }

    #[test]
    fn should_process_respects_watermark() {
        let watermark = Watermark {
            token: Some("44:1:10".into()),
            timestamp: Some(ts(100)),
            metadata: Map::new(),
        };
        assert!(!should_process(&watermark, "44:1:10", ts(100)));
        assert!(should_process(&watermark, "44:1:11", ts(100)));
        assert!(should_process(&watermark, "44:1:10", ts(101)));
        assert!(!should_process(&watermark, "44:1:9", ts(99)));
    }
}
