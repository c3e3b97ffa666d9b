//! Unified response envelope returned by every adapter operation (C4).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Success,
    PartialSuccess,
    Failure,
    RateLimited,
    SourceUnavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterError {
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
    pub message: String,
    pub context: Map<String, Value>,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdapterMetrics {
    pub records_attempted: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
    pub duration_seconds: f64,
    pub rate_limit_hits: u64,
    pub retry_count: u64,
    pub http_request_count: u64,
    pub http_not_modified: u64,
    pub http_retry_429: u64,
    pub http_retry_5xx: u64,
    pub http_retry_other: u64,
    pub http_latency_avg_ms: f64,
    pub http_latency_p95_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterResponse<T> {
    pub status: AdapterStatus,
    pub data: Option<Vec<T>>,
    pub errors: Vec<AdapterError>,
    pub metrics: AdapterMetrics,
    pub source: String,
    pub fetch_timestamp: DateTime<Utc>,
    pub cache_until: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
}

impl<T> AdapterResponse<T> {
    pub fn success(
        source: impl Into<String>,
        data: Vec<T>,
        errors: Vec<AdapterError>,
        metrics: AdapterMetrics,
        cache_until: Option<DateTime<Utc>>,
        metadata: Map<String, Value>,
    ) -> Self {
        let status = if errors.is_empty() {
            AdapterStatus::Success
        } else {
            AdapterStatus::PartialSuccess
        };
        Self {
            status,
            data: Some(data),
            errors,
            metrics,
            source: source.into(),
            fetch_timestamp: Utc::now(),
            cache_until,
            metadata,
        }
    }

    pub fn failure(
        source: impl Into<String>,
        error: AdapterError,
        metrics: AdapterMetrics,
        retryable: bool,
    ) -> Self {
        Self {
            status: if retryable {
                AdapterStatus::SourceUnavailable
            } else {
                AdapterStatus::Failure
            },
            data: None,
            errors: vec![error],
            metrics,
            source: source.into(),
            fetch_timestamp: Utc::now(),
            cache_until: None,
            metadata: Map::new(),
        }
    }
}
