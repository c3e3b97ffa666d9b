//! Committee and committee-meeting adapters (C4).
//!
//! Both page through OpenParliament's `pagination.next_url` convention and
//! share the same language-polymorphic normalization as the rest of the
//! adapter layer. The meetings adapter additionally follows a per-meeting
//! detail fetch to attach witnesses and tabled documents, mirroring how the
//! vote adapter hydrates per-vote detail records.

use std::time::Instant;

use serde_json::{Map, Value};

use crate::adapters::models::{CommitteeData, CommitteeMeetingData};
use crate::adapters::normalize::{coerce_int, LocalizedText};
use crate::error::IngestError;
use crate::http::client::HttpAdapterCore;
use crate::http::response::{AdapterError, AdapterMetrics, AdapterResponse};

const COMMITTEES_URL: &str = "https://api.openparliament.ca/committees/";
const MEETINGS_URL: &str = "https://api.openparliament.ca/committees/meetings/";

/// Page through the committee listing, normalizing each object.
pub async fn import_committees(
    core: &HttpAdapterCore,
) -> Result<AdapterResponse<CommitteeData>, IngestError> {
    let start = Instant::now();
    let mut data = Vec::new();
    let mut errors = Vec::new();
    let mut attempted = 0u64;
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    let mut url = COMMITTEES_URL.to_string();
    let mut params: Vec<(&str, String)> = vec![("format", "json".to_string())];
    let mut not_modified = true;

    loop {
        let body = match core.get(&url, &params).await? {
            Some(response) => response.body.to_vec(),
            None => break,
        };
        not_modified = false;

        let payload: Value = serde_json::from_slice(&body)
            .map_err(|err| IngestError::other(format!("invalid committee JSON: {err}")))?;

        let objects = payload
            .get("objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for raw in objects {
            attempted += 1;
            match normalize_committee(&raw) {
                Ok(committee) => {
                    succeeded += 1;
                    data.push(committee);
                }
                Err(err) => {
                    failed += 1;
                    errors.push(adapter_error("committee_normalize_error", err.to_string()));
                }
            }
        }

        match next_url(&payload) {
            Some(next) => {
                url = absolute_url(&next);
                params = Vec::new();
            }
            None => break,
        }
    }

    let mut metadata = Map::new();
    if not_modified {
        metadata.insert("not_modified".into(), Value::Bool(true));
    }

    let metrics = build_metrics(core, start, attempted, succeeded, failed);
    Ok(AdapterResponse::success(
        "committees",
        data,
        errors,
        metrics,
        None,
        metadata,
    ))
}

fn normalize_committee(raw: &Value) -> Result<CommitteeData, IngestError> {
    let slug = raw
        .get("slug")
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::other("committee missing slug"))?
        .to_string();

    let parl_session = raw.get("parliament_session").and_then(Value::as_str);
    let (parliament, session) = parl_session
        .and_then(|s| s.split_once('-'))
        .map(|(p, s)| {
            (
                p.parse::<i32>().unwrap_or_default(),
                s.parse::<i32>().unwrap_or_default(),
            )
        })
        .unwrap_or((
            coerce_int(raw.get("parliament")).unwrap_or_default() as i32,
            coerce_int(raw.get("session")).unwrap_or_default() as i32,
        ));

    let name = LocalizedText::from_value(raw.get("name"));
    let short_name = LocalizedText::from_value(raw.get("short_name"));

    Ok(CommitteeData {
        committee_id: raw
            .get("id")
            .map(|v| v.to_string())
            .unwrap_or_else(|| slug.clone()),
        parliament,
        session,
        committee_slug: slug.clone(),
        acronym_en: short_name
            .pick_en()
            .unwrap_or_else(|| slug.to_uppercase()),
        acronym_fr: short_name.pick_fr().unwrap_or_else(|| slug.to_uppercase()),
        name_en: name.pick_en(),
        name_fr: name.pick_fr(),
        chamber: raw
            .get("chamber")
            .and_then(Value::as_str)
            .unwrap_or("house")
            .to_string(),
        source_url: raw
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Page through the committee-meeting listing, hydrating each meeting with
/// a detail fetch for its witnesses and tabled documents. A detail-fetch
/// failure attaches a non-fatal `AdapterError`; the parent meeting record
/// is still yielded with empty witness/document lists, mirroring the
/// "detail failures attach an error but don't drop the parent record" rule
/// the vote detail fetch also follows.
pub async fn import_committee_meetings(
    core: &HttpAdapterCore,
) -> Result<AdapterResponse<CommitteeMeetingData>, IngestError> {
    let start = Instant::now();
    let mut data = Vec::new();
    let mut errors = Vec::new();
    let mut attempted = 0u64;
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    let mut url = MEETINGS_URL.to_string();
    let mut params: Vec<(&str, String)> = vec![("format", "json".to_string())];

    loop {
        let body = match core.get(&url, &params).await? {
            Some(response) => response.body.to_vec(),
            None => break,
        };

        let payload: Value = serde_json::from_slice(&body)
            .map_err(|err| IngestError::other(format!("invalid meeting JSON: {err}")))?;

        let objects = payload
            .get("objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for raw in objects {
            attempted += 1;
            let mut meeting = match normalize_meeting(&raw) {
                Ok(meeting) => meeting,
                Err(err) => {
                    failed += 1;
                    errors.push(adapter_error("meeting_normalize_error", err.to_string()));
                    continue;
                }
            };

            if let Some(detail_url) = raw.get("url").and_then(Value::as_str) {
                match fetch_meeting_detail(core, detail_url).await {
                    Ok((witnesses, documents)) => {
                        meeting.witnesses = witnesses;
                        meeting.documents = documents;
                    }
                    Err(err) => {
                        errors.push(adapter_error("meeting_detail_fetch_error", err.to_string()));
                    }
                }
            }

            succeeded += 1;
            data.push(meeting);
        }

        match next_url(&payload) {
            Some(next) => {
                url = absolute_url(&next);
                params = Vec::new();
            }
            None => break,
        }
    }

    let metrics = build_metrics(core, start, attempted, succeeded, failed);
    Ok(AdapterResponse::success(
        "committee_meetings",
        data,
        errors,
        metrics,
        None,
        Map::new(),
    ))
}

fn normalize_meeting(raw: &Value) -> Result<CommitteeMeetingData, IngestError> {
    let committee_slug = raw
        .get("committee")
        .and_then(Value::as_str)
        .map(|s| s.trim_matches('/').rsplit('/').next().unwrap_or(s).to_string())
        .ok_or_else(|| IngestError::other("meeting missing committee reference"))?;

    let title = LocalizedText::from_value(raw.get("title"));

    Ok(CommitteeMeetingData {
        committee_slug,
        meeting_number: coerce_int(raw.get("number")).map(|n| n as i32),
        parliament: coerce_int(raw.get("parliament")).unwrap_or_default() as i32,
        session: coerce_int(raw.get("session")).unwrap_or_default() as i32,
        meeting_date: raw
            .get("date")
            .and_then(Value::as_str)
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        title_en: title.pick_en(),
        title_fr: title.pick_fr(),
        source_url: raw.get("url").and_then(Value::as_str).map(str::to_string),
        witnesses: Vec::new(),
        documents: Vec::new(),
    })
}

async fn fetch_meeting_detail(
    core: &HttpAdapterCore,
    detail_url: &str,
) -> Result<(Vec<String>, Vec<String>), IngestError> {
    let url = absolute_url(detail_url);
    let body = match core.get(&url, &[("format", "json".to_string())]).await? {
        Some(response) => response.body.to_vec(),
        None => return Ok((Vec::new(), Vec::new())),
    };
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| IngestError::other(format!("invalid meeting detail JSON: {err}")))?;

    let witnesses = payload
        .get("witnesses")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|w| {
                    w.get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();

    let documents = payload
        .get("documents")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|d| d.get("url").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok((witnesses, documents))
}

/// Resolve a (possibly relative) OpenParliament URL against its API root.
fn absolute_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!(
            "https://api.openparliament.ca{}",
            if url.starts_with('/') {
                url.to_string()
            } else {
                format!("/{url}")
            }
        )
    }
}

fn next_url(payload: &Value) -> Option<String> {
    payload
        .get("pagination")
        .and_then(|p| p.get("next_url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn adapter_error(error_type: &str, message: String) -> AdapterError {
    AdapterError {
        timestamp: chrono::Utc::now(),
        error_type: error_type.to_string(),
        message,
        context: Map::new(),
        retryable: false,
    }
}

fn build_metrics(
    core: &HttpAdapterCore,
    start: Instant,
    attempted: u64,
    succeeded: u64,
    failed: u64,
) -> AdapterMetrics {
    let (http, retries, rate_limit_hits) = core.take_metrics();
    let (avg, p95) = http.latency_stats();
    AdapterMetrics {
        records_attempted: attempted,
        records_succeeded: succeeded,
        records_failed: failed,
        duration_seconds: start.elapsed().as_secs_f64(),
        rate_limit_hits,
        retry_count: retries,
        http_request_count: http.request_count,
        http_not_modified: http.not_modified,
        http_retry_429: http.retry_429,
        http_retry_5xx: http.retry_5xx,
        http_retry_other: http.retry_other,
        http_latency_avg_ms: avg,
        http_latency_p95_ms: p95,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_committee_prefers_parliament_session_composite_field() {
        let raw = json!({
            "slug": "fina",
            "parliament_session": "44-1",
            "name": {"en": "Finance", "fr": "Finances"},
            "short_name": {"en": "FINA", "fr": "FINA"},
            "chamber": "house",
            "url": "/committees/fina/",
            "id": 1,
        });
        let committee = normalize_committee(&raw).unwrap();
        assert_eq!(committee.parliament, 44);
        assert_eq!(committee.session, 1);
        assert_eq!(committee.name_en.as_deref(), Some("Finance"));
        assert_eq!(committee.name_fr.as_deref(), Some("Finances"));
    }

    #[test]
    fn normalize_committee_requires_a_slug() {
        let raw = json!({"name": "Finance"});
        assert!(normalize_committee(&raw).is_err());
    }

    #[test]
    fn normalize_meeting_extracts_trailing_committee_slug() {
        let raw = json!({
            "committee": "/committees/fina/",
            "number": 12,
            "parliament": 44,
            "session": 1,
            "date": "2024-02-01",
            "title": "Pre-budget consultations",
            "url": "/committees/fina/44-1/12/",
        });
        let meeting = normalize_meeting(&raw).unwrap();
        assert_eq!(meeting.committee_slug, "fina");
        assert_eq!(meeting.meeting_number, Some(12));
        assert_eq!(
            meeting.meeting_date,
            Some(chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
        );
    }

    #[test]
    fn absolute_url_joins_relative_paths_against_the_api_root() {
        assert_eq!(
            absolute_url("/committees/fina/"),
            "https://api.openparliament.ca/committees/fina/"
        );
        assert_eq!(
            absolute_url("https://api.openparliament.ca/committees/fina/"),
            "https://api.openparliament.ca/committees/fina/"
        );
    }

    #[test]
    fn next_url_reads_the_pagination_envelope() {
        let payload = json!({"pagination": {"next_url": "/committees/?format=json&offset=20"}});
        assert_eq!(
            next_url(&payload).as_deref(),
            Some("/committees/?format=json&offset=20")
        );
        assert_eq!(next_url(&json!({"pagination": {}})), None);
    }
}
