//! House of Commons recorded-vote adapter (C4).
//!
//! Mirrors the upstream XML feed: an English and French vote list plus a
//! per-vote detail document giving each member's ballot. Votes are
//! idempotent against the `votes` watermark, keyed on
//! `(parliament, session, vote_number)` at equal event timestamps.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::adapters::models::{Ballot, VoteData, VoteRecord, VoteResult};
use crate::adapters::xml;
use crate::error::IngestError;
use crate::http::client::HttpAdapterCore;
use crate::http::response::{AdapterError, AdapterMetrics, AdapterResponse};
use crate::watermark::{should_process, Watermark, WatermarkStore, WatermarkUpdate};

const VOTELIST_URL: &str = "https://www.ourcommons.ca/members/{lang}/votes/xml";
const VOTEDETAIL_URL: &str =
    "https://www.ourcommons.ca/members/en/votes/{parliament}/{session}/{vote_number}/xml";

#[derive(Debug, Deserialize)]
struct VoteXml {
    #[serde(rename = "DecisionDivisionNumber")]
    decision_division_number: i32,
    #[serde(rename = "ParliamentNumber")]
    parliament_number: i32,
    #[serde(rename = "SessionNumber")]
    session_number: i32,
    #[serde(rename = "DecisionEventDateTime")]
    decision_event_date_time: String,
    #[serde(rename = "DecisionDivisionNumberOfYeas")]
    yeas: i32,
    #[serde(rename = "DecisionDivisionNumberOfNays")]
    nays: i32,
    #[serde(rename = "DecisionDivisionNumberOfPaired")]
    paired: i32,
    #[serde(rename = "DecisionResultName")]
    decision_result_name: String,
    #[serde(rename = "BillNumberCode", default)]
    bill_number_code: Option<String>,
    #[serde(rename = "DecisionDivisionSubject", default)]
    decision_division_subject: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoteParticipantXml {
    #[serde(rename = "PersonId")]
    person_id: String,
    #[serde(rename = "IsVoteYea")]
    is_yea: String,
    #[serde(rename = "IsVoteNay")]
    is_nay: String,
    #[serde(rename = "IsVotePaired")]
    is_paired: String,
}

/// Fetch both vote lists, normalize new votes since the stored watermark,
/// and advance the watermark once at the end of the run.
pub async fn import_votes(
    core: &HttpAdapterCore,
    watermark_store: &dyn WatermarkStore,
) -> Result<AdapterResponse<VoteData>, IngestError> {
    let start = Instant::now();
    let watermark = watermark_store.get("votes").await?;
    let mut latest_timestamp = watermark.timestamp;
    let mut latest_token = watermark.token.clone();
    let mut latest_meta = watermark.metadata.clone();

    let mut errors = Vec::new();
    let mut data = Vec::new();
    let mut attempted = 0u64;
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    let votelist_url_en = VOTELIST_URL.replace("{lang}", "en");
    let votelist_url_fr = VOTELIST_URL.replace("{lang}", "fr");

    let en_body = match fetch_body(core, &votelist_url_en).await {
        Ok(Some(body)) => body,
        Ok(None) => {
            return Ok(AdapterResponse::success(
                "votes",
                Vec::new(),
                Vec::new(),
                build_metrics(core, start, 0, 0, 0),
                None,
                Map::new(),
            ))
        }
        Err(err) => {
            return Ok(AdapterResponse::failure(
                "votes",
                adapter_error("transport_error", err.to_string(), true),
                build_metrics(core, start, 0, 0, 0),
                true,
            ))
        }
    };

    let fr_body = match fetch_body(core, &votelist_url_fr).await {
        Ok(Some(body)) => body,
        Ok(None) => Vec::new(),
        Err(err) => {
            errors.push(adapter_error(
                "french_votelist_unavailable",
                err.to_string(),
                true,
            ));
            Vec::new()
        }
    };

    let mut fr_subjects: HashMap<i32, String> = HashMap::new();
    if !fr_body.is_empty() {
        if let Ok(fr_raw_votes) = xml::extract_elements(&fr_body, "Vote") {
            for raw in &fr_raw_votes {
                if let Ok(v) = quick_xml::de::from_str::<VoteXml>(raw) {
                    if let Some(subject) = v.decision_division_subject {
                        fr_subjects.insert(v.decision_division_number, subject);
                    }
                }
            }
        }
    }

    let raw_votes = xml::extract_elements(&en_body, "Vote")?;

    for raw in &raw_votes {
        attempted += 1;

        let parsed: VoteXml = match quick_xml::de::from_str(raw) {
            Ok(v) => v,
            Err(err) => {
                failed += 1;
                errors.push(adapter_error("xml_parse_error", err.to_string(), false));
                continue;
            }
        };

        let event_dt = match NaiveDateTime::parse_from_str(
            &parsed.decision_event_date_time,
            "%Y-%m-%dT%H:%M:%S",
        ) {
            Ok(dt) => DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc),
            Err(err) => {
                failed += 1;
                errors.push(adapter_error("bad_event_datetime", err.to_string(), false));
                continue;
            }
        };

        if skip_due_to_watermark(&watermark.timestamp, &watermark.metadata, &parsed, event_dt) {
            continue;
        }

        let result = match parsed.decision_result_name.as_str() {
            "Agreed to" | "Agreed To" => VoteResult::Agreed,
            "Negatived" => VoteResult::Negatived,
            "Tie" => VoteResult::Tie,
            other => {
                tracing::error!(
                    vote_number = parsed.decision_division_number,
                    decision = other,
                    votelist_url = %votelist_url_en,
                    "couldn't process vote result"
                );
                failed += 1;
                errors.push(adapter_error(
                    "unrecognized_vote_result",
                    format!(
                        "couldn't process vote result {other} in {votelist_url_en}"
                    ),
                    false,
                ));
                continue;
            }
        };

        if parsed.yeas + parsed.nays < 100 {
            tracing::error!(
                vote_number = parsed.decision_division_number,
                "fewer than 100 votes cast on this division"
            );
        }

        let description_fr = fr_subjects.get(&parsed.decision_division_number).cloned();
        if description_fr.is_none() && !fr_body.is_empty() {
            tracing::warn!(
                vote_number = parsed.decision_division_number,
                votelist_url = %votelist_url_fr,
                "couldn't get French description for vote"
            );
        }

        let detail_url = VOTEDETAIL_URL
            .replace("{parliament}", &parsed.parliament_number.to_string())
            .replace("{session}", &parsed.session_number.to_string())
            .replace(
                "{vote_number}",
                &parsed.decision_division_number.to_string(),
            );

        let records = match fetch_body(core, &detail_url).await {
            Ok(Some(body)) => match parse_vote_records(&body) {
                Ok(records) => records,
                Err(err) => {
                    failed += 1;
                    errors.push(adapter_error("vote_detail_parse_error", err.to_string(), true));
                    continue;
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                failed += 1;
                errors.push(adapter_error("vote_detail_unavailable", err.to_string(), true));
                continue;
            }
        };

        let token_meta = vote_token_meta(&parsed);
        let token = format!(
            "{}:{}:{}",
            parsed.parliament_number, parsed.session_number, parsed.decision_division_number
        );

        data.push(VoteData {
            parliament: parsed.parliament_number,
            session: parsed.session_number,
            vote_number: parsed.decision_division_number,
            event_datetime: event_dt,
            description_en: parsed.decision_division_subject.clone(),
            description_fr,
            bill_number: parsed.bill_number_code.clone(),
            result,
            yeas: parsed.yeas,
            nays: parsed.nays,
            paired: parsed.paired,
            records,
        });
        succeeded += 1;

        if is_newer(&latest_timestamp, &latest_meta, event_dt, parsed.decision_division_number) {
            latest_timestamp = Some(event_dt);
            latest_token = Some(token);
            latest_meta = token_meta;
        }
    }

    if let Some(ts) = latest_timestamp {
        let watermark_moved =
            watermark.timestamp.is_none() || Some(ts) != watermark.timestamp || latest_token != watermark.token;
        if watermark_moved {
            watermark_store
                .update(
                    "votes",
                    WatermarkUpdate {
                        token: latest_token,
                        timestamp: Some(ts),
                        metadata: Some(latest_meta),
                    },
                )
                .await?;
        }
    }

    let metrics = build_metrics(core, start, attempted, succeeded, failed);
    Ok(AdapterResponse::success(
        "votes",
        data,
        errors,
        metrics,
        None,
        Map::new(),
    ))
}

fn vote_token_meta(parsed: &VoteXml) -> Map<String, Value> {
    json!({
        "parliament": parsed.parliament_number,
        "session": parsed.session_number,
        "vote": parsed.decision_division_number,
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

fn skip_due_to_watermark(
    stored_timestamp: &Option<DateTime<Utc>>,
    stored_meta: &Map<String, Value>,
    parsed: &VoteXml,
    event_dt: DateTime<Utc>,
) -> bool {
    let Some(stored) = stored_timestamp else {
        return false;
    };
    if event_dt != *stored {
        // The generic strictly-before/strictly-after cases from §4.1 are
        // exactly what `should_process` decides; only the equal-timestamp
        // tie needs this adapter's ordinal vote-number rule below.
        let generic_watermark = Watermark {
            token: None,
            timestamp: Some(*stored),
            metadata: Map::new(),
        };
        return !should_process(&generic_watermark, "", event_dt);
    }
    let same_parliament =
        stored_meta.get("parliament").and_then(Value::as_i64) == Some(parsed.parliament_number as i64);
    let same_session =
        stored_meta.get("session").and_then(Value::as_i64) == Some(parsed.session_number as i64);
    let last_vote = stored_meta.get("vote").and_then(Value::as_i64);
    same_parliament
        && same_session
        && last_vote.is_some_and(|last| parsed.decision_division_number as i64 <= last)
}

fn is_newer(
    latest_timestamp: &Option<DateTime<Utc>>,
    latest_meta: &Map<String, Value>,
    event_dt: DateTime<Utc>,
    vote_number: i32,
) -> bool {
    match latest_timestamp {
        None => true,
        Some(ts) if event_dt > *ts => true,
        Some(ts) if event_dt == *ts => {
            let last_vote = latest_meta.get("vote").and_then(Value::as_i64).unwrap_or(-1);
            vote_number as i64 > last_vote
        }
        _ => false,
    }
}

fn parse_vote_records(body: &[u8]) -> Result<Vec<VoteRecord>, IngestError> {
    let mut records = Vec::new();
    for raw in xml::extract_elements(body, "VoteParticipant")? {
        let participant: VoteParticipantXml =
            quick_xml::de::from_str(&raw).map_err(|err| IngestError::Xml(err.to_string()))?;
        let ballot = if participant.is_yea == "true" {
            Ballot::Yea
        } else if participant.is_nay == "true" {
            Ballot::Nay
        } else if participant.is_paired == "true" {
            Ballot::Paired
        } else {
            return Err(IngestError::other(format!(
                "couldn't parse recorded vote for person {}",
                participant.person_id
            )));
        };
        records.push(VoteRecord {
            politician_parl_id: participant.person_id,
            ballot,
        });
    }
    Ok(records)
}

async fn fetch_body(core: &HttpAdapterCore, url: &str) -> Result<Option<Vec<u8>>, IngestError> {
    match core.get(url, &[]).await? {
        Some(response) => Ok(Some(response.body.to_vec())),
        None => Ok(None),
    }
}

fn adapter_error(error_type: &str, message: String, retryable: bool) -> AdapterError {
    AdapterError {
        timestamp: Utc::now(),
        error_type: error_type.to_string(),
        message,
        context: Map::new(),
        retryable,
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

    fn vote(parliament: i32, session: i32, number: i32, decision: &str) -> VoteXml {
        VoteXml {
            decision_division_number: number,
            parliament_number: parliament,
            session_number: session,
            decision_event_date_time: "2024-02-01T14:00:00".into(),
            yeas: 170,
            nays: 140,
            paired: 0,
            decision_result_name: decision.into(),
            bill_number_code: None,
            decision_division_subject: None,
        }
    }

    #[test]
    fn skip_due_to_watermark_rejects_strictly_older_events() {
        let stored = Some(DateTime::parse_from_rfc3339("2024-02-01T15:00:00Z").unwrap().into());
        let parsed = vote(44, 1, 10, "Agreed to");
        let event_dt: DateTime<Utc> =
            DateTime::parse_from_rfc3339("2024-02-01T14:00:00Z").unwrap().into();
        assert!(skip_due_to_watermark(&stored, &Map::new(), &parsed, event_dt));
    }

    #[test]
    fn skip_due_to_watermark_rejects_equal_events_with_lower_vote_number() {
        let stored_ts: DateTime<Utc> =
            DateTime::parse_from_rfc3339("2024-02-01T14:00:00Z").unwrap().into();
        let mut meta = Map::new();
        meta.insert("parliament".into(), json!(44));
        meta.insert("session".into(), json!(1));
        meta.insert("vote".into(), json!(20));
        let parsed = vote(44, 1, 10, "Agreed to");
        assert!(skip_due_to_watermark(&Some(stored_ts), &meta, &parsed, stored_ts));
    }

    #[test]
    fn skip_due_to_watermark_allows_a_higher_vote_number_at_the_same_instant() {
        let stored_ts: DateTime<Utc> =
            DateTime::parse_from_rfc3339("2024-02-01T14:00:00Z").unwrap().into();
        let mut meta = Map::new();
        meta.insert("parliament".into(), json!(44));
        meta.insert("session".into(), json!(1));
        meta.insert("vote".into(), json!(5));
        let parsed = vote(44, 1, 10, "Agreed to");
        assert!(!skip_due_to_watermark(&Some(stored_ts), &meta, &parsed, stored_ts));
    }

    #[test]
    fn unrecognized_decision_falls_through_to_the_error_arm() {
        let parsed = vote(44, 1, 1, "Some New Decision Type");
        assert!(!matches!(parsed.decision_result_name.as_str(), "Agreed to" | "Agreed To" | "Negatived" | "Tie"));
    }

    #[test]
    fn parse_vote_records_maps_ballots() {
        let xml = br#"<VoteDetail>
            <VoteParticipant><PersonId>1</PersonId><IsVoteYea>true</IsVoteYea><IsVoteNay>false</IsVoteNay><IsVotePaired>false</IsVotePaired></VoteParticipant>
            <VoteParticipant><PersonId>2</PersonId><IsVoteYea>false</IsVoteYea><IsVoteNay>true</IsVoteNay><IsVotePaired>false</IsVotePaired></VoteParticipant>
            <VoteParticipant><PersonId>3</PersonId><IsVoteYea>false</IsVoteYea><IsVoteNay>false</IsVoteNay><IsVotePaired>true</IsVotePaired></VoteParticipant>
        </VoteDetail>"#;
        let records = parse_vote_records(xml).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].ballot, Ballot::Yea);
        assert_eq!(records[1].ballot, Ballot::Nay);
        assert_eq!(records[2].ballot, Ballot::Paired);
    }
}
