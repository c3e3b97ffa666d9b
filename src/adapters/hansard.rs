//! House of Commons Hansard (debate transcript) adapter (C4).
//!
//! Each sitting is published as a matched pair of English/French XML
//! documents. A missing English document means the sitting hasn't been
//! published yet; a missing paragraph-id attribute across almost every
//! paragraph means the transcript isn't ready for downstream processing.

use std::time::Instant;

use reqwest::StatusCode;

use crate::adapters::models::DebateData;
use crate::adapters::xml;
use crate::error::IngestError;
use crate::http::client::HttpAdapterCore;
use crate::http::response::{AdapterError, AdapterMetrics, AdapterResponse};

const HANSARD_URL_TEMPLATE: &str =
    "https://www.ourcommons.ca/Content/House/{parliament}{session}/Debates/{sitting}/HAN{sitting}-{lang}.XML";

/// The minimum fraction of `<ParaText>` elements that must carry an `id`
/// attribute before a debate is considered ready to ingest.
const PARAGRAPH_ID_COVERAGE_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone)]
pub struct DebateSource {
    pub number: String,
    pub english_xml_url: String,
    pub french_xml_url: String,
    pub source_id: Option<i64>,
    pub allow_missing_paragraph_ids: bool,
}

impl DebateSource {
    pub fn numeric(parliament: i32, session: i32, sitting_number: u32) -> Self {
        let sitting = format!("{sitting_number:03}");
        Self {
            number: sitting_number.to_string(),
            english_xml_url: HANSARD_URL_TEMPLATE
                .replace("{parliament}", &parliament.to_string())
                .replace("{session}", &session.to_string())
                .replace("{sitting}", &sitting)
                .replace("{lang}", "E"),
            french_xml_url: HANSARD_URL_TEMPLATE
                .replace("{parliament}", &parliament.to_string())
                .replace("{session}", &session.to_string())
                .replace("{sitting}", &sitting)
                .replace("{lang}", "F"),
            source_id: None,
            allow_missing_paragraph_ids: false,
        }
    }
}

/// Fetch the English/French XML for `source`, returning `Ok(None)` when
/// the transcript isn't published yet or doesn't clear the paragraph-id
/// coverage gate.
pub async fn download_debate(
    core: &HttpAdapterCore,
    source: &DebateSource,
) -> Result<Option<DebateData>, IngestError> {
    let english = match core.get(&source.english_xml_url, &[]).await {
        Ok(Some(response)) if response.status == StatusCode::NOT_FOUND => {
            return Err(IngestError::NoDocumentFound(source.english_xml_url.clone()))
        }
        Ok(Some(response)) => response.body.to_vec(),
        Ok(None) => return Ok(None),
        Err(err) => {
            tracing::error!(error = %err, url = %source.english_xml_url, "error fetching debate XML");
            return Err(IngestError::NoDocumentFound(source.english_xml_url.clone()));
        }
    };

    let french = match core.get(&source.french_xml_url, &[]).await {
        Ok(Some(response)) if response.status == StatusCode::NOT_FOUND => {
            return Err(IngestError::NoDocumentFound(source.french_xml_url.clone()))
        }
        Ok(Some(response)) => response.body.to_vec(),
        Ok(None) => return Ok(None),
        Err(err) => {
            tracing::error!(error = %err, url = %source.french_xml_url, "error fetching French debate XML");
            return Err(IngestError::NoDocumentFound(source.french_xml_url.clone()));
        }
    };

    let english_xml = normalize_line_endings(&english);
    let french_xml = normalize_line_endings(&french);

    let en_id_attr = xml::root_id_attribute(&english_xml)?;
    let mut source_id = source.source_id;
    if let Some(attr) = en_id_attr {
        let parsed: i64 = attr
            .parse()
            .map_err(|_| IngestError::other(format!("invalid source id attribute: {attr}")))?;
        if let Some(expected) = source_id {
            if expected != parsed {
                tracing::warn!(
                    sitting = %source.number,
                    expected,
                    found = parsed,
                    "source id mismatch"
                );
            }
        }
        source_id = Some(parsed);
    }
    let source_id =
        source_id.ok_or_else(|| IngestError::other("debate XML missing source id"))?;

    let fr_id = xml::root_id_attribute(&french_xml)?
        .map(|attr| attr.parse::<i64>())
        .transpose()
        .map_err(|_| IngestError::other("invalid French source id attribute"))?
        .unwrap_or(source_id);
    if fr_id != source_id {
        return Err(IngestError::other(
            "English/French XML source id mismatch",
        ));
    }

    if !source.allow_missing_paragraph_ids
        && (!has_paragraph_ids(&english_xml)? || !has_paragraph_ids(&french_xml)?)
    {
        tracing::warn!(sitting = %source.number, "missing paragraph IDs, cancelling import");
        return Ok(None);
    }

    Ok(Some(DebateData {
        source_id,
        number: source.number.clone(),
        english_xml,
        french_xml,
    }))
}

fn normalize_line_endings(xml: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(xml);
    text.replace("\r\n", "\n").into_bytes()
}

fn has_paragraph_ids(xml: &[u8]) -> Result<bool, IngestError> {
    let (total, with_id) = xml::count_elements_with_attribute(xml, "ParaText", "id")?;
    if total == 0 {
        return Ok(false);
    }
    Ok((with_id as f64 / total as f64) > PARAGRAPH_ID_COVERAGE_THRESHOLD)
}

/// Bulk-fetch a contiguous run of sittings, collecting each successfully
/// downloaded debate into the response's `data` and surfacing the rest as
/// errors so a partial run still produces a usable response.
pub async fn import_debate_range(
    core: &HttpAdapterCore,
    parliament: i32,
    session: i32,
    sittings: impl IntoIterator<Item = u32>,
) -> Result<AdapterResponse<DebateData>, IngestError> {
    let start = Instant::now();
    let mut data = Vec::new();
    let mut errors = Vec::new();
    let mut attempted = 0u64;
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    for sitting in sittings {
        attempted += 1;
        let source = DebateSource::numeric(parliament, session, sitting);
        match download_debate(core, &source).await {
            Ok(Some(debate)) => {
                succeeded += 1;
                data.push(debate);
            }
            Ok(None) => {
                // Not published yet, or failed the paragraph-id gate; not
                // an error, just nothing to ingest this run.
            }
            Err(IngestError::NoDocumentFound(_)) => {
                // Sittings aren't contiguous; a missing one further along
                // in the range usually just means we've run past the end.
                break;
            }
            Err(err) => {
                failed += 1;
                errors.push(AdapterError {
                    timestamp: chrono::Utc::now(),
                    error_type: "hansard_fetch_error".into(),
                    message: err.to_string(),
                    context: serde_json::Map::new(),
                    retryable: true,
                });
            }
        }
    }

    let (http, retries, rate_limit_hits) = core.take_metrics();
    let (avg, p95) = http.latency_stats();
    let metrics = AdapterMetrics {
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
    };

    Ok(AdapterResponse::success(
        "hansard",
        data,
        errors,
        metrics,
        None,
        serde_json::Map::new(),
    ))
}
