//! PublicationSearch Hansard listing adapter (C4).
//!
//! The House's PublicationSearch page is plain paginated HTML, not JSON or
//! XML; scraped with `scraper`, with publication ids and PDF issue codes
//! pulled out via regex since neither is exposed as a structured
//! attribute.

use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use scraper::{Html, Selector};

use crate::adapters::hansard::DebateSource;
use crate::error::IngestError;
use crate::http::client::HttpAdapterCore;
use crate::http::response::{AdapterError, AdapterMetrics, AdapterResponse};

const DEFAULT_BASE_URL: &str = "https://www.ourcommons.ca/PublicationSearch/en/";

static DOCUMENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d+)(?:[#/?]|$)").expect("valid regex"));
static PDF_ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)HAN([^/-]+)-[EF]\.PDF").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct PublicationSearchResult {
    pub publication_id: i64,
    pub parliament: i32,
    pub session: i32,
    pub issue: String,
    pub issue_code: Option<String>,
    pub english_html_url: String,
    pub french_html_url: String,
    pub english_pdf_url: Option<String>,
    pub french_pdf_url: Option<String>,
    pub publication_date: String,
}

/// Pages of 15, 30, 60, or 100 are the only sizes the upstream search
/// endpoint accepts.
fn valid_page_size(page_size: u32) -> bool {
    matches!(page_size, 15 | 30 | 60 | 100)
}

/// Fetch every page of PublicationSearch results for `parliament`/`session`,
/// deduplicating by publication id and stopping once a page yields nothing
/// new (mirrors how the upstream search silently repeats the last page
/// past the end of its result set).
pub async fn search_debates(
    core: &HttpAdapterCore,
    base_url: &str,
    parliament: i32,
    session: i32,
    page_size: u32,
    max_pages: Option<u32>,
) -> Result<Vec<PublicationSearchResult>, IngestError> {
    if !valid_page_size(page_size) {
        return Err(IngestError::other("page_size must be one of 15, 30, 60, 100"));
    }

    let base_url = if base_url.is_empty() {
        DEFAULT_BASE_URL
    } else {
        base_url
    };

    let mut seen_ids = std::collections::HashSet::new();
    let mut results = Vec::new();
    let mut page: u32 = 1;

    loop {
        if let Some(max) = max_pages {
            if page > max {
                break;
            }
        }

        let parl_ses = format!("{parliament}-{session}");
        let params = [
            ("PubType", "37".to_string()),
            ("ParlSes", parl_ses),
            ("targetLang", String::new()),
            ("RPP", page_size.to_string()),
            ("Page", page.to_string()),
        ];

        let body = match core.get(base_url, &params).await? {
            Some(response) => response.body.to_vec(),
            None => break,
        };

        let page_results = parse_page(&body, parliament, session);
        if page_results.is_empty() {
            break;
        }

        let mut yielded = false;
        for result in page_results {
            if seen_ids.insert(result.publication_id) {
                yielded = true;
                results.push(result);
            }
        }

        if !yielded {
            break;
        }
        page += 1;
    }

    Ok(results)
}

fn parse_page(content: &[u8], parliament: i32, session: i32) -> Vec<PublicationSearchResult> {
    let html = String::from_utf8_lossy(content);
    let document = Html::parse_document(&html);

    let publication_selector = Selector::parse("#Publications div.Publication").unwrap();
    let mut results = Vec::new();
    for node in document.select(&publication_selector) {
        if let Some(result) = parse_publication(&node, parliament, session) {
            results.push(result);
        }
    }
    results
}

fn parse_publication(
    node: &scraper::ElementRef,
    parliament: i32,
    session: i32,
) -> Option<PublicationSearchResult> {
    let title_selector = Selector::parse("div.PublicationTitle a").unwrap();
    let title_node = node.select(&title_selector).next()?;

    let issue_title: String = title_node.text().collect::<String>().trim().to_string();
    let href = title_node.value().attr("href").unwrap_or("").trim();
    let publication_id = extract_publication_id(href)?;

    let mut english_html = join_url(href);
    if let Some(idx) = english_html.find('#') {
        english_html.truncate(idx);
    }
    let french_html = english_html.replacen("/en/", "/fr/", 1);

    let date_selector = Selector::parse("div.PublicationTitle div.PublicationDate").unwrap();
    let publication_date = node
        .select(&date_selector)
        .next()
        .map(|d| d.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let (english_pdf_url, french_pdf_url, issue_code) = extract_pdf_links(node);

    Some(PublicationSearchResult {
        publication_id,
        parliament,
        session,
        issue: issue_title,
        issue_code,
        english_html_url: english_html,
        french_html_url: french_html,
        english_pdf_url,
        french_pdf_url,
        publication_date,
    })
}

fn join_url(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!(
            "{}{}",
            DEFAULT_BASE_URL.trim_end_matches('/'),
            if href.starts_with('/') {
                href.to_string()
            } else {
                format!("/{href}")
            }
        )
    }
}

fn extract_publication_id(href: &str) -> Option<i64> {
    DOCUMENT_ID_RE
        .captures(href)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

fn extract_pdf_links(
    node: &scraper::ElementRef,
) -> (Option<String>, Option<String>, Option<String>) {
    let pdf_selector = Selector::parse("div.PublicationHeaderButtons a").unwrap();
    let href = node
        .select(&pdf_selector)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.to_uppercase().contains(".PDF"))
        .unwrap_or("")
        .trim()
        .to_string();

    if href.is_empty() {
        return (None, None, None);
    }

    let mut english_pdf = join_url(&href);
    if let Some(idx) = english_pdf.find('#') {
        english_pdf.truncate(idx);
    }
    if english_pdf.contains("-F.PDF") && !english_pdf.contains("-E.PDF") {
        english_pdf = english_pdf.replace("-F.PDF", "-E.PDF");
    }

    let issue_code = derive_issue_code(&english_pdf);
    let french_pdf = english_pdf
        .contains("-E.PDF")
        .then(|| english_pdf.replace("-E.PDF", "-F.PDF"));

    (Some(english_pdf), french_pdf, issue_code)
}

fn derive_issue_code(pdf_url: &str) -> Option<String> {
    PDF_ISSUE_RE
        .captures(pdf_url)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

fn issue_label(issue: &str, issue_code: &Option<String>) -> String {
    if let Some(code) = issue_code {
        let trimmed = code.trim_start_matches('0');
        return if trimmed.is_empty() {
            code.clone()
        } else {
            trimmed.to_string()
        };
    }
    let prefix = "Hansard - ";
    if let Some(rest) = issue.strip_prefix(prefix) {
        let trimmed = rest.trim();
        if trimmed.is_empty() {
            issue.to_string()
        } else {
            trimmed.to_string()
        }
    } else {
        issue.trim().to_string()
    }
}

fn build_xml_urls(result: &PublicationSearchResult) -> (Option<String>, Option<String>) {
    let Some(pdf_url) = &result.english_pdf_url else {
        return (None, None);
    };

    let english_xml = pdf_url.replace(".PDF", ".XML");
    let french_xml = if english_xml.contains("-E.XML") {
        Some(english_xml.replace("-E.XML", "-F.XML"))
    } else {
        result
            .french_pdf_url
            .as_ref()
            .map(|fr| fr.replace(".PDF", ".XML"))
    };

    (Some(english_xml), french_xml)
}

/// Turn search results for a session into debate sources ready for
/// [`crate::adapters::hansard::download_debate`], skipping any the
/// caller has already ingested (identified by `publication_id`) and any
/// without a derivable XML URL pair.
pub fn new_debate_sources(
    results: Vec<PublicationSearchResult>,
    already_ingested: &std::collections::HashSet<i64>,
) -> Vec<DebateSource> {
    let mut sources = Vec::new();
    for result in results {
        if already_ingested.contains(&result.publication_id) {
            continue;
        }
        let (english_xml, french_xml) = build_xml_urls(&result);
        let (Some(english_xml), Some(french_xml)) = (english_xml, french_xml) else {
            tracing::warn!(
                publication_id = result.publication_id,
                "skipping publication without XML URLs"
            );
            continue;
        };
        sources.push(DebateSource {
            number: issue_label(&result.issue, &result.issue_code),
            english_xml_url: english_xml,
            french_xml_url: french_xml,
            source_id: Some(result.publication_id),
            allow_missing_paragraph_ids: false,
        });
    }
    sources
}

/// Search PublicationSearch and return an `AdapterResponse` wrapping the
/// resulting `DebateSource`s, for callers that want the full C4 envelope
/// rather than the raw iterator this module otherwise exposes.
pub async fn import_new_debate_sources(
    core: &HttpAdapterCore,
    parliament: i32,
    session: i32,
    already_ingested: &std::collections::HashSet<i64>,
) -> Result<AdapterResponse<DebateSource>, IngestError> {
    let start = Instant::now();
    let mut errors = Vec::new();

    let results = match search_debates(core, DEFAULT_BASE_URL, parliament, session, 100, None).await
    {
        Ok(results) => results,
        Err(err) => {
            let (http, retries, rate_limit_hits) = core.take_metrics();
            let (avg, p95) = http.latency_stats();
            return Ok(AdapterResponse::failure(
                "publication_search",
                AdapterError {
                    timestamp: chrono::Utc::now(),
                    error_type: "publication_search_failed".into(),
                    message: err.to_string(),
                    context: serde_json::Map::new(),
                    retryable: true,
                },
                AdapterMetrics {
                    rate_limit_hits,
                    retry_count: retries,
                    http_request_count: http.request_count,
                    http_not_modified: http.not_modified,
                    http_retry_429: http.retry_429,
                    http_retry_5xx: http.retry_5xx,
                    http_retry_other: http.retry_other,
                    http_latency_avg_ms: avg,
                    http_latency_p95_ms: p95,
                    duration_seconds: start.elapsed().as_secs_f64(),
                    ..Default::default()
                },
                true,
            ));
        }
    };

    let attempted = results.len() as u64;
    let sources = new_debate_sources(results, already_ingested);
    let succeeded = sources.len() as u64;
    let failed = attempted.saturating_sub(succeeded);
    if failed > 0 {
        errors.push(AdapterError {
            timestamp: chrono::Utc::now(),
            error_type: "missing_xml_urls".into(),
            message: format!("{failed} publication(s) skipped for lacking derivable XML URLs"),
            context: serde_json::Map::new(),
            retryable: false,
        });
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
        "publication_search",
        sources,
        errors,
        metrics,
        None,
        serde_json::Map::new(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_publication_id_reads_the_trailing_numeric_segment() {
        assert_eq!(
            extract_publication_id("/Publication/DocumentViewer/12345678#"),
            Some(12345678)
        );
        assert_eq!(extract_publication_id("/no-id-here/"), None);
    }

    #[test]
    fn derive_issue_code_reads_the_han_prefixed_pdf_name() {
        assert_eq!(
            derive_issue_code("https://www.ourcommons.ca/Content/HAN128-E.PDF"),
            Some("128".to_string())
        );
        assert_eq!(derive_issue_code("https://example.test/not-a-match.pdf"), None);
    }

    #[test]
    fn issue_label_prefers_a_trimmed_issue_code() {
        assert_eq!(issue_label("Hansard - 128", &Some("0128".to_string())), "128");
        assert_eq!(issue_label("Hansard - 128", &None), "128");
        assert_eq!(issue_label("Special Sitting", &None), "Special Sitting");
    }

    #[test]
    fn build_xml_urls_derives_french_from_english_by_suffix_swap() {
        let result = PublicationSearchResult {
            publication_id: 1,
            parliament: 44,
            session: 1,
            issue: "Hansard - 128".into(),
            issue_code: Some("128".into()),
            english_html_url: String::new(),
            french_html_url: String::new(),
            english_pdf_url: Some("https://example.test/HAN128-E.PDF".into()),
            french_pdf_url: None,
            publication_date: String::new(),
        };
        let (en, fr) = build_xml_urls(&result);
        assert_eq!(en.as_deref(), Some("https://example.test/HAN128-E.XML"));
        assert_eq!(fr.as_deref(), Some("https://example.test/HAN128-F.XML"));
    }

    #[test]
    fn new_debate_sources_skips_already_ingested_publications() {
        let results = vec![PublicationSearchResult {
            publication_id: 99,
            parliament: 44,
            session: 1,
            issue: "Hansard - 1".into(),
            issue_code: Some("1".into()),
            english_html_url: String::new(),
            french_html_url: String::new(),
            english_pdf_url: Some("https://example.test/HAN001-E.PDF".into()),
            french_pdf_url: None,
            publication_date: String::new(),
        }];
        let mut seen = std::collections::HashSet::new();
        seen.insert(99);
        assert!(new_debate_sources(results, &seen).is_empty());
    }

    #[test]
    fn parse_page_reads_publication_blocks_from_html() {
        let html = r#"
            <html><body><div id="Publications">
                <div class="Publication">
                    <div class="PublicationTitle">
                        <a href="/Publication/DocumentViewer/12345">Hansard - 128</a>
                        <div class="PublicationDate">2024-02-01</div>
                    </div>
                    <div class="PublicationHeaderButtons">
                        <a href="/Content/HAN128-E.PDF">PDF</a>
                    </div>
                </div>
            </div></body></html>
        "#;
        let results = parse_page(html.as_bytes(), 44, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].publication_id, 12345);
        assert_eq!(results[0].issue_code.as_deref(), Some("128"));
    }
}
