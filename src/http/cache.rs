//! Conditional-GET validators (ETag / Last-Modified), one per cache key,
//! so an adapter can avoid re-downloading payloads that haven't changed.

use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

#[derive(Debug, Clone, Default)]
pub struct CacheValidator {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheValidator {
    /// Return the conditional headers to merge into the next request.
    pub fn apply(&self, base_headers: &HeaderMap) -> HeaderMap {
        let mut headers = base_headers.clone();
        if let Some(etag) = &self.etag {
            if let Ok(value) = etag.parse() {
                headers.insert(IF_NONE_MATCH, value);
            }
        }
        if let Some(last_modified) = &self.last_modified {
            if let Ok(value) = last_modified.parse() {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }
        headers
    }

    /// Update from response headers; returns `true` if anything changed.
    pub fn update_from_headers(&mut self, headers: &HeaderMap) -> bool {
        let mut updated = false;

        if let Some(etag) = headers.get(ETAG).and_then(|v| v.to_str().ok()) {
            if Some(etag) != self.etag.as_deref() {
                self.etag = Some(etag.to_string());
                updated = true;
            }
        }
        if let Some(last_modified) = headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()) {
            if Some(last_modified) != self.last_modified.as_deref() {
                self.last_modified = Some(last_modified.to_string());
                updated = true;
            }
        }
        updated
    }

    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Keyed store of validators, one per request URL (or caller-chosen cache
/// key when params need folding into the key).
#[derive(Default)]
pub struct CacheValidatorStore {
    validators: Mutex<HashMap<String, CacheValidator>>,
}

impl CacheValidatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator_for(&self, cache_key: &str) -> CacheValidator {
        self.validators
            .lock()
            .unwrap()
            .entry(cache_key.to_string())
            .or_default()
            .clone()
    }

    pub fn record_response(&self, cache_key: &str, headers: &HeaderMap) {
        let mut validators = self.validators.lock().unwrap();
        validators
            .entry(cache_key.to_string())
            .or_default()
            .update_from_headers(headers);
    }
}

/// Build a stable cache key for a URL plus sorted query parameters,
/// matching the way adapter call sites fold their pagination params in.
pub fn cache_key(url: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    let query = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{url}?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn apply_sets_conditional_headers_once_known() {
        let validator = CacheValidator {
            etag: Some("\"abc\"".into()),
            last_modified: Some("Tue, 01 Jan 2030 00:00:00 GMT".into()),
        };
        let headers = validator.apply(&HeaderMap::new());
        assert_eq!(headers.get(IF_NONE_MATCH).unwrap(), "\"abc\"");
        assert!(headers.contains_key(IF_MODIFIED_SINCE));
    }

    #[test]
    fn update_from_headers_reports_change() {
        let mut validator = CacheValidator::default();
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"v1\""));
        assert!(validator.update_from_headers(&headers));
        assert!(!validator.update_from_headers(&headers));
    }

    #[test]
    fn cache_key_sorts_params_for_stability() {
        let a = cache_key("https://x", &[("b", "2".into()), ("a", "1".into())]);
        let b = cache_key("https://x", &[("a", "1".into()), ("b", "2".into())]);
        assert_eq!(a, b);
    }
}
