//! Shared normalization helpers for upstream payloads whose language
//! fields arrive either as a flat string or as an `{"en": ..., "fr": ...}`
//! object.

use serde_json::Value;

/// A language-polymorphic text field as it can appear in upstream JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalizedText {
    Flat(String),
    Localized { en: Option<String>, fr: Option<String> },
    Absent,
}

impl LocalizedText {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::String(s)) => Self::Flat(s.clone()),
            Some(Value::Object(map)) => Self::Localized {
                en: map.get("en").and_then(Value::as_str).map(str::to_string),
                fr: map.get("fr").and_then(Value::as_str).map(str::to_string),
            },
            Some(other) => Self::Flat(other.to_string()),
        }
    }

    /// English with French fallback.
    pub fn pick_en(&self) -> Option<String> {
        match self {
            Self::Flat(s) => Some(s.clone()),
            Self::Localized { en, fr } => en.clone().or_else(|| fr.clone()),
            Self::Absent => None,
        }
    }

    /// French with English fallback.
    pub fn pick_fr(&self) -> Option<String> {
        match self {
            Self::Flat(s) => Some(s.clone()),
            Self::Localized { en, fr } => fr.clone().or_else(|| en.clone()),
            Self::Absent => None,
        }
    }
}

/// Coerce a JSON value that's meant to be an integer but may arrive as a
/// string, float, or nested `"44-1"` style composite, returning `None`
/// rather than failing the whole record.
pub fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some((head, _)) = trimmed.split_once('-') {
                head.parse().ok()
            } else {
                trimmed.parse().ok()
            }
        }
        _ => None,
    }
}
