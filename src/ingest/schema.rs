//! Source payload shapes and the field alias table
//!
//! Source files name the same field in several ways. Every accepted name is
//! listed here once and resolved into typed records at the ingestion boundary.

use super::IngestError;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

pub const CODE_ALIASES: &[&str] = &["code", "hts_code", "heading", "htsno"];
pub const TEXT_ALIASES: &[&str] = &["text", "body", "content", "description"];
pub const TITLE_ALIASES: &[&str] = &["title", "name", "label"];
pub const DUTY_ALIASES: &[&str] = &["duty_rate", "general", "rate"];
pub const RULING_ID_ALIASES: &[&str] = &["ruling_id", "id", "external_id"];
pub const URL_ALIASES: &[&str] = &["url", "link"];
pub const EDITION_ALIASES: &[&str] = &["edition", "revision", "year"];
pub const NOTES_ALIASES: &[&str] = &["notes", "footnotes"];

fn mentioned_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}\.\d{2}(?:\.\d{2})?\b").expect("valid code regex"))
}

/// HTS codes mentioned in free text, first mention first, without duplicates
pub fn extract_codes(text: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for m in mentioned_code_re().find_iter(text) {
        if !codes.iter().any(|c| c == m.as_str()) {
            codes.push(m.as_str().to_string());
        }
    }
    codes
}

/// First non-blank value among `aliases`; numbers are accepted as text
pub fn resolve_field(item: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|key| match item.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts `{items: [...]}`, a bare list, or a single item object
pub fn extract_items(value: Value) -> Result<Vec<Map<String, Value>>, IngestError> {
    let items = match value {
        Value::Object(mut obj) => match obj.remove("items") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(IngestError::UnsupportedShape(
                    "'items' must be a list".to_string(),
                ))
            }
            None => vec![Value::Object(obj)],
        },
        Value::Array(items) => items,
        other => {
            return Err(IngestError::UnsupportedShape(format!(
                "expected an object or a list, found {}",
                json_kind(&other)
            )))
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(obj) => Some(obj),
            other => {
                tracing::warn!("Skipping non-object item ({})", json_kind(&other));
                None
            }
        })
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// A tariff schedule entry
#[derive(Debug, Clone, PartialEq)]
pub struct HtsItem {
    pub code: String,
    pub title: Option<String>,
    pub text: String,
    pub duty_rate: Option<String>,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub edition: Option<String>,
}

impl HtsItem {
    pub fn from_fields(item: &Map<String, Value>) -> Result<Self, IngestError> {
        let code = resolve_field(item, CODE_ALIASES).ok_or(IngestError::MissingField {
            field: "code",
        })?;
        let title = resolve_field(item, TITLE_ALIASES);
        let text = resolve_field(item, TEXT_ALIASES)
            .or_else(|| title.clone())
            .ok_or(IngestError::MissingField { field: "text" })?;

        Ok(Self {
            code,
            title,
            text,
            duty_rate: resolve_field(item, DUTY_ALIASES),
            notes: resolve_field(item, NOTES_ALIASES),
            url: resolve_field(item, URL_ALIASES),
            edition: resolve_field(item, EDITION_ALIASES),
        })
    }

    /// Chapter number: the first two digits of the code
    pub fn chapter(&self) -> Option<u32> {
        self.code.get(..2)?.parse().ok()
    }
}

/// A CBP ruling
#[derive(Debug, Clone, PartialEq)]
pub struct RulingItem {
    pub ruling_id: String,
    pub title: Option<String>,
    pub text: String,
    pub url: Option<String>,
    /// Code named explicitly by the source, if any
    pub code: Option<String>,
}

impl RulingItem {
    pub fn from_fields(item: &Map<String, Value>) -> Result<Self, IngestError> {
        let ruling_id = resolve_field(item, RULING_ID_ALIASES).ok_or(IngestError::MissingField {
            field: "ruling_id",
        })?;
        let text = resolve_field(item, TEXT_ALIASES).ok_or(IngestError::MissingField {
            field: "text",
        })?;

        Ok(Self {
            ruling_id,
            title: resolve_field(item, TITLE_ALIASES),
            text,
            url: resolve_field(item, URL_ALIASES),
            code: resolve_field(item, CODE_ALIASES),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_shapes() {
        assert_eq!(extract_items(json!({"items": [{"code": "8504.40"}]})).unwrap().len(), 1);
        assert_eq!(extract_items(json!([{"code": "1"}, {"code": "2"}, 3])).unwrap().len(), 2);
        assert_eq!(extract_items(json!({"code": "8504.40"})).unwrap().len(), 1);
        assert!(extract_items(json!("text")).is_err());
        assert!(extract_items(json!({"items": "nope"})).is_err());
    }

    #[test]
    fn test_aliases() {
        let item = obj(json!({
            "htsno": "8504.40",
            "description": "Static converters",
            "general": "Free",
        }));
        let hts = HtsItem::from_fields(&item).unwrap();
        assert_eq!(hts.code, "8504.40");
        assert_eq!(hts.text, "Static converters");
        assert_eq!(hts.duty_rate.as_deref(), Some("Free"));
        assert_eq!(hts.chapter(), Some(85));
    }

    #[test]
    fn test_alias_priority_and_blank_values() {
        let item = obj(json!({"code": "  ", "hts_code": "8544.42", "title": "Cables"}));
        let hts = HtsItem::from_fields(&item).unwrap();
        assert_eq!(hts.code, "8544.42");
        // text falls back to the title
        assert_eq!(hts.text, "Cables");
    }

    #[test]
    fn test_missing_fields() {
        assert!(HtsItem::from_fields(&obj(json!({"text": "x"}))).is_err());
        assert!(RulingItem::from_fields(&obj(json!({"id": "N1"}))).is_err());
        let ruling = RulingItem::from_fields(&obj(json!({"id": 301619, "body": "text"}))).unwrap();
        assert_eq!(ruling.ruling_id, "301619");
    }

    #[test]
    fn test_extract_codes() {
        let text = "classified in 8504.40.95 and not 8504.40; see also 8504.40.95 and 85044095";
        assert_eq!(extract_codes(text), vec!["8504.40.95", "8504.40"]);
    }
}
