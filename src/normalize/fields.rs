//! Tolerant field accessors over decoded responses
//!
//! XML-derived values carry every scalar as a string, JSON values carry
//! numbers and booleans natively, and list containers may be absent, a
//! single object, or an array. These helpers absorb all of that so the
//! connectors read fields the same way regardless of wire format.

use super::xml::TEXT_KEY;
use crate::{DeskportError, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// String value of a scalar field; empty strings count as absent
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map
            .get(TEXT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Like `str_field`, but a missing field is a malformed response
pub fn require_str(value: &Value, key: &str, what: &str) -> Result<String> {
    str_field(value, key)
        .ok_or_else(|| DeskportError::MalformedResponse(format!("{} without '{}'", what, key)))
}

pub fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Truthy flags: `true`, `1`, `"1"`, `"true"`, `"yes"`
pub fn bool_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) != 0,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

/// Items of a list found at `path`, whatever shape the container has
pub fn array_at<'a>(value: &'a Value, path: &[&str]) -> Vec<&'a Value> {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return Vec::new(),
        }
    }
    match current {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![current],
        _ => Vec::new(),
    }
}

pub fn unix_to_rfc3339(secs: i64) -> Option<String> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// RFC 3339 UTC from unix seconds or any RFC 3339 string; other text is
/// kept as-is rather than dropped
pub fn rfc3339(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        if let Some(ts) = unix_to_rfc3339(secs) {
            return ts;
        }
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        Err(_) => raw.to_string(),
    }
}

/// Timestamp field as RFC 3339 UTC
pub fn timestamp_field(value: &Value, key: &str) -> Option<String> {
    str_field(value, key).map(|raw| rfc3339(&raw))
}

/// Crude HTML-to-text for platforms that only return an HTML body
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .trim()
        .to_string()
}
