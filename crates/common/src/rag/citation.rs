//! Citation rendering and publication-year normalization

use crate::db::PaperResult;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Normalize a stored publication date.
///
/// Timestamps (RFC 3339 strings, `YYYY-MM-DD[ HH:MM:SS]` strings, and extended-JSON
/// `{"$date": ...}` objects) collapse to their year. Anything else is passed through
/// unchanged.
pub fn normalize_year(value: &Value) -> Value {
    match timestamp_year(value) {
        Some(year) => Value::from(year),
        None => value.clone(),
    }
}

fn timestamp_year(value: &Value) -> Option<i32> {
    match value {
        Value::String(s) => parse_timestamp_year(s),
        Value::Object(map) => match map.get("$date")? {
            Value::String(s) => parse_timestamp_year(s),
            Value::Number(ms) => millis_year(ms.as_i64()?),
            Value::Object(inner) => {
                let ms = inner.get("$numberLong")?.as_str()?.parse().ok()?;
                millis_year(ms)
            }
            _ => None,
        },
        _ => None,
    }
}

fn parse_timestamp_year(s: &str) -> Option<i32> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.year());
    }

    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.year());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(|d| d.year())
}

fn millis_year(ms: i64) -> Option<i32> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.year())
}

/// Render a value for a citation slot; absent and null render empty.
fn slot(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Render a result as `[<id> - <year>] <title> (DOI: <doi>) <url>`, trimmed.
pub fn format_citation(record: &PaperResult) -> String {
    let year = record.publication_date.as_ref().map(normalize_year);

    format!(
        "[{} - {}] {} (DOI: {}) {}",
        record.id,
        slot(year.as_ref()),
        record.title.as_deref().unwrap_or_default(),
        record.doi.as_deref().unwrap_or_default(),
        record.url.as_deref().unwrap_or_default(),
    )
    .trim()
    .to_string()
}
