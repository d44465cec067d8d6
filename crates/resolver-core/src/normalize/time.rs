use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Epoch values at or above this are milliseconds, below are seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

/// Kickoff fields, highest priority first.
pub const DATE_FIELDS: &[&str] = &["date", "time", "start_time", "startTime", "starts_at", "kickoff"];

/// Convert one JSON value into epoch milliseconds.
pub fn parse_epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_number),
        Value::String(s) => parse_str(s.trim()),
        _ => None,
    }
}

/// First parseable kickoff among [`DATE_FIELDS`].
pub fn extract_kickoff(item: &Value) -> Option<i64> {
    DATE_FIELDS
        .iter()
        .filter_map(|field| item.get(*field))
        .find_map(parse_epoch_millis)
}

fn from_number(n: f64) -> Option<i64> {
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    let ms = if n >= MILLIS_THRESHOLD { n } else { n * 1000.0 };
    Some(ms.round() as i64)
}

fn parse_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<f64>() {
        return from_number(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}
