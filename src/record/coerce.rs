//! Leaf-string coercion.
//!
//! JSON strings often carry richer types: timestamps, UUIDs, IP addresses,
//! booleans, numbers. Coercion tries the candidates in a fixed order and
//! rewrites the value on the first match; a string matching nothing stays a
//! string, so coercion never fails a record. Running coercion twice is a
//! no-op, which lets WAL replay re-apply it safely.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use uuid::Uuid;

use super::{Record, Value};

/// Coerce every leaf string in a record, recursing through nested values.
pub fn coerce_record(record: Record) -> Record {
    record
        .into_iter()
        .map(|(k, v)| (k, coerce_value(v)))
        .collect()
}

/// Coerce a single value. Non-string leaves pass through untouched.
pub fn coerce_value(value: Value) -> Value {
    match value {
        Value::Str(s) => coerce_str(&s),
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_value).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, coerce_value(v))).collect())
        }
        other => other,
    }
}

/// Detect the semantic type of a string value.
///
/// Order matters and is part of the contract: null-literal, datetime, uuid,
/// ip, bool, int, float. In particular `"1"` and `"0"` coerce to booleans,
/// not integers.
pub fn coerce_str(s: &str) -> Value {
    if is_null_literal(s) {
        return Value::Null;
    }
    if let Some(dt) = parse_datetime(s) {
        return Value::DateTime(dt);
    }
    if let Some(u) = parse_uuid(s) {
        return Value::Uuid(u);
    }
    if let Ok(ip) = s.parse() {
        return Value::Ip(ip);
    }
    if let Some(b) = parse_bool(s) {
        return Value::Bool(b);
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }
    Value::Str(s.to_owned())
}

/// `""`, `"null"` and `"none"` (case-insensitive) are null by contract.
fn is_null_literal(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("none")
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// ISO 8601 with optional timezone. Every parsed timestamp is normalized
/// to UTC so the same instant compares equal across both backends; naive
/// timestamps are taken as UTC. The space-separated form covers values
/// read back from relational DATETIME columns.
fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    if s.len() < 19 {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).fixed_offset());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    None
}

/// Only the canonical hyphenated 8-4-4-4-12 form counts as a UUID.
fn parse_uuid(s: &str) -> Option<Uuid> {
    let b = s.as_bytes();
    if b.len() != 36 || b[8] != b'-' || b[13] != b'-' || b[18] != b'-' || b[23] != b'-' {
        return None;
    }
    Uuid::try_parse(s).ok()
}
