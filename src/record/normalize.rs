//! Record normalization: canonical keys, leaf coercion, timestamp injection.
//!
//! Normalization is deterministic given the same wall clock and never fails
//! a record. It is also idempotent: normalizing a normalized record changes
//! nothing, which is what makes WAL replay safe.

use chrono::{Timelike, Utc};
use indexmap::IndexMap;

use super::{INGESTED_AT_FIELD, Record, Value, canonical_key, coerce::coerce_value};

/// Normalize one raw record.
pub fn normalize(record: Record) -> Record {
    let mut out = normalize_keys(record);
    out = out.into_iter().map(|(k, v)| (k, coerce_value(v))).collect();
    inject_ingested_at(&mut out);
    out
}

/// Normalize a batch in ingestion order.
pub fn normalize_batch(records: Vec<Record>) -> Vec<Record> {
    records.into_iter().map(normalize).collect()
}

/// Rewrite keys to canonical snake_case at every nesting level. When two raw
/// keys collapse onto the same canonical name, the later value wins.
fn normalize_keys(record: Record) -> Record {
    record
        .into_iter()
        .map(|(k, v)| (canonical_key(&k), normalize_nested_keys(v)))
        .collect()
}

fn normalize_nested_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (canonical_key(&k), normalize_nested_keys(v)))
                .collect::<IndexMap<_, _>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(normalize_nested_keys).collect())
        }
        other => other,
    }
}

/// Set `sys_ingested_at` to the current UTC time at millisecond precision,
/// unless upstream (or a WAL replay) already supplied it.
fn inject_ingested_at(record: &mut Record) {
    if record.contains_key(INGESTED_AT_FIELD) {
        return;
    }
    let now = Utc::now();
    let truncated = now
        .with_nanosecond(now.timestamp_subsec_millis() * 1_000_000)
        .unwrap_or(now);
    record.insert(
        INGESTED_AT_FIELD.to_owned(),
        Value::DateTime(truncated.fixed_offset()),
    );
}
