//! The statistics probe.
//!
//! Nested objects are expanded into underscore-joined sibling paths so the
//! analyzer can observe scalar leaves at any depth. This is strictly a
//! read-only view: the stored record keeps its nested values, and only the
//! probe output feeds field statistics.

use indexmap::IndexMap;

use super::{Record, Value};

/// Expand a record into its canonical field paths for analysis.
///
/// - A nested object contributes itself (so nesting is observed) plus its
///   children under `parent_child` paths.
/// - An array contributes itself; an array of objects additionally
///   contributes its first element's paths, as a representative sample.
/// - A key colliding with an expanded path is observed once per record.
pub fn flatten_for_stats(record: &Record) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    flatten_into("", record, &mut out);
    out
}

fn flatten_into(prefix: &str, map: &IndexMap<String, Value>, out: &mut IndexMap<String, Value>) {
    for (key, value) in map {
        let path = join(prefix, key);
        match value {
            Value::Object(inner) => {
                out.insert(path.clone(), value.clone());
                flatten_into(&path, inner, out);
            }
            Value::Array(items) => {
                out.insert(path.clone(), value.clone());
                if let Some(Value::Object(first)) = items.first() {
                    flatten_into(&path, first, out);
                }
            }
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}_{key}")
    }
}
