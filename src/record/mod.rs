//! The record value model.
//!
//! Incoming data is JSON-shaped, but the pipeline needs to distinguish more
//! than JSON does: an IP address is not a plain string, an integer is not a
//! float, a timestamp is not free text. `Value` is the single discriminated
//! union that carries both the payload and its detected type; the tag *is*
//! the detection result.

mod coerce;
mod flatten;
mod keys;
mod normalize;

pub use coerce::{coerce_record, coerce_str, coerce_value};
pub use flatten::flatten_for_stats;
pub use keys::canonical_key;
pub use normalize::{normalize, normalize_batch};

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use indexmap::IndexMap;
use serde::de::{Error as DeError, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Linking field duplicated to both backends for cross-backend joins.
pub const USERNAME_FIELD: &str = "username";
/// Server-assigned ingestion timestamp, injected during normalization.
pub const INGESTED_AT_FIELD: &str = "sys_ingested_at";
/// Client-supplied timestamp, present only when upstream sends it.
pub const CLIENT_TS_FIELD: &str = "t_stamp";

/// A normalized record: an insertion-ordered map from canonical field names
/// to values. Nested values are preserved as-is; flattening for statistics
/// is a probe, never a mutation of the stored record.
pub type Record = IndexMap<String, Value>;

/// A single record value with its detected semantic type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ip(IpAddr),
    Uuid(Uuid),
    DateTime(DateTime<FixedOffset>),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    /// The detected type tag for this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Null => FieldType::Null,
            Value::Bool(_) => FieldType::Bool,
            Value::Int(_) => FieldType::Int,
            Value::Float(_) => FieldType::Float,
            Value::Str(_) => FieldType::Str,
            Value::Ip(_) => FieldType::Ip,
            Value::Uuid(_) => FieldType::Uuid,
            Value::DateTime(_) => FieldType::DateTime,
            Value::Array(_) => FieldType::Array,
            Value::Object(_) => FieldType::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for array and object values.
    pub fn is_nested(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Convert a `serde_json::Value` into the pipeline value space.
    ///
    /// No coercion happens here; strings stay strings until the
    /// normalizer's coercion pass runs.
    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::MAX))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Canonical string form, used for bounded unique-value tracking.
    ///
    /// Distinct values always produce distinct strings (`1`, `1.0`, `"1"`
    /// and `true` all differ), so set membership on the string is set
    /// membership on the value.
    pub fn canonical_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Render a datetime the way the pipeline stores it everywhere: RFC 3339,
/// `Z` suffix for UTC, sub-second digits only when present.
pub fn format_datetime(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Ip(ip) => serializer.collect_str(ip),
            Value::Uuid(u) => serializer.collect_str(u),
            Value::DateTime(dt) => serializer.serialize_str(&format_datetime(dt)),
            Value::Array(items) => serializer.collect_seq(items),
            Value::Object(map) => {
                let mut state = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    state.serialize_entry(k, v)?;
                }
                state.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: DeError>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: DeError>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E: DeError>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: DeError>(self, i: i64) -> Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: DeError>(self, u: u64) -> Result<Value, E> {
        Ok(i64::try_from(u).map_or(Value::Float(u as f64), Value::Int))
    }

    fn visit_f64<E: DeError>(self, f: f64) -> Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E: DeError>(self, s: &str) -> Result<Value, E> {
        Ok(Value::Str(s.to_owned()))
    }

    fn visit_string<E: DeError>(self, s: String) -> Result<Value, E> {
        Ok(Value::Str(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut out = IndexMap::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            out.insert(key, value);
        }
        Ok(Value::Object(out))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// The closed set of detected types.
///
/// `Int` and `Float` are disjoint (integers prefer `Int`); `Ip` covers v4
/// and v6; `Uuid` matches only the canonical hyphenated form; `DateTime`
/// matches ISO 8601 with optional timezone; `Null` additionally covers the
/// literals `""`, `"null"` and `"none"` (case-insensitive).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Ip,
    Uuid,
    DateTime,
    Array,
    Object,
}

impl FieldType {
    /// Scalar types can live in a relational column.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldType::Array | FieldType::Object)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Null => "null",
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "str",
            FieldType::Ip => "ip",
            FieldType::Uuid => "uuid",
            FieldType::DateTime => "datetime",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
