//! Placement decisions and relational column types.
//!
//! A `PlacementDecision` is the output of classification: where a field
//! lives, what its relational column looks like, and why. `SqlType` is kept
//! as a closed enum rather than a bare string so the widening order can be
//! checked instead of pattern-matched out of DDL text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::FieldType;

/// Which backend a field is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Backend {
    Sql,
    Doc,
    Both,
}

impl Backend {
    pub fn includes_sql(&self) -> bool {
        matches!(self, Backend::Sql | Backend::Both)
    }

    pub fn includes_doc(&self) -> bool {
        matches!(self, Backend::Doc | Backend::Both)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Backend::Sql => "SQL",
            Backend::Doc => "DOC",
            Backend::Both => "BOTH",
        })
    }
}

/// A relational column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    BigInt,
    Double,
    DateTime,
    Char(u16),
    VarChar(u16),
    Text,
}

impl SqlType {
    /// The column type inferred for a detected field type.
    pub fn for_field_type(t: FieldType) -> SqlType {
        match t {
            FieldType::Int => SqlType::BigInt,
            FieldType::Float => SqlType::Double,
            FieldType::Bool => SqlType::Boolean,
            FieldType::Str => SqlType::VarChar(255),
            // IPv6 needs up to 45 characters.
            FieldType::Ip => SqlType::VarChar(45),
            // Hyphenated 8-4-4-4-12 form.
            FieldType::Uuid => SqlType::Char(36),
            FieldType::DateTime => SqlType::DateTime,
            _ => SqlType::Text,
        }
    }

    /// Whether altering a column from `self` to `to` is a legal widening.
    ///
    /// The scalar order is `BOOLEAN < BIGINT < DOUBLE < TEXT`; string
    /// lengths widen `VARCHAR(n) < VARCHAR(m > n) < TEXT` with `CHAR`
    /// folding into `VARCHAR`. Non-string scalars may also widen into a
    /// string column wide enough to carry their text form. Everything else
    /// is refused; narrowing is never attempted.
    pub fn widens_to(&self, to: &SqlType) -> bool {
        use SqlType::*;
        match (*self, *to) {
            (a, b) if a == b => false,
            (Boolean, BigInt | Double | Text) => true,
            (BigInt, Double | Text) => true,
            (Double, Text) => true,
            (DateTime, Text) => true,
            (Boolean | BigInt | Double | DateTime, VarChar(n)) => n >= 64,
            (Char(a), VarChar(b)) => b >= a,
            (Char(_), Text) => true,
            (VarChar(a), VarChar(b)) => b > a,
            (VarChar(_), Text) => true,
            _ => false,
        }
    }

    /// Parse a type as reported by `INFORMATION_SCHEMA` (`bigint`,
    /// `varchar(255)`, `tinyint(1)`, `datetime(6)`, ...). Returns `None`
    /// for types the pipeline never emits; such columns are left alone.
    pub fn parse_column_type(s: &str) -> Option<SqlType> {
        let s = s.trim().to_ascii_lowercase();
        if s == "boolean" || s == "bool" || s.starts_with("tinyint(1)") || s == "tinyint" {
            Some(SqlType::Boolean)
        } else if s.starts_with("bigint") {
            Some(SqlType::BigInt)
        } else if s.starts_with("double") {
            Some(SqlType::Double)
        } else if s.starts_with("datetime") {
            Some(SqlType::DateTime)
        } else if s == "text" {
            Some(SqlType::Text)
        } else if let Some(n) = parse_len(&s, "char(") {
            Some(SqlType::Char(n))
        } else if let Some(n) = parse_len(&s, "varchar(") {
            Some(SqlType::VarChar(n))
        } else {
            None
        }
    }

    /// The type expression used in DDL. Datetimes get microsecond
    /// precision so the millisecond part of `sys_ingested_at` survives and
    /// link matching against the document backend stays exact.
    pub fn ddl(&self) -> String {
        match self {
            SqlType::DateTime => "DATETIME(6)".to_owned(),
            other => other.to_string(),
        }
    }
}

fn parse_len(s: &str, prefix: &str) -> Option<u16> {
    s.strip_prefix(prefix)?
        .strip_suffix(')')?
        .parse()
        .ok()
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SqlType::Boolean => f.write_str("BOOLEAN"),
            SqlType::BigInt => f.write_str("BIGINT"),
            SqlType::Double => f.write_str("DOUBLE"),
            SqlType::DateTime => f.write_str("DATETIME"),
            SqlType::Char(n) => write!(f, "CHAR({n})"),
            SqlType::VarChar(n) => write!(f, "VARCHAR({n})"),
            SqlType::Text => f.write_str("TEXT"),
        }
    }
}

impl FromStr for SqlType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SqlType::parse_column_type(s).ok_or_else(|| format!("unknown SQL type: {s}"))
    }
}

impl Serialize for SqlType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SqlType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The decision for a single canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub backend: Backend,
    pub canonical_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<SqlType>,
    pub is_nullable: bool,
    pub is_unique: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    pub reason: String,
}

/// Timestamp-looking names are excluded from key selection: they identify
/// moments, not entities.
pub fn is_timestamp_field(name: &str) -> bool {
    name.contains("_at") || name.contains("time") || name.contains("date")
}
