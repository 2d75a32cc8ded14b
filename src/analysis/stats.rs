//! Per-field observation statistics.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::record::{FieldType, Value};

/// Cap on the tracked unique-value set. Part of the contract: once hit,
/// further inserts are silently dropped and `unique_ratio` saturates at
/// `cap / presence_count`.
pub const MAX_UNIQUE_TRACKED: usize = 1000;

/// Cap on retained example values (first-seen).
pub const MAX_SAMPLE_VALUES: usize = 10;

/// Cumulative evidence about one canonical field, across every record the
/// pipeline has ever observed. Entries are created on first sight and never
/// deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    /// Records in which the field appeared with a non-null value.
    #[serde(default)]
    pub presence_count: u64,
    /// Records in which the field was present but null.
    #[serde(default)]
    pub null_count: u64,
    #[serde(default)]
    pub type_counts: BTreeMap<FieldType, u64>,
    /// Canonical string forms of observed values, capped.
    #[serde(default)]
    pub unique_values: BTreeSet<String>,
    /// True once the value has ever been an array or object.
    #[serde(default)]
    pub is_nested: bool,
    #[serde(default)]
    pub sample_values: Vec<Value>,
}

impl FieldStats {
    /// Fold one observed value into the stats.
    pub fn observe(&mut self, value: &Value) {
        let detected = value.field_type();
        *self.type_counts.entry(detected).or_insert(0) += 1;

        if value.is_null() {
            self.null_count += 1;
            return;
        }

        self.presence_count += 1;
        if value.is_nested() {
            self.is_nested = true;
        }
        if self.unique_values.len() < MAX_UNIQUE_TRACKED {
            self.unique_values.insert(value.canonical_string());
        }
        if self.sample_values.len() < MAX_SAMPLE_VALUES {
            self.sample_values.push(value.clone());
        }
    }

    /// The most frequently observed type; ties resolve to the smallest
    /// `FieldType` so the result is deterministic.
    pub fn dominant_type(&self) -> Option<FieldType> {
        let mut best: Option<(FieldType, u64)> = None;
        for (&t, &count) in &self.type_counts {
            match best {
                Some((_, c)) if c >= count => {}
                _ => best = Some((t, count)),
            }
        }
        best.map(|(t, _)| t)
    }

    /// Fraction of observations matching the dominant type.
    pub fn type_stability(&self) -> f64 {
        let total: u64 = self.type_counts.values().sum();
        if total == 0 {
            return 0.0;
        }
        let dominant = self
            .dominant_type()
            .and_then(|t| self.type_counts.get(&t))
            .copied()
            .unwrap_or(0);
        dominant as f64 / total as f64
    }

    /// `|unique_values| / presence_count`, saturating at the cap.
    pub fn unique_ratio(&self) -> f64 {
        if self.presence_count == 0 {
            return 0.0;
        }
        self.unique_values.len() as f64 / self.presence_count as f64
    }

    pub fn presence_ratio(&self, total_records: u64) -> f64 {
        if total_records == 0 {
            return 0.0;
        }
        self.presence_count as f64 / total_records as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_counts_presence_and_nulls() {
        let mut stats = FieldStats::default();
        stats.observe(&Value::Int(1));
        stats.observe(&Value::Int(2));
        stats.observe(&Value::Null);

        assert_eq!(stats.presence_count, 2);
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.type_counts[&FieldType::Int], 2);
        assert_eq!(stats.type_counts[&FieldType::Null], 1);
    }

    #[test]
    fn test_dominant_type_and_stability() {
        let mut stats = FieldStats::default();
        for i in 0..9 {
            stats.observe(&Value::Int(i));
        }
        stats.observe(&Value::Str("ten".to_owned()));

        assert_eq!(stats.dominant_type(), Some(FieldType::Int));
        assert!((stats.type_stability() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_unique_set_caps_at_limit() {
        let mut stats = FieldStats::default();
        for i in 0..(MAX_UNIQUE_TRACKED as i64 + 500) {
            stats.observe(&Value::Int(i));
        }
        assert_eq!(stats.unique_values.len(), MAX_UNIQUE_TRACKED);
        assert_eq!(stats.presence_count, MAX_UNIQUE_TRACKED as u64 + 500);
        // Ratio saturates at cap / presence.
        let expected = MAX_UNIQUE_TRACKED as f64 / stats.presence_count as f64;
        assert!((stats.unique_ratio() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_samples_keep_first_seen() {
        let mut stats = FieldStats::default();
        for i in 0..25 {
            stats.observe(&Value::Int(i));
        }
        assert_eq!(stats.sample_values.len(), MAX_SAMPLE_VALUES);
        assert_eq!(stats.sample_values[0], Value::Int(0));
    }

    #[test]
    fn test_nested_flag_sticks() {
        let mut stats = FieldStats::default();
        stats.observe(&Value::Array(vec![Value::Int(1)]));
        stats.observe(&Value::Int(1));
        assert!(stats.is_nested);
    }

    #[test]
    fn test_serializes_sets_as_arrays() {
        let mut stats = FieldStats::default();
        stats.observe(&Value::Int(1));
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["unique_values"].is_array());
        assert!(json["type_counts"].is_object());

        let back: FieldStats = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_ratios_bounded() {
        let mut stats = FieldStats::default();
        assert_eq!(stats.type_stability(), 0.0);
        assert_eq!(stats.unique_ratio(), 0.0);
        for i in 0..10 {
            stats.observe(&Value::Int(i % 3));
        }
        assert!(stats.type_stability() > 0.0 && stats.type_stability() <= 1.0);
        assert!(stats.unique_ratio() > 0.0 && stats.unique_ratio() <= 1.0);
        assert!(stats.presence_ratio(10) <= 1.0);
    }
}
