//! The observation engine: folds batches of normalized records into
//! cumulative per-field statistics.

use indexmap::IndexMap;

use crate::record::{Record, flatten_for_stats};

use super::stats::FieldStats;

/// Stateful accumulator of `FieldStats` across all flushed batches.
///
/// Cloneable so a flush can snapshot it and roll back when a backend write
/// fails; a retried batch must not be counted twice.
#[derive(Debug, Clone, Default)]
pub struct FieldAnalyzer {
    stats: IndexMap<String, FieldStats>,
    total_records: u64,
}

impl FieldAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the analyzer from persisted metadata on startup.
    pub fn restore(stats: IndexMap<String, FieldStats>, total_records: u64) -> Self {
        Self {
            stats,
            total_records,
        }
    }

    /// Observe a batch. Each record contributes exactly one increment to
    /// the record total regardless of how many fields it carries, and each
    /// canonical field path at most one observation per record.
    pub fn analyze_batch(&mut self, records: &[Record]) {
        for record in records {
            for (path, value) in flatten_for_stats(record) {
                self.stats.entry(path).or_default().observe(&value);
            }
            self.total_records += 1;
        }
    }

    pub fn stats(&self) -> &IndexMap<String, FieldStats> {
        &self.stats
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn field_count(&self) -> usize {
        self.stats.len()
    }

    pub fn presence_ratio(&self, field: &str) -> f64 {
        self.stats
            .get(field)
            .map(|s| s.presence_ratio(self.total_records))
            .unwrap_or(0.0)
    }
}
