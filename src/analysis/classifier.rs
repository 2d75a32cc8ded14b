//! Heuristic field classification.
//!
//! Takes the accumulated `FieldStats` and produces a `PlacementDecision`
//! per field, plus a primary-key election among the relational candidates.
//! Stateless: stats in, decisions out.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::record::{CLIENT_TS_FIELD, FieldType, INGESTED_AT_FIELD, USERNAME_FIELD};

use super::decision::{Backend, PlacementDecision, SqlType, is_timestamp_field};
use super::stats::FieldStats;

/// Fields required in both backends for cross-backend joins.
pub const LINKING_FIELDS: [&str; 3] = [USERNAME_FIELD, INGESTED_AT_FIELD, CLIENT_TS_FIELD];

/// Name fragments that mark a field as an identifier for key scoring.
const IDENTIFIER_HINTS: [&str; 3] = ["id", "username", "key"];

/// Tunable classification thresholds. The defaults are part of the
/// documented contract.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Minimum presence ratio for a field to qualify for the relational side.
    pub min_presence: f64,
    /// Minimum type stability for a field to qualify for the relational side.
    pub min_type_stability: f64,
    /// Minimum unique ratio for a primary-key candidate.
    pub pk_min_unique: f64,
    /// Below this many observed records the presence floor is waived:
    /// early small batches would otherwise send every new stable field to
    /// the document side and force a migration once volume arrives.
    pub min_records: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_presence: 0.70,
            min_type_stability: 0.90,
            pk_min_unique: 0.70,
            min_records: 50,
        }
    }
}

/// Counts of decisions per backend, for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendDistribution {
    pub sql: usize,
    pub doc: usize,
    pub both: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    thresholds: Thresholds,
}

impl Classifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Classify every observed field and elect a primary key.
    ///
    /// `pinned_pk` is the key already established in a previous cycle, if
    /// any. An established key is never silently replaced: a fresh election
    /// that disagrees is logged and ignored, and the pinned field keeps its
    /// relational placement.
    pub fn classify_all(
        &self,
        stats: &IndexMap<String, FieldStats>,
        total_records: u64,
        pinned_pk: Option<&str>,
    ) -> IndexMap<String, PlacementDecision> {
        let mut decisions: IndexMap<String, PlacementDecision> = stats
            .iter()
            .map(|(name, field_stats)| {
                (
                    name.clone(),
                    self.classify_field(name, field_stats, total_records),
                )
            })
            .collect();

        self.assign_primary_key(&mut decisions, stats, total_records, pinned_pk);
        decisions
    }

    /// Classify a single field. Rules apply in order; first match wins.
    pub fn classify_field(
        &self,
        name: &str,
        stats: &FieldStats,
        total_records: u64,
    ) -> PlacementDecision {
        let dominant = stats.dominant_type().unwrap_or(FieldType::Null);
        let presence_ratio = stats.presence_ratio(total_records);
        let type_stability = stats.type_stability();
        let is_nullable = stats.null_count > 0 || presence_ratio < 1.0;
        let is_unique = stats.unique_ratio() >= 0.90 && !is_nullable;

        // Rule 1: linking fields live in both backends.
        if LINKING_FIELDS.contains(&name) {
            return PlacementDecision {
                backend: Backend::Both,
                canonical_type: dominant,
                sql_type: Some(SqlType::for_field_type(dominant)),
                is_nullable,
                is_unique,
                is_primary_key: false,
                reason: format!("linking field '{name}' required in both backends"),
            };
        }

        // Rule 2: nested values belong to the document side.
        if stats.is_nested {
            return PlacementDecision {
                backend: Backend::Doc,
                canonical_type: dominant,
                sql_type: None,
                is_nullable,
                is_unique: false,
                is_primary_key: false,
                reason: format!("nested {dominant} value; no relational representation"),
            };
        }

        // Rule 3: stable, well-present scalars earn a relational column.
        // The presence floor only binds once enough records have been seen
        // to make the ratio meaningful.
        let presence_ok = presence_ratio >= self.thresholds.min_presence
            || total_records < self.thresholds.min_records;
        if dominant.is_scalar()
            && dominant != FieldType::Null
            && presence_ok
            && type_stability >= self.thresholds.min_type_stability
        {
            return PlacementDecision {
                backend: Backend::Sql,
                canonical_type: dominant,
                sql_type: Some(SqlType::for_field_type(dominant)),
                is_nullable,
                is_unique,
                is_primary_key: false,
                reason: format!(
                    "stable scalar: present in {:.1}% of records, type-stable at {:.1}%",
                    presence_ratio * 100.0,
                    type_stability * 100.0
                ),
            };
        }

        // Rule 4: everything sparse or drifting stays schemaless.
        PlacementDecision {
            backend: Backend::Doc,
            canonical_type: dominant,
            sql_type: None,
            is_nullable,
            is_unique: false,
            is_primary_key: false,
            reason: format!(
                "sparse or unstable: present in {:.1}% of records, type-stable at {:.1}%",
                presence_ratio * 100.0,
                type_stability * 100.0
            ),
        }
    }

    fn assign_primary_key(
        &self,
        decisions: &mut IndexMap<String, PlacementDecision>,
        stats: &IndexMap<String, FieldStats>,
        total_records: u64,
        pinned_pk: Option<&str>,
    ) {
        let elected = self.elect_primary_key(decisions, stats, total_records);

        if let Some(pinned) = pinned_pk {
            if let Some(choice) = &elected {
                if choice != pinned {
                    warn!(
                        pinned = %pinned,
                        elected = %choice,
                        "primary-key election disagrees with established key; keeping established key"
                    );
                }
            }
            let Some(decision) = decisions.get_mut(pinned) else {
                warn!(pinned = %pinned, "established primary key has no stats this cycle");
                return;
            };
            if !decision.backend.includes_sql() {
                decision.backend = Backend::Sql;
                decision.sql_type = decision
                    .sql_type
                    .or(Some(SqlType::for_field_type(decision.canonical_type)));
                decision.reason = format!(
                    "pinned primary key; held on the relational side ({})",
                    decision.reason
                );
            }
            decision.is_primary_key = true;
            decision.is_unique = true;
            decision.is_nullable = false;
            return;
        }

        if let Some(choice) = elected {
            if let Some(decision) = decisions.get_mut(&choice) {
                decision.is_primary_key = true;
                decision.is_unique = true;
                decision.is_nullable = false;
                info!(field = %choice, "primary key elected");
            }
        }
    }

    /// Score primary-key candidates and return the winner, if any.
    ///
    /// Candidates must be relational, 100% present, sufficiently unique,
    /// scalar, and not timestamp-named. Ties break lexicographically so
    /// the choice is deterministic.
    fn elect_primary_key(
        &self,
        decisions: &IndexMap<String, PlacementDecision>,
        stats: &IndexMap<String, FieldStats>,
        total_records: u64,
    ) -> Option<String> {
        let mut best: Option<(f64, &str)> = None;

        for (name, decision) in decisions {
            if !decision.backend.includes_sql() {
                continue;
            }
            if !decision.canonical_type.is_scalar() {
                continue;
            }
            if is_timestamp_field(name) {
                continue;
            }
            let Some(field_stats) = stats.get(name) else {
                continue;
            };
            if total_records == 0 || field_stats.presence_count != total_records {
                continue;
            }
            let unique_ratio = field_stats.unique_ratio();
            if unique_ratio < self.thresholds.pk_min_unique {
                continue;
            }

            let hint = IDENTIFIER_HINTS.iter().any(|h| name.contains(h));
            let score = if hint { 0.2 } else { 0.0 } + 0.8 * unique_ratio;

            best = match best {
                None => Some((score, name.as_str())),
                Some((best_score, best_name)) => {
                    if score > best_score
                        || (score == best_score && name.as_str() < best_name)
                    {
                        Some((score, name.as_str()))
                    } else {
                        Some((best_score, best_name))
                    }
                }
            };
        }

        best.map(|(_, name)| name.to_owned())
    }

    /// How many fields landed on each backend.
    pub fn backend_distribution(
        decisions: &IndexMap<String, PlacementDecision>,
    ) -> BackendDistribution {
        let mut dist = BackendDistribution::default();
        for decision in decisions.values() {
            match decision.backend {
                Backend::Sql => dist.sql += 1,
                Backend::Doc => dist.doc += 1,
                Backend::Both => dist.both += 1,
            }
        }
        dist
    }
}
