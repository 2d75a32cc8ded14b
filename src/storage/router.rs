//! Record routing.
//!
//! Splits each normalized record by the current decisions and dispatches
//! one batch per backend. No reordering: records reach the backends in
//! ingestion order, and each backend is called exactly once per flush.

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::analysis::{PlacementDecision, is_timestamp_field};
use crate::error::PipelineError;
use crate::record::Record;

use super::{DocumentStore, RelationalStore};

/// Counts from one routed batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteOutcome {
    pub records_routed: usize,
    pub sql_rows: u64,
    pub doc_rows: u64,
    /// Records omitted from the relational batch because their primary-key
    /// value was missing; they still reached the document side.
    pub skipped_missing_pk: usize,
}

/// The document-side upsert key: the primary key when it is duplicated to
/// the document side, otherwise the first unique non-timestamp field that
/// is, otherwise none (plain inserts, duplicates possible).
pub fn select_doc_key(
    decisions: &IndexMap<String, PlacementDecision>,
    primary_key: Option<&str>,
) -> Option<String> {
    if let Some(pk) = primary_key {
        if decisions
            .get(pk)
            .map(|d| d.backend.includes_doc())
            .unwrap_or(false)
        {
            return Some(pk.to_owned());
        }
    }

    let mut candidates: Vec<&String> = decisions
        .iter()
        .filter(|(name, d)| {
            d.backend.includes_doc() && d.is_unique && !is_timestamp_field(name)
        })
        .map(|(name, _)| name)
        .collect();
    candidates.sort();
    candidates.first().map(|name| (*name).to_owned())
}

/// Split a batch by decision and upsert both backends.
///
/// Unknown fields (no decision yet) go to the document side only; they
/// never reach SQL. A record whose primary-key value is absent cannot
/// upsert safely on the relational side and is routed to the document side
/// only.
pub async fn route_batch(
    rel: &mut dyn RelationalStore,
    doc: &mut dyn DocumentStore,
    table: &str,
    collection: &str,
    records: &[Record],
    decisions: &IndexMap<String, PlacementDecision>,
    primary_key: Option<&str>,
    doc_key: Option<&str>,
) -> Result<RouteOutcome, PipelineError> {
    let mut outcome = RouteOutcome {
        records_routed: records.len(),
        ..RouteOutcome::default()
    };

    let mut sql_batch: Vec<Record> = Vec::new();
    let mut doc_batch: Vec<Record> = Vec::new();

    for record in records {
        let mut sql_part = Record::new();
        let mut doc_part = Record::new();

        for (key, value) in record {
            match decisions.get(key) {
                Some(decision) => {
                    if decision.backend.includes_sql() {
                        sql_part.insert(key.clone(), value.clone());
                    }
                    if decision.backend.includes_doc() {
                        doc_part.insert(key.clone(), value.clone());
                    }
                }
                None => {
                    doc_part.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(pk) = primary_key {
            let has_pk = sql_part.get(pk).map(|v| !v.is_null()).unwrap_or(false);
            if !has_pk && !sql_part.is_empty() {
                warn!(pk, "Record missing primary-key value; relational side skipped");
                outcome.skipped_missing_pk += 1;
                sql_part.clear();
            }
        }

        if !sql_part.is_empty() {
            sql_batch.push(sql_part);
        }
        if !doc_part.is_empty() {
            doc_batch.push(doc_part);
        }
    }

    if !sql_batch.is_empty() {
        outcome.sql_rows = rel.batch_upsert(table, &sql_batch, primary_key).await?;
    }
    if !doc_batch.is_empty() {
        if let Some(key) = doc_key {
            doc.ensure_unique_index(collection, key).await?;
        }
        outcome.doc_rows = doc.batch_upsert(collection, &doc_batch, doc_key).await?;
    }

    debug!(
        records = outcome.records_routed,
        sql_rows = outcome.sql_rows,
        doc_rows = outcome.doc_rows,
        "Routed batch"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Backend, SqlType};
    use crate::record::FieldType;

    fn decision(backend: Backend, unique: bool) -> PlacementDecision {
        PlacementDecision {
            backend,
            canonical_type: FieldType::Str,
            sql_type: Some(SqlType::VarChar(255)),
            is_nullable: false,
            is_unique: unique,
            is_primary_key: false,
            reason: String::new(),
        }
    }

    #[test]
    fn test_doc_key_prefers_primary_key_when_in_doc() {
        let mut decisions = IndexMap::new();
        decisions.insert("username".to_owned(), decision(Backend::Both, true));
        decisions.insert("token".to_owned(), decision(Backend::Doc, true));
        assert_eq!(
            select_doc_key(&decisions, Some("username")),
            Some("username".to_owned())
        );
    }

    #[test]
    fn test_doc_key_skips_sql_only_primary_key() {
        let mut decisions = IndexMap::new();
        decisions.insert("user_id".to_owned(), decision(Backend::Sql, true));
        decisions.insert("token".to_owned(), decision(Backend::Doc, true));
        assert_eq!(
            select_doc_key(&decisions, Some("user_id")),
            Some("token".to_owned())
        );
    }

    #[test]
    fn test_doc_key_excludes_timestamps_and_non_unique() {
        let mut decisions = IndexMap::new();
        decisions.insert("sys_ingested_at".to_owned(), decision(Backend::Both, true));
        decisions.insert("city".to_owned(), decision(Backend::Doc, false));
        assert_eq!(select_doc_key(&decisions, None), None);
    }

    #[test]
    fn test_doc_key_deterministic_first_by_name() {
        let mut decisions = IndexMap::new();
        decisions.insert("zeta".to_owned(), decision(Backend::Doc, true));
        decisions.insert("alpha".to_owned(), decision(Backend::Doc, true));
        assert_eq!(select_doc_key(&decisions, None), Some("alpha".to_owned()));
    }
}
