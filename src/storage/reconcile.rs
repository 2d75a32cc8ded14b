//! Schema reconciliation.
//!
//! Before any batch touches the relational side, the live table is diffed
//! against the current placement decisions and brought up to date: missing
//! columns are added, types are widened along the legal order, and fields
//! that moved to the document side are migrated out and dropped. Columns
//! with no current decision are retained, never dropped implicitly, and a
//! primary key is never silently altered once set.

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::analysis::{PlacementDecision, SqlType};
use crate::error::PipelineError;

use super::{ColumnInfo, DocumentStore, RelationalStore, migrate};

/// What a reconciliation pass changed, for logging and metrics.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub created: bool,
    pub added: Vec<String>,
    pub widened: Vec<String>,
    pub moved_to_doc: Vec<String>,
    pub moved_to_sql: Vec<String>,
    /// Alterations refused as unsafe (attempted narrowing, PK change).
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.created
            || !self.added.is_empty()
            || !self.widened.is_empty()
            || !self.moved_to_doc.is_empty()
            || !self.moved_to_sql.is_empty()
    }
}

fn column_ddl(name: &str, decision: &PlacementDecision) -> String {
    let sql_type = decision
        .sql_type
        .unwrap_or(SqlType::VarChar(255));
    let nullability = if decision.is_nullable {
        "NULL"
    } else {
        "NOT NULL"
    };
    let unique = if decision.is_unique && !decision.is_primary_key {
        " UNIQUE"
    } else {
        ""
    };
    format!("`{name}` {} {nullability}{unique}", sql_type.ddl())
}

fn create_table_ddl(table: &str, sql_fields: &[(&String, &PlacementDecision)]) -> String {
    let mut parts: Vec<String> = sql_fields
        .iter()
        .map(|(name, decision)| column_ddl(name, decision))
        .collect();
    if let Some((pk, _)) = sql_fields.iter().find(|(_, d)| d.is_primary_key) {
        parts.push(format!("PRIMARY KEY (`{pk}`)"));
    }
    format!("CREATE TABLE `{table}` ({})", parts.join(", "))
}

/// Reconcile the relational table with the current decisions. Runs before
/// every batch that would touch the relational side; migrations triggered
/// by placement flips run inline so the batch that follows sees a
/// consistent schema.
pub async fn ensure_table(
    rel: &mut dyn RelationalStore,
    doc: &mut dyn DocumentStore,
    table: &str,
    collection: &str,
    decisions: &IndexMap<String, PlacementDecision>,
    previous: &IndexMap<String, PlacementDecision>,
) -> Result<ReconcileReport, PipelineError> {
    let mut report = ReconcileReport::default();

    let sql_fields: Vec<(&String, &PlacementDecision)> = decisions
        .iter()
        .filter(|(_, d)| d.backend.includes_sql())
        .collect();

    let columns = rel.list_columns(table).await?;

    if columns.is_empty() {
        if sql_fields.is_empty() {
            return Ok(report);
        }
        let ddl = create_table_ddl(table, &sql_fields);
        rel.execute(&ddl).await?;
        report.created = true;
        info!(table, columns = sql_fields.len(), "Created relational table");

        migrate_newly_sql_fields(
            rel, doc, table, collection, &sql_fields, previous, &mut report,
        )
        .await?;
        return Ok(report);
    }

    let existing: IndexMap<&str, &ColumnInfo> =
        columns.iter().map(|c| (c.name.as_str(), c)).collect();

    // Missing columns and type widenings.
    for (name, decision) in &sql_fields {
        match existing.get(name.as_str()) {
            None => {
                // Existing rows have no value for a freshly added column,
                // so it is always added nullable.
                let sql_type = decision.sql_type.unwrap_or(SqlType::VarChar(255));
                let ddl =
                    format!("ALTER TABLE `{table}` ADD COLUMN `{name}` {}", sql_type.ddl());
                rel.execute(&ddl).await?;
                report.added.push((*name).clone());
            }
            Some(column) => {
                let (Some(current), Some(target)) = (column.sql_type, decision.sql_type)
                else {
                    continue;
                };
                if current == target {
                    continue;
                }
                if current.widens_to(&target) {
                    rel.modify_column(table, name, &target).await?;
                    info!(table, column = %name, from = %current, to = %target, "Widened column");
                    report.widened.push((*name).clone());
                } else if !target.widens_to(&current) {
                    // Neither direction is a widening: refuse and record.
                    warn!(
                        table,
                        column = %name,
                        from = %current,
                        to = %target,
                        "Refusing unsafe column type change"
                    );
                    report.skipped.push((*name).clone());
                }
                // A decision narrower than the live column needs no DDL;
                // the column is already wide enough.
            }
        }
    }

    migrate_newly_sql_fields(rel, doc, table, collection, &sql_fields, previous, &mut report)
        .await?;

    // Columns whose field moved to the document side: migrate, then drop.
    // Columns with no decision at all are retained.
    for column in &columns {
        let Some(decision) = decisions.get(&column.name) else {
            continue;
        };
        if decision.backend.includes_sql() || !decision.backend.includes_doc() {
            continue;
        }
        if column.primary_key {
            warn!(
                table,
                column = %column.name,
                "Refusing to migrate primary-key column off the relational side"
            );
            report.skipped.push(column.name.clone());
            continue;
        }
        let column_type = column.sql_type.unwrap_or(SqlType::Text);
        migrate::sql_to_doc(rel, doc, table, collection, &column.name, &column_type).await?;
        report.moved_to_doc.push(column.name.clone());
    }

    reconcile_primary_key(rel, table, &columns, decisions, &mut report).await?;

    Ok(report)
}

/// Migrate document-side data into columns whose field just gained a
/// relational placement.
async fn migrate_newly_sql_fields(
    rel: &mut dyn RelationalStore,
    doc: &mut dyn DocumentStore,
    table: &str,
    collection: &str,
    sql_fields: &[(&String, &PlacementDecision)],
    previous: &IndexMap<String, PlacementDecision>,
    report: &mut ReconcileReport,
) -> Result<(), PipelineError> {
    for (name, _) in sql_fields {
        let was_doc_only = previous
            .get(*name)
            .map(|p| !p.backend.includes_sql() && p.backend.includes_doc())
            .unwrap_or(false);
        if was_doc_only {
            migrate::doc_to_sql(rel, doc, table, collection, name).await?;
            report.moved_to_sql.push((*name).clone());
        }
    }
    Ok(())
}

async fn reconcile_primary_key(
    rel: &mut dyn RelationalStore,
    table: &str,
    columns: &[ColumnInfo],
    decisions: &IndexMap<String, PlacementDecision>,
    report: &mut ReconcileReport,
) -> Result<(), PipelineError> {
    let current = columns
        .iter()
        .find(|c| c.primary_key)
        .map(|c| c.name.as_str());
    let desired = decisions
        .iter()
        .find(|(_, d)| d.is_primary_key)
        .map(|(name, _)| name.as_str());

    match (current, desired) {
        (None, Some(pk)) => {
            // Promoting a key where none existed is safe to attempt; a
            // failure (duplicates, existing NULLs) is a permanent conflict
            // and is skipped rather than failing the flush.
            let ddl = format!("ALTER TABLE `{table}` ADD PRIMARY KEY (`{pk}`)");
            match rel.execute(&ddl).await {
                Ok(()) => info!(table, key = %pk, "Primary key added"),
                Err(e) => {
                    warn!(table, key = %pk, error = %e, "Could not add primary key; skipping");
                    report.skipped.push(pk.to_owned());
                }
            }
        }
        (Some(old), Some(new)) if old != new => {
            warn!(
                table,
                current = %old,
                elected = %new,
                "Primary-key change is schema-breaking; keeping current key"
            );
            report.skipped.push(new.to_owned());
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Backend;
    use crate::record::FieldType;

    fn decision(backend: Backend, sql_type: Option<SqlType>, pk: bool) -> PlacementDecision {
        PlacementDecision {
            backend,
            canonical_type: FieldType::Str,
            sql_type,
            is_nullable: true,
            is_unique: false,
            is_primary_key: pk,
            reason: String::new(),
        }
    }

    #[test]
    fn test_create_table_ddl_shape() {
        let username = decision(Backend::Both, Some(SqlType::VarChar(255)), true);
        let age = decision(Backend::Sql, Some(SqlType::BigInt), false);
        let name_username = "username".to_owned();
        let name_age = "age".to_owned();
        let fields = vec![(&name_username, &username), (&name_age, &age)];

        let ddl = create_table_ddl("records", &fields);
        assert!(ddl.starts_with("CREATE TABLE `records` ("));
        assert!(ddl.contains("`username` VARCHAR(255) NULL"));
        assert!(ddl.contains("`age` BIGINT NULL"));
        assert!(ddl.contains("PRIMARY KEY (`username`)"));
    }

    #[test]
    fn test_column_ddl_unique_and_not_null() {
        let mut d = decision(Backend::Sql, Some(SqlType::Char(36)), false);
        d.is_nullable = false;
        d.is_unique = true;
        assert_eq!(column_ddl("token", &d), "`token` CHAR(36) NOT NULL UNIQUE");
    }

    #[test]
    fn test_primary_key_not_doubly_unique() {
        let mut d = decision(Backend::Sql, Some(SqlType::VarChar(255)), true);
        d.is_unique = true;
        d.is_nullable = false;
        assert!(!column_ddl("username", &d).contains("UNIQUE"));
    }

    #[test]
    fn test_datetime_columns_keep_subsecond_precision() {
        let d = decision(Backend::Both, Some(SqlType::DateTime), false);
        assert!(column_ddl("sys_ingested_at", &d).contains("DATETIME(6)"));
    }
}
