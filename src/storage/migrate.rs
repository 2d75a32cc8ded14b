//! Data migration between backends.
//!
//! When a field's placement flips, the data already stored has to follow
//! the decision. Rows and documents are correlated by the linking fields
//! (`username` + `sys_ingested_at`); entries missing the link are skipped
//! and logged, never guessed.

use tracing::{debug, info, warn};

use snafu::ResultExt;

use crate::analysis::SqlType;
use crate::error::{MigrateDocumentSnafu, MigrateError, MigrateRelationalSnafu};

use super::{DocumentStore, LinkKey, RelationalStore};

/// Counts from one field migration.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationOutcome {
    pub migrated: u64,
    pub skipped: u64,
}

/// Copy a field's values from the document store into an existing
/// relational column, then unset the field from the documents.
///
/// The target column must already exist; schema reconciliation adds it
/// before calling this.
pub async fn doc_to_sql(
    rel: &mut dyn RelationalStore,
    doc: &mut dyn DocumentStore,
    table: &str,
    collection: &str,
    field: &str,
) -> Result<MigrationOutcome, MigrateError> {
    let documents = doc
        .find_with_field(collection, field)
        .await
        .context(MigrateDocumentSnafu)?;

    let mut outcome = MigrationOutcome::default();
    for document in &documents {
        let Some(link) = LinkKey::from_record(document) else {
            warn!(field, "Document missing linking fields; skipping migration");
            outcome.skipped += 1;
            continue;
        };
        let Some(value) = document.get(field) else {
            outcome.skipped += 1;
            continue;
        };
        if rel
            .set_linked_value(table, field, &link, value)
            .await
            .context(MigrateRelationalSnafu)?
        {
            outcome.migrated += 1;
        } else {
            debug!(field, "No matching relational row for document link");
            outcome.skipped += 1;
        }
    }

    if outcome.migrated > 0 {
        doc.unset_field(collection, field)
            .await
            .context(MigrateDocumentSnafu)?;
    }

    info!(
        field,
        migrated = outcome.migrated,
        skipped = outcome.skipped,
        "Migrated field from document to relational backend"
    );
    Ok(outcome)
}

/// Copy a relational column into the matching documents, then drop the
/// column.
pub async fn sql_to_doc(
    rel: &mut dyn RelationalStore,
    doc: &mut dyn DocumentStore,
    table: &str,
    collection: &str,
    field: &str,
    column_type: &SqlType,
) -> Result<MigrationOutcome, MigrateError> {
    let rows = rel
        .fetch_linked_column(table, field, column_type)
        .await
        .context(MigrateRelationalSnafu)?;

    let mut outcome = MigrationOutcome::default();
    for (link, value) in &rows {
        if doc
            .set_field(collection, link, field, value)
            .await
            .context(MigrateDocumentSnafu)?
        {
            outcome.migrated += 1;
        } else {
            debug!(field, "No matching document for relational link");
            outcome.skipped += 1;
        }
    }

    rel.drop_column(table, field)
        .await
        .context(MigrateRelationalSnafu)?;

    info!(
        field,
        migrated = outcome.migrated,
        skipped = outcome.skipped,
        "Migrated field from relational to document backend"
    );
    Ok(outcome)
}
