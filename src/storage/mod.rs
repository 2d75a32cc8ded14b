//! Backend storage abstractions.
//!
//! The pipeline consumes both backends through traits so the flush path can
//! be exercised against in-memory stores in tests and against MySQL/MongoDB
//! in production. Both contracts are idempotent on retry when called with
//! the same inputs: every write is an upsert keyed on an inferred key.

mod migrate;
mod mongo;
mod mysql;
mod reconcile;
mod router;

pub use migrate::{MigrationOutcome, doc_to_sql, sql_to_doc};
pub use mongo::MongoStore;
pub use mysql::MySqlStore;
pub use reconcile::{ReconcileReport, ensure_table};
pub use router::{RouteOutcome, route_batch, select_doc_key};

use std::time::Duration;

use async_trait::async_trait;

use crate::analysis::SqlType;
use crate::error::{DocumentError, RelationalError};
use crate::record::{INGESTED_AT_FIELD, Record, USERNAME_FIELD, Value};

/// A column as reported by the relational backend.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    /// `None` for column types the pipeline never emits; such columns are
    /// retained and never touched.
    pub sql_type: Option<SqlType>,
    pub nullable: bool,
    pub primary_key: bool,
}

/// The linking fields that identify one record across both backends.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkKey {
    pub username: Value,
    pub ingested_at: Value,
}

impl LinkKey {
    /// Extract the link from a record or document. Returns `None` when
    /// either linking field is absent or null; such records cannot be
    /// correlated across backends.
    pub fn from_record(record: &Record) -> Option<LinkKey> {
        let username = record.get(USERNAME_FIELD).filter(|v| !v.is_null())?;
        let ingested_at = record.get(INGESTED_AT_FIELD).filter(|v| !v.is_null())?;
        Some(LinkKey {
            username: username.clone(),
            ingested_at: ingested_at.clone(),
        })
    }
}

/// The relational backend contract.
///
/// Implementations own their connection; the flush path is the only caller,
/// so no method needs to be concurrency-safe beyond `Send`.
#[async_trait]
pub trait RelationalStore: Send {
    /// Run a DDL statement verbatim.
    async fn execute(&mut self, statement: &str) -> Result<(), RelationalError>;

    /// List the live columns of a table. An empty result means the table
    /// does not exist.
    async fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, RelationalError>;

    /// Widen a column to a new type.
    async fn modify_column(
        &mut self,
        table: &str,
        column: &str,
        new_type: &SqlType,
    ) -> Result<(), RelationalError>;

    /// Drop a column.
    async fn drop_column(&mut self, table: &str, column: &str) -> Result<(), RelationalError>;

    /// Upsert a batch of rows in one statement, keyed on `pk` when present;
    /// plain insert otherwise. Rows may have heterogeneous key sets; absent
    /// keys become NULL.
    async fn batch_upsert(
        &mut self,
        table: &str,
        rows: &[Record],
        pk: Option<&str>,
    ) -> Result<u64, RelationalError>;

    /// Read all `(link, value)` pairs where `column` is non-null, for
    /// migration to the document side.
    async fn fetch_linked_column(
        &mut self,
        table: &str,
        column: &str,
        column_type: &SqlType,
    ) -> Result<Vec<(LinkKey, Value)>, RelationalError>;

    /// Set `column` for the row matching `link`. Returns false when no row
    /// matched.
    async fn set_linked_value(
        &mut self,
        table: &str,
        column: &str,
        link: &LinkKey,
        value: &Value,
    ) -> Result<bool, RelationalError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), RelationalError>;
}

/// The document backend contract.
#[async_trait]
pub trait DocumentStore: Send {
    /// Create a unique index on `field` if it does not exist.
    async fn ensure_unique_index(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<(), DocumentError>;

    /// Upsert documents one by one: replace the whole document on a
    /// `key_field` match, insert on miss. Without a key field this is a
    /// plain insert and may produce duplicates.
    async fn batch_upsert(
        &mut self,
        collection: &str,
        docs: &[Record],
        key_field: Option<&str>,
    ) -> Result<u64, DocumentError>;

    /// Find every document in which `field` exists.
    async fn find_with_field(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<Vec<Record>, DocumentError>;

    /// `$set` a field on the document matching `link`. Returns false when
    /// no document matched.
    async fn set_field(
        &mut self,
        collection: &str,
        link: &LinkKey,
        field: &str,
        value: &Value,
    ) -> Result<bool, DocumentError>;

    /// `$unset` a field from every document carrying it. Returns the
    /// number of documents modified.
    async fn unset_field(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<u64, DocumentError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), DocumentError>;
}

async fn bounded<T>(
    deadline: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T, RelationalError>> + Send,
) -> Result<T, RelationalError> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| RelationalError::SqlTimeout {
            operation: operation.to_owned(),
        })?
}

async fn bounded_doc<T>(
    deadline: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T, DocumentError>> + Send,
) -> Result<T, DocumentError> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| DocumentError::DocTimeout {
            operation: operation.to_owned(),
        })?
}

/// Deadline decorator for the relational store: every call is bounded, and
/// a timeout surfaces as a failed (retryable) operation.
pub struct DeadlineRelational {
    inner: Box<dyn RelationalStore>,
    deadline: Duration,
}

impl DeadlineRelational {
    pub fn new(inner: Box<dyn RelationalStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl RelationalStore for DeadlineRelational {
    async fn execute(&mut self, statement: &str) -> Result<(), RelationalError> {
        bounded(self.deadline, "ddl", self.inner.execute(statement)).await
    }

    async fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, RelationalError> {
        bounded(self.deadline, "list_columns", self.inner.list_columns(table)).await
    }

    async fn modify_column(
        &mut self,
        table: &str,
        column: &str,
        new_type: &SqlType,
    ) -> Result<(), RelationalError> {
        bounded(
            self.deadline,
            "modify_column",
            self.inner.modify_column(table, column, new_type),
        )
        .await
    }

    async fn drop_column(&mut self, table: &str, column: &str) -> Result<(), RelationalError> {
        bounded(
            self.deadline,
            "drop_column",
            self.inner.drop_column(table, column),
        )
        .await
    }

    async fn batch_upsert(
        &mut self,
        table: &str,
        rows: &[Record],
        pk: Option<&str>,
    ) -> Result<u64, RelationalError> {
        bounded(
            self.deadline,
            "batch_upsert",
            self.inner.batch_upsert(table, rows, pk),
        )
        .await
    }

    async fn fetch_linked_column(
        &mut self,
        table: &str,
        column: &str,
        column_type: &SqlType,
    ) -> Result<Vec<(LinkKey, Value)>, RelationalError> {
        bounded(
            self.deadline,
            "fetch_linked_column",
            self.inner.fetch_linked_column(table, column, column_type),
        )
        .await
    }

    async fn set_linked_value(
        &mut self,
        table: &str,
        column: &str,
        link: &LinkKey,
        value: &Value,
    ) -> Result<bool, RelationalError> {
        bounded(
            self.deadline,
            "set_linked_value",
            self.inner.set_linked_value(table, column, link, value),
        )
        .await
    }

    async fn close(&mut self) -> Result<(), RelationalError> {
        bounded(self.deadline, "close", self.inner.close()).await
    }
}

/// Deadline decorator for the document store.
pub struct DeadlineDocument {
    inner: Box<dyn DocumentStore>,
    deadline: Duration,
}

impl DeadlineDocument {
    pub fn new(inner: Box<dyn DocumentStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl DocumentStore for DeadlineDocument {
    async fn ensure_unique_index(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<(), DocumentError> {
        bounded_doc(
            self.deadline,
            "ensure_unique_index",
            self.inner.ensure_unique_index(collection, field),
        )
        .await
    }

    async fn batch_upsert(
        &mut self,
        collection: &str,
        docs: &[Record],
        key_field: Option<&str>,
    ) -> Result<u64, DocumentError> {
        bounded_doc(
            self.deadline,
            "batch_upsert",
            self.inner.batch_upsert(collection, docs, key_field),
        )
        .await
    }

    async fn find_with_field(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<Vec<Record>, DocumentError> {
        bounded_doc(
            self.deadline,
            "find",
            self.inner.find_with_field(collection, field),
        )
        .await
    }

    async fn set_field(
        &mut self,
        collection: &str,
        link: &LinkKey,
        field: &str,
        value: &Value,
    ) -> Result<bool, DocumentError> {
        bounded_doc(
            self.deadline,
            "set_field",
            self.inner.set_field(collection, link, field, value),
        )
        .await
    }

    async fn unset_field(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<u64, DocumentError> {
        bounded_doc(
            self.deadline,
            "unset_field",
            self.inner.unset_field(collection, field),
        )
        .await
    }

    async fn close(&mut self) -> Result<(), DocumentError> {
        bounded_doc(self.deadline, "close", self.inner.close()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_key_requires_both_fields() {
        let full: Record = serde_json::from_str(
            r#"{"username":"alice","sys_ingested_at":"2024-01-15T10:30:00Z","age":30}"#,
        )
        .unwrap();
        assert!(LinkKey::from_record(&full).is_some());

        let missing: Record = serde_json::from_str(r#"{"username":"alice"}"#).unwrap();
        assert!(LinkKey::from_record(&missing).is_none());

        let null_link: Record =
            serde_json::from_str(r#"{"username":null,"sys_ingested_at":"x"}"#).unwrap();
        assert!(LinkKey::from_record(&null_link).is_none());
    }
}
