//! In-memory backend stores for integration tests.
//!
//! Both stores keep their data behind `Arc<Mutex<..>>` so a "restarted"
//! pipeline can be handed the same backing data, simulating backends that
//! survive a process crash. The relational store interprets exactly the
//! DDL shapes the reconciler emits.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use driftwood::analysis::SqlType;
use driftwood::error::{DocumentError, RelationalError};
use driftwood::record::{INGESTED_AT_FIELD, Record, USERNAME_FIELD, Value};
use driftwood::storage::{ColumnInfo, DocumentStore, LinkKey, RelationalStore};

#[derive(Default)]
pub struct RelationalState {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Record>,
    pub ddl_log: Vec<String>,
    /// When set, the next batch upsert fails once (transient error).
    pub fail_next_upsert: bool,
}

impl RelationalState {
    pub fn table_exists(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .map(|c| c.name.as_str())
    }
}

#[derive(Clone, Default)]
pub struct MemoryRelational {
    pub state: Arc<Mutex<RelationalState>>,
}

impl MemoryRelational {
    pub fn new() -> Self {
        Self::default()
    }
}

fn strip_ident(s: &str) -> &str {
    s.trim().trim_matches('`')
}

/// Parse "`name` TYPE ..." into a ColumnInfo.
fn parse_column_def(def: &str) -> Option<ColumnInfo> {
    let def = def.trim();
    let rest = def.strip_prefix('`')?;
    let (name, rest) = rest.split_once('`')?;
    let mut parts = rest.trim().split_whitespace();
    let type_token = parts.next()?;
    let nullable = !rest.to_ascii_uppercase().contains("NOT NULL");
    Some(ColumnInfo {
        name: name.to_owned(),
        sql_type: SqlType::parse_column_type(type_token),
        nullable,
        primary_key: false,
    })
}

/// Split a column list on commas that are not inside parentheses.
fn split_top_level(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in list.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

#[async_trait]
impl RelationalStore for MemoryRelational {
    async fn execute(&mut self, statement: &str) -> Result<(), RelationalError> {
        let mut state = self.state.lock().unwrap();
        state.ddl_log.push(statement.to_owned());

        if let Some(rest) = statement.strip_prefix("CREATE TABLE ") {
            let open = rest.find('(').unwrap_or(0);
            let list = &rest[open + 1..rest.rfind(')').unwrap_or(rest.len())];
            let mut columns = Vec::new();
            let mut pk: Option<String> = None;
            for part in split_top_level(list) {
                let part = part.trim().to_owned();
                if let Some(key) = part.strip_prefix("PRIMARY KEY (") {
                    pk = Some(strip_ident(key.trim_end_matches(')')).to_owned());
                } else if let Some(column) = parse_column_def(&part) {
                    columns.push(column);
                }
            }
            if let Some(pk) = pk {
                for column in &mut columns {
                    if column.name == pk {
                        column.primary_key = true;
                    }
                }
            }
            state.columns = columns;
        } else if statement.contains("ADD COLUMN") {
            if let Some(idx) = statement.find("ADD COLUMN ") {
                if let Some(column) = parse_column_def(&statement[idx + "ADD COLUMN ".len()..]) {
                    state.columns.push(column);
                }
            }
        } else if statement.contains("ADD PRIMARY KEY") {
            if let Some(idx) = statement.find('(') {
                let name =
                    strip_ident(statement[idx + 1..].trim_end_matches(')')).to_owned();
                for column in &mut state.columns {
                    column.primary_key = column.name == name;
                }
            }
        }
        Ok(())
    }

    async fn list_columns(&mut self, _table: &str) -> Result<Vec<ColumnInfo>, RelationalError> {
        Ok(self.state.lock().unwrap().columns.clone())
    }

    async fn modify_column(
        &mut self,
        _table: &str,
        column: &str,
        new_type: &SqlType,
    ) -> Result<(), RelationalError> {
        let mut state = self.state.lock().unwrap();
        state.ddl_log.push(format!("MODIFY {column} {new_type}"));
        for c in &mut state.columns {
            if c.name == column {
                c.sql_type = Some(*new_type);
            }
        }
        Ok(())
    }

    async fn drop_column(&mut self, _table: &str, column: &str) -> Result<(), RelationalError> {
        let mut state = self.state.lock().unwrap();
        state.ddl_log.push(format!("DROP {column}"));
        state.columns.retain(|c| c.name != column);
        for row in &mut state.rows {
            row.shift_remove(column);
        }
        Ok(())
    }

    async fn batch_upsert(
        &mut self,
        _table: &str,
        rows: &[Record],
        pk: Option<&str>,
    ) -> Result<u64, RelationalError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_upsert {
            state.fail_next_upsert = false;
            return Err(RelationalError::SqlTimeout {
                operation: "batch_upsert".to_owned(),
            });
        }
        for row in rows {
            match pk.and_then(|pk| row.get(pk).filter(|v| !v.is_null()).map(|v| (pk, v))) {
                Some((pk_name, pk_value)) => {
                    if let Some(existing) = state
                        .rows
                        .iter_mut()
                        .find(|r| r.get(pk_name) == Some(pk_value))
                    {
                        *existing = row.clone();
                    } else {
                        state.rows.push(row.clone());
                    }
                }
                None => state.rows.push(row.clone()),
            }
        }
        Ok(rows.len() as u64)
    }

    async fn fetch_linked_column(
        &mut self,
        _table: &str,
        column: &str,
        _column_type: &SqlType,
    ) -> Result<Vec<(LinkKey, Value)>, RelationalError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .iter()
            .filter_map(|row| {
                let link = LinkKey::from_record(row)?;
                let value = row.get(column).filter(|v| !v.is_null())?;
                Some((link, value.clone()))
            })
            .collect())
    }

    async fn set_linked_value(
        &mut self,
        _table: &str,
        column: &str,
        link: &LinkKey,
        value: &Value,
    ) -> Result<bool, RelationalError> {
        let mut state = self.state.lock().unwrap();
        for row in &mut state.rows {
            if row.get(USERNAME_FIELD) == Some(&link.username)
                && row.get(INGESTED_AT_FIELD) == Some(&link.ingested_at)
            {
                row.insert(column.to_owned(), value.clone());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn close(&mut self) -> Result<(), RelationalError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct DocumentState {
    pub docs: Vec<Record>,
    pub unique_indexes: Vec<String>,
    pub fail_next_upsert: bool,
}

#[derive(Clone, Default)]
pub struct MemoryDocument {
    pub state: Arc<Mutex<DocumentState>>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocument {
    async fn ensure_unique_index(
        &mut self,
        _collection: &str,
        field: &str,
    ) -> Result<(), DocumentError> {
        let mut state = self.state.lock().unwrap();
        if !state.unique_indexes.iter().any(|f| f == field) {
            state.unique_indexes.push(field.to_owned());
        }
        Ok(())
    }

    async fn batch_upsert(
        &mut self,
        _collection: &str,
        docs: &[Record],
        key_field: Option<&str>,
    ) -> Result<u64, DocumentError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_upsert {
            state.fail_next_upsert = false;
            return Err(DocumentError::DocTimeout {
                operation: "batch_upsert".to_owned(),
            });
        }
        for doc in docs {
            let key = key_field.and_then(|k| doc.get(k).filter(|v| !v.is_null()).map(|v| (k, v)));
            match key {
                Some((key_name, key_value)) => {
                    if let Some(existing) = state
                        .docs
                        .iter_mut()
                        .find(|d| d.get(key_name) == Some(key_value))
                    {
                        *existing = doc.clone();
                    } else {
                        state.docs.push(doc.clone());
                    }
                }
                None => state.docs.push(doc.clone()),
            }
        }
        Ok(docs.len() as u64)
    }

    async fn find_with_field(
        &mut self,
        _collection: &str,
        field: &str,
    ) -> Result<Vec<Record>, DocumentError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .docs
            .iter()
            .filter(|d| d.contains_key(field))
            .cloned()
            .collect())
    }

    async fn set_field(
        &mut self,
        _collection: &str,
        link: &LinkKey,
        field: &str,
        value: &Value,
    ) -> Result<bool, DocumentError> {
        let mut state = self.state.lock().unwrap();
        for doc in &mut state.docs {
            if doc.get(USERNAME_FIELD) == Some(&link.username)
                && doc.get(INGESTED_AT_FIELD) == Some(&link.ingested_at)
            {
                doc.insert(field.to_owned(), value.clone());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn unset_field(
        &mut self,
        _collection: &str,
        field: &str,
    ) -> Result<u64, DocumentError> {
        let mut state = self.state.lock().unwrap();
        let mut removed = 0;
        for doc in &mut state.docs {
            if doc.shift_remove(field).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn close(&mut self) -> Result<(), DocumentError> {
        Ok(())
    }
}
