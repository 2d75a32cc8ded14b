//! MongoDB document client.
//!
//! The document side stores records with their nested structure intact.
//! Typed scalars (timestamps, UUIDs, IPs) are stored in their canonical
//! string forms so values compare equal across backends.

use mongodb::bson::{Bson, Document};
use mongodb::options::{ClientOptions, IndexOptions, ReplaceOptions};
use mongodb::{Client, IndexModel};
use snafu::ResultExt;
use tracing::{debug, info};

use futures::TryStreamExt;

use crate::config::DocumentConfig;
use crate::error::{
    DocConnectSnafu, DocFindSnafu, DocIndexSnafu, DocUpdateSnafu, DocUpsertSnafu, DocumentError,
};
use crate::record::{INGESTED_AT_FIELD, Record, USERNAME_FIELD, Value, coerce_str, format_datetime};

use super::{DocumentStore, LinkKey};

pub struct MongoStore {
    client: Client,
    database: String,
}

impl MongoStore {
    /// Connect and verify the server responds to a ping.
    pub async fn connect(config: &DocumentConfig) -> Result<Self, DocumentError> {
        let uri = match (&config.user, &config.password) {
            (Some(user), Some(password)) => format!(
                "mongodb://{user}:{password}@{}:{}/{}",
                config.host, config.port, config.database
            ),
            _ => format!("mongodb://{}:{}/{}", config.host, config.port, config.database),
        };

        let options = ClientOptions::parse(&uri).await.context(DocConnectSnafu)?;
        let client = Client::with_options(options).context(DocConnectSnafu)?;

        let mut ping = Document::new();
        ping.insert("ping", 1);
        client
            .database(&config.database)
            .run_command(ping, None)
            .await
            .context(DocConnectSnafu)?;

        info!(
            host = %config.host,
            database = %config.database,
            "Connected to document backend"
        );

        Ok(Self {
            client,
            database: config.database.clone(),
        })
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.client.database(&self.database).collection(name)
    }
}

fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => Bson::Int64(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::Str(s) => Bson::String(s.clone()),
        Value::Ip(ip) => Bson::String(ip.to_string()),
        Value::Uuid(u) => Bson::String(u.to_string()),
        Value::DateTime(dt) => Bson::String(format_datetime(dt)),
        Value::Array(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Object(map) => {
            let mut doc = Document::new();
            for (k, v) in map {
                doc.insert(k.clone(), value_to_bson(v));
            }
            Bson::Document(doc)
        }
    }
}

fn bson_to_value(bson: Bson) -> Value {
    match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::Int(i64::from(i)),
        Bson::Int64(i) => Value::Int(i),
        Bson::Double(f) => Value::Float(f),
        // Strings were stored in canonical form; re-detection restores the
        // typed variant.
        Bson::String(s) => coerce_str(&s),
        Bson::DateTime(dt) => Value::DateTime(dt.to_chrono().fixed_offset()),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_value).collect()),
        Bson::Document(doc) => Value::Object(
            doc.into_iter()
                .map(|(k, v)| (k, bson_to_value(v)))
                .collect(),
        ),
        other => Value::Str(other.to_string()),
    }
}

fn record_to_document(record: &Record) -> Document {
    let mut doc = Document::new();
    for (k, v) in record {
        doc.insert(k.clone(), value_to_bson(v));
    }
    doc
}

/// Convert a stored document back into a record, dropping the backend's own
/// `_id` field.
fn document_to_record(doc: Document) -> Record {
    doc.into_iter()
        .filter(|(k, _)| k != "_id")
        .map(|(k, v)| (k, bson_to_value(v)))
        .collect()
}

fn link_filter(link: &LinkKey) -> Document {
    let mut filter = Document::new();
    filter.insert(USERNAME_FIELD, value_to_bson(&link.username));
    filter.insert(INGESTED_AT_FIELD, value_to_bson(&link.ingested_at));
    filter
}

fn exists_filter(field: &str) -> Document {
    let mut exists = Document::new();
    exists.insert("$exists", true);
    let mut filter = Document::new();
    filter.insert(field, exists);
    filter
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    async fn ensure_unique_index(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<(), DocumentError> {
        let mut keys = Document::new();
        keys.insert(field, 1);
        let model = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection(collection)
            .create_index(model, None)
            .await
            .context(DocIndexSnafu { collection })?;
        debug!(collection, field, "Unique index ensured");
        Ok(())
    }

    async fn batch_upsert(
        &mut self,
        collection: &str,
        docs: &[Record],
        key_field: Option<&str>,
    ) -> Result<u64, DocumentError> {
        let coll = self.collection(collection);
        let mut written = 0;

        for record in docs {
            let document = record_to_document(record);
            let key_value = key_field
                .and_then(|k| record.get(k))
                .filter(|v| !v.is_null());

            match (key_field, key_value) {
                (Some(field), Some(value)) => {
                    let mut filter = Document::new();
                    filter.insert(field, value_to_bson(value));
                    let options = ReplaceOptions::builder().upsert(true).build();
                    coll.replace_one(filter, document, options)
                        .await
                        .context(DocUpsertSnafu)?;
                }
                // No usable key: plain insert, duplicates possible.
                _ => {
                    coll.insert_one(document, None)
                        .await
                        .context(DocUpsertSnafu)?;
                }
            }
            written += 1;
        }
        Ok(written)
    }

    async fn find_with_field(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<Vec<Record>, DocumentError> {
        let cursor = self
            .collection(collection)
            .find(exists_filter(field), None)
            .await
            .context(DocFindSnafu)?;
        let documents: Vec<Document> = cursor.try_collect().await.context(DocFindSnafu)?;
        Ok(documents.into_iter().map(document_to_record).collect())
    }

    async fn set_field(
        &mut self,
        collection: &str,
        link: &LinkKey,
        field: &str,
        value: &Value,
    ) -> Result<bool, DocumentError> {
        let mut set = Document::new();
        set.insert(field, value_to_bson(value));
        let mut update = Document::new();
        update.insert("$set", set);

        let result = self
            .collection(collection)
            .update_one(link_filter(link), update, None)
            .await
            .context(DocUpdateSnafu)?;
        Ok(result.modified_count > 0)
    }

    async fn unset_field(
        &mut self,
        collection: &str,
        field: &str,
    ) -> Result<u64, DocumentError> {
        let mut unset = Document::new();
        unset.insert(field, "");
        let mut update = Document::new();
        update.insert("$unset", unset);

        let result = self
            .collection(collection)
            .update_many(exists_filter(field), update, None)
            .await
            .context(DocUpdateSnafu)?;
        Ok(result.modified_count)
    }

    async fn close(&mut self) -> Result<(), DocumentError> {
        // The driver releases its connections when the client drops.
        Ok(())
    }
}
