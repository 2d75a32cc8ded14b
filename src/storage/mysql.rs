//! MySQL relational client on top of sqlx.
//!
//! All schema is created and altered at runtime from placement decisions;
//! there is no migration directory. Statements are built dynamically, with
//! identifiers backtick-quoted and every value bound.

use chrono::NaiveDateTime;
use snafu::ResultExt;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::query::Query;
use sqlx::{MySql, Row};
use tracing::{debug, info};

use crate::analysis::SqlType;
use crate::config::RelationalConfig;
use crate::error::{
    DdlSnafu, RelationalError, SqlConnectSnafu, SqlDecodeSnafu, SqlQuerySnafu, SqlUpsertSnafu,
};
use crate::record::{INGESTED_AT_FIELD, Record, USERNAME_FIELD, Value, coerce_str};

use super::{ColumnInfo, LinkKey, RelationalStore};

pub struct MySqlStore {
    pool: MySqlPool,
    database: String,
}

impl MySqlStore {
    /// Connect to the server, creating the database if it does not exist.
    pub async fn connect(config: &RelationalConfig) -> Result<Self, RelationalError> {
        let server_options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password);

        let bootstrap = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(server_options.clone())
            .await
            .context(SqlConnectSnafu)?;
        let create_db = format!("CREATE DATABASE IF NOT EXISTS `{}`", config.database);
        sqlx::query(&create_db)
            .execute(&bootstrap)
            .await
            .context(DdlSnafu {
                statement: create_db.as_str(),
            })?;
        bootstrap.close().await;

        // Only the flush path uses the connection, so a small pool suffices.
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect_with(server_options.database(&config.database))
            .await
            .context(SqlConnectSnafu)?;

        info!(
            host = %config.host,
            database = %config.database,
            "Connected to relational backend"
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }
}

/// Bind one pipeline value into a query. Absent and null values bind as
/// NULL; nested values (which should not reach the relational side) bind as
/// their JSON text.
fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: Option<&'q Value>,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        None | Some(Value::Null) => query.bind(None::<String>),
        Some(Value::Bool(b)) => query.bind(*b),
        Some(Value::Int(i)) => query.bind(*i),
        Some(Value::Float(f)) => query.bind(*f),
        Some(Value::Str(s)) => query.bind(s.as_str()),
        Some(Value::Ip(ip)) => query.bind(ip.to_string()),
        Some(Value::Uuid(u)) => query.bind(u.to_string()),
        Some(Value::DateTime(dt)) => query.bind(dt.naive_utc()),
        Some(nested @ (Value::Array(_) | Value::Object(_))) => {
            query.bind(nested.canonical_string())
        }
    }
}

#[async_trait::async_trait]
impl RelationalStore for MySqlStore {
    async fn execute(&mut self, statement: &str) -> Result<(), RelationalError> {
        debug!(statement, "Executing DDL");
        sqlx::query(statement)
            .execute(&self.pool)
            .await
            .context(DdlSnafu { statement })?;
        Ok(())
    }

    async fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, RelationalError> {
        let rows = sqlx::query(
            "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_KEY \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(&self.database)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .context(SqlQuerySnafu)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("COLUMN_NAME").context(SqlDecodeSnafu {
                column: "COLUMN_NAME",
            })?;
            let column_type: String = row.try_get("COLUMN_TYPE").context(SqlDecodeSnafu {
                column: "COLUMN_TYPE",
            })?;
            let is_nullable: String = row.try_get("IS_NULLABLE").context(SqlDecodeSnafu {
                column: "IS_NULLABLE",
            })?;
            let column_key: String = row.try_get("COLUMN_KEY").context(SqlDecodeSnafu {
                column: "COLUMN_KEY",
            })?;
            columns.push(ColumnInfo {
                name,
                sql_type: SqlType::parse_column_type(&column_type),
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
                primary_key: column_key.eq_ignore_ascii_case("PRI"),
            });
        }
        Ok(columns)
    }

    async fn modify_column(
        &mut self,
        table: &str,
        column: &str,
        new_type: &SqlType,
    ) -> Result<(), RelationalError> {
        let statement = format!(
            "ALTER TABLE `{table}` MODIFY COLUMN `{column}` {}",
            new_type.ddl()
        );
        self.execute(&statement).await
    }

    async fn drop_column(&mut self, table: &str, column: &str) -> Result<(), RelationalError> {
        let statement = format!("ALTER TABLE `{table}` DROP COLUMN `{column}`");
        self.execute(&statement).await
    }

    async fn batch_upsert(
        &mut self,
        table: &str,
        rows: &[Record],
        pk: Option<&str>,
    ) -> Result<u64, RelationalError> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Rows in a batch rarely share an exact key set; the statement
        // covers the union and absent keys bind as NULL.
        let mut columns: Vec<&String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !columns.contains(&key) {
                    columns.push(key);
                }
            }
        }

        let column_list = columns
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let row_placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let all_placeholders = vec![row_placeholders; rows.len()].join(", ");

        let mut statement =
            format!("INSERT INTO `{table}` ({column_list}) VALUES {all_placeholders}");
        if pk.is_some() {
            let updates = columns
                .iter()
                .map(|c| format!("`{c}` = VALUES(`{c}`)"))
                .collect::<Vec<_>>()
                .join(", ");
            statement.push_str(" ON DUPLICATE KEY UPDATE ");
            statement.push_str(&updates);
        }

        let mut query = sqlx::query(&statement);
        for row in rows {
            for column in &columns {
                query = bind_value(query, row.get(*column));
            }
        }

        let result = query
            .execute(&self.pool)
            .await
            .context(SqlUpsertSnafu)?;
        Ok(result.rows_affected())
    }

    async fn fetch_linked_column(
        &mut self,
        table: &str,
        column: &str,
        column_type: &SqlType,
    ) -> Result<Vec<(LinkKey, Value)>, RelationalError> {
        let statement = format!(
            "SELECT `{USERNAME_FIELD}`, `{INGESTED_AT_FIELD}`, `{column}` FROM `{table}` \
             WHERE `{column}` IS NOT NULL \
               AND `{USERNAME_FIELD}` IS NOT NULL \
               AND `{INGESTED_AT_FIELD}` IS NOT NULL"
        );
        let rows = sqlx::query(&statement)
            .fetch_all(&self.pool)
            .await
            .context(SqlQuerySnafu)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let username: String = row.try_get(0).context(SqlDecodeSnafu {
                column: USERNAME_FIELD,
            })?;
            let ingested_at: NaiveDateTime = row.try_get(1).context(SqlDecodeSnafu {
                column: INGESTED_AT_FIELD,
            })?;
            let value = match column_type {
                SqlType::Boolean => Value::Bool(
                    row.try_get::<bool, _>(2).context(SqlDecodeSnafu { column })?,
                ),
                SqlType::BigInt => Value::Int(
                    row.try_get::<i64, _>(2).context(SqlDecodeSnafu { column })?,
                ),
                SqlType::Double => Value::Float(
                    row.try_get::<f64, _>(2).context(SqlDecodeSnafu { column })?,
                ),
                SqlType::DateTime => {
                    let dt: NaiveDateTime =
                        row.try_get(2).context(SqlDecodeSnafu { column })?;
                    Value::DateTime(dt.and_utc().fixed_offset())
                }
                SqlType::Char(_) | SqlType::VarChar(_) | SqlType::Text => {
                    let s: String = row.try_get(2).context(SqlDecodeSnafu { column })?;
                    coerce_str(&s)
                }
            };
            out.push((
                LinkKey {
                    username: Value::Str(username),
                    ingested_at: Value::DateTime(ingested_at.and_utc().fixed_offset()),
                },
                value,
            ));
        }
        Ok(out)
    }

    async fn set_linked_value(
        &mut self,
        table: &str,
        column: &str,
        link: &LinkKey,
        value: &Value,
    ) -> Result<bool, RelationalError> {
        let statement = format!(
            "UPDATE `{table}` SET `{column}` = ? \
             WHERE `{USERNAME_FIELD}` = ? AND `{INGESTED_AT_FIELD}` = ?"
        );
        let mut query = sqlx::query(&statement);
        query = bind_value(query, Some(value));
        query = bind_value(query, Some(&link.username));
        query = bind_value(query, Some(&link.ingested_at));

        let result = query
            .execute(&self.pool)
            .await
            .context(SqlQuerySnafu)?;
        Ok(result.rows_affected() > 0)
    }

    async fn close(&mut self) -> Result<(), RelationalError> {
        self.pool.close().await;
        Ok(())
    }
}
