//! MySQL connector.
//!
//! Tables are addressed by bare name inside the session's active database
//! (`DATABASE()`). Catalog text columns are cast to `CHAR` because MySQL 8
//! reports several `information_schema` columns as binary strings.

use async_trait::async_trait;
use futures::FutureExt as _;
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{Executor, MySqlConnection, MySqlPool, Row as _};
use tracing::{debug, info};

use crate::error::{ConnectorError, Result};
use crate::factory::{server_target, Dialect};
use crate::readonly;
use crate::schema::{non_empty, Column, Index, Table, TableDescription};
use crate::sql::{self, Placeholder};
use crate::value::{Row, Value};
use crate::DatabaseConnector;

const MAX_CONNECTIONS: u32 = 5;

/// Opens every unit of work. A caller statement can flip the session
/// characteristic below, but not the access mode of a transaction already
/// started this way.
const READ_ONLY_BEGIN: &str = "START TRANSACTION READ ONLY";

/// Applied to every pooled session when it is established; a backstop only.
const READ_ONLY_SESSION: &str = "SET SESSION TRANSACTION READ ONLY";

const SCAN_TABLES: &str = r#"
    SELECT CAST(table_name AS CHAR)
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema = DATABASE()
"#;

const LOAD_COLUMNS: &str = r#"
    SELECT CAST(column_name AS CHAR), CAST(data_type AS CHAR), CAST(is_nullable AS CHAR)
    FROM information_schema.columns
    WHERE table_schema = DATABASE() AND table_name = ?
    ORDER BY ordinal_position
"#;

const RESOLVE_TABLE: &str = r#"
    SELECT CAST(table_name AS CHAR)
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema = DATABASE()
      AND table_name = ?
"#;

const PRIMARY_KEY: &str = r#"
    SELECT CAST(column_name AS CHAR)
    FROM information_schema.key_column_usage
    WHERE table_schema = DATABASE()
      AND table_name = ?
      AND constraint_name = 'PRIMARY'
    ORDER BY ordinal_position
"#;

const INDEXES: &str = r#"
    SELECT CAST(index_name AS CHAR),
           CAST(MIN(non_unique) AS SIGNED),
           CAST(GROUP_CONCAT(column_name ORDER BY seq_in_index SEPARATOR ',') AS CHAR)
    FROM information_schema.statistics
    WHERE table_schema = DATABASE()
      AND table_name = ?
      AND index_name <> 'PRIMARY'
    GROUP BY index_name
    HAVING COUNT(*) = COUNT(column_name)
    ORDER BY index_name
"#;

/// Connector for the MySQL family of servers.
pub struct MySqlConnector {
    pool: MySqlPool,
}

impl MySqlConnector {
    /// Dial `conn_string` (a `mysql://` URL) and verify the connection.
    pub async fn connect(conn_string: &str) -> Result<Self> {
        let target = server_target(conn_string, &["mysql"])?;

        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .after_connect(|conn, _meta| {
                async move {
                    conn.execute(READ_ONLY_SESSION).await?;
                    Ok(())
                }
                .boxed()
            })
            .connect(conn_string)
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

        let connector = Self { pool };
        if let Err(e) = connector.ping().await {
            connector.pool.close().await;
            return Err(e);
        }

        info!("Connected to MySQL at {}", target);
        Ok(connector)
    }
}

#[async_trait]
impl DatabaseConnector for MySqlConnector {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn ping(&self) -> Result<()> {
        readonly::ping(&self.pool).await
    }

    async fn scan(&self, tables: &[String]) -> Result<Vec<Table>> {
        const OP: &str = "scan";
        let mut tx = readonly::begin(&self.pool, OP, Some(READ_ONLY_BEGIN)).await?;

        let query = scan_query(tables.len());
        let mut q = sqlx::query_scalar::<_, String>(&query);
        for table in tables {
            q = q.bind(table);
        }
        let names = q
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query(OP, e))?;

        let mut result = Vec::with_capacity(names.len());
        for name in names {
            let columns = load_columns(&mut *tx, &name).await?;
            result.push(Table { name, columns });
        }

        readonly::finish(tx, OP).await?;
        debug!("scan found {} tables", result.len());
        Ok(result)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        const OP: &str = "query";
        let mut tx = readonly::begin(&self.pool, OP, Some(READ_ONLY_BEGIN)).await?;
        let rows = readonly::fetch_rows(&mut *tx, sql, decode_cell)
            .await
            .map_err(|e| ConnectorError::query(OP, e))?;
        readonly::finish(tx, OP).await?;
        Ok(rows)
    }

    async fn sample(&self, table: &str, limit: i64) -> Result<Vec<Row>> {
        let limit = sql::effective_limit(limit);
        self.query(&sample_query(table, limit)).await
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        const OP: &str = "describe table";
        let mut tx = readonly::begin(&self.pool, OP, Some(READ_ONLY_BEGIN)).await?;

        let resolved: Option<String> = sqlx::query_scalar(RESOLVE_TABLE)
            .bind(table)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on(OP, table, e))?;
        let Some(name) = resolved else {
            return Err(ConnectorError::TableNotFound(table.to_string()));
        };
        let quoted = sql::quote_ident(&name, '`');

        let columns = load_columns(&mut *tx, &name).await?;

        let row_count: i64 = sqlx::query_scalar(&sql::select_count(&quoted))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on("count rows", &name, e))?;

        let sample_sql = sql::select_sample(&quoted, sql::DESCRIBE_SAMPLE_ROWS);
        let sample_data =
            readonly::fetch_rows_best_effort(&mut *tx, &sample_sql, decode_cell).await;

        let primary_keys: Vec<String> = sqlx::query_scalar(PRIMARY_KEY)
            .bind(&name)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on("load primary key", &name, e))?;

        let index_rows: Vec<(String, i64, Option<String>)> = sqlx::query_as(INDEXES)
            .bind(&name)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on("load indexes", &name, e))?;
        let indexes: Vec<Index> = index_rows
            .into_iter()
            .filter_map(|(index, non_unique, cols)| {
                Index::from_resolved(index, split_columns(cols.as_deref()), non_unique == 0)
            })
            .collect();

        readonly::finish(tx, OP).await?;

        Ok(TableDescription {
            name,
            columns,
            row_count,
            sample_data,
            primary_keys: non_empty(primary_keys),
            indexes: non_empty(indexes),
        })
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Column loader shared by `scan` and `describe_table`.
async fn load_columns(conn: &mut MySqlConnection, table: &str) -> Result<Vec<Column>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(LOAD_COLUMNS)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| ConnectorError::query_on("load columns", table, e))?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, is_nullable)| Column {
            name,
            data_type,
            nullable: is_nullable == "YES",
        })
        .collect())
}

fn scan_query(filter_len: usize) -> String {
    let mut query = SCAN_TABLES.to_string();
    if filter_len > 0 {
        query.push_str(&format!(
            "      AND table_name IN ({})\n",
            sql::in_list(Placeholder::Positional, 1, filter_len)
        ));
    }
    query.push_str("    ORDER BY table_name");
    query
}

/// The table name is wrapped in backticks as given; it is not escaped.
fn sample_query(table: &str, limit: i64) -> String {
    sql::select_sample(&format!("`{}`", table), limit)
}

/// Split a `GROUP_CONCAT` column list.
fn split_columns(concatenated: Option<&str>) -> Vec<String> {
    concatenated
        .map(|s| {
            s.split(',')
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Map one non-null MySQL cell onto a [`Value`].
fn decode_cell(row: &MySqlRow, i: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
    Ok(match type_name {
        "BOOLEAN" => Value::Bool(row.try_get_unchecked(i)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "TINYINT UNSIGNED"
        | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" | "YEAR" => {
            Value::Int(row.try_get_unchecked(i)?)
        }
        "BIGINT UNSIGNED" => {
            let v: u64 = row.try_get_unchecked(i)?;
            i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(v.to_string()))
        }
        "FLOAT" => Value::Float(row.try_get_unchecked::<f32, _>(i)?.into()),
        "DOUBLE" => Value::Float(row.try_get_unchecked(i)?),
        "DATE" => Value::Date(row.try_get_unchecked(i)?),
        "DATETIME" | "TIMESTAMP" => Value::Timestamp(row.try_get_unchecked(i)?),
        "JSON" => Value::Json(row.try_get_unchecked(i)?),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => Value::Bytes(row.try_get_unchecked(i)?),
        _ => {
            let bytes: Vec<u8> = row.try_get_unchecked(i)?;
            match String::from_utf8(bytes) {
                Ok(text) => Value::Text(text),
                Err(e) => Value::Bytes(e.into_bytes()),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_query_filters_active_database() {
        let q = scan_query(0);
        assert!(q.contains("table_schema = DATABASE()"));
        assert!(!q.contains("IN ("));
    }

    #[test]
    fn test_scan_query_with_filter_uses_positional_placeholders() {
        let q = scan_query(3);
        assert!(q.contains("AND table_name IN (?, ?, ?)"));
    }

    #[test]
    fn test_sample_query_wraps_table_in_backticks() {
        assert_eq!(sample_query("users", 10), "SELECT * FROM `users` LIMIT 10");
    }

    #[test]
    fn test_index_query_drops_partially_resolved_indexes() {
        assert!(INDEXES.contains("HAVING COUNT(*) = COUNT(column_name)"));
    }

    #[test]
    fn test_split_columns() {
        assert_eq!(split_columns(Some("name,email")), vec!["name", "email"]);
        assert!(split_columns(None).is_empty());
        assert!(split_columns(Some("")).is_empty());
    }
}
