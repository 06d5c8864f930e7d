//! SQLite connector.
//!
//! The database file is opened with the read-only flag and never created.
//! Column, key and index metadata come from the `pragma_table_info`,
//! `pragma_index_list` and `pragma_index_info` table-valued functions, which
//! take the table name as a bind parameter.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{ConnectorError, Result};
use crate::factory::Dialect;
use crate::readonly;
use crate::schema::{non_empty, Column, Index, Table, TableDescription};
use crate::sql::{self, Placeholder};
use crate::value::{Row, Value};
use crate::DatabaseConnector;

const MAX_CONNECTIONS: u32 = 5;

const SCAN_TABLES: &str = r#"
    SELECT name
    FROM sqlite_master
    WHERE type = 'table'
      AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
"#;

const LOAD_COLUMNS: &str = r#"
    SELECT name, type, "notnull", pk
    FROM pragma_table_info(?)
    ORDER BY cid
"#;

const RESOLVE_TABLE: &str = r#"
    SELECT name
    FROM sqlite_master
    WHERE type = 'table' AND name = ? COLLATE NOCASE
"#;

const PRIMARY_KEY: &str = r#"
    SELECT name
    FROM pragma_table_info(?)
    WHERE pk > 0
    ORDER BY pk
"#;

const INDEX_LIST: &str = r#"
    SELECT name, "unique"
    FROM pragma_index_list(?)
    WHERE origin <> 'pk'
    ORDER BY name
"#;

const INDEX_COLUMNS: &str = r#"
    SELECT name
    FROM pragma_index_info(?)
    ORDER BY seqno
"#;

/// Connector for an embedded SQLite database file.
pub struct SqliteConnector {
    pool: SqlitePool,
}

impl SqliteConnector {
    /// Open `path` (a file path or a `sqlite:` URL) read-only and verify it.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = if path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path)
                .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(path)
        }
        .read_only(true)
        .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

        let connector = Self { pool };
        if let Err(e) = connector.ping().await {
            connector.pool.close().await;
            return Err(e);
        }

        info!("Opened SQLite database {}", path);
        Ok(connector)
    }
}

#[async_trait]
impl DatabaseConnector for SqliteConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn ping(&self) -> Result<()> {
        readonly::ping(&self.pool).await
    }

    async fn scan(&self, tables: &[String]) -> Result<Vec<Table>> {
        const OP: &str = "scan";
        let mut tx = readonly::begin(&self.pool, OP, None).await?;

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
        let mut tx = readonly::begin(&self.pool, OP, None).await?;
        let rows = readonly::fetch_rows(&mut *tx, sql, decode_cell)
            .await
            .map_err(|e| ConnectorError::query(OP, e))?;
        readonly::finish(tx, OP).await?;
        Ok(rows)
    }

    async fn sample(&self, table: &str, limit: i64) -> Result<Vec<Row>> {
        let limit = sql::effective_limit(limit);
        self.query(&sql::select_sample(table, limit)).await
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        const OP: &str = "describe table";
        let mut tx = readonly::begin(&self.pool, OP, None).await?;

        let resolved: Option<String> = sqlx::query_scalar(RESOLVE_TABLE)
            .bind(table)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on(OP, table, e))?;
        let Some(name) = resolved else {
            return Err(ConnectorError::TableNotFound(table.to_string()));
        };
        let quoted = sql::quote_ident(&name, '"');

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

        let indexes = load_indexes(&mut *tx, &name).await?;

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
///
/// Primary-key columns are reported as not nullable: `INTEGER PRIMARY KEY`
/// aliases the rowid and can never hold NULL, even though the pragma leaves
/// `notnull` unset for it.
async fn load_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<Column>> {
    let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(LOAD_COLUMNS)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| ConnectorError::query_on("load columns", table, e))?;

    Ok(rows
        .into_iter()
        .map(|(name, data_type, not_null, pk)| Column {
            name,
            data_type,
            nullable: not_null == 0 && pk == 0,
        })
        .collect())
}

/// Secondary indexes of `table`. An index whose key parts cannot all be
/// resolved to columns is logged and left out.
async fn load_indexes(conn: &mut SqliteConnection, table: &str) -> Result<Vec<Index>> {
    let listed: Vec<(String, i64)> = sqlx::query_as(INDEX_LIST)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| ConnectorError::query_on("load indexes", table, e))?;

    let mut indexes = Vec::with_capacity(listed.len());
    for (index, unique) in listed {
        let columns: Vec<Option<String>> = match sqlx::query_scalar(INDEX_COLUMNS)
            .bind(&index)
            .fetch_all(&mut *conn)
            .await
        {
            Ok(columns) => columns,
            Err(e) => {
                warn!("skipping index {} on {}: {}", index, table, e);
                continue;
            }
        };
        // Expression key parts have no column name; such an index is left out.
        let Some(resolved) = columns.into_iter().collect::<Option<Vec<String>>>() else {
            debug!("skipping index {} on {}: expression key part", index, table);
            continue;
        };
        if let Some(idx) = Index::from_resolved(index, resolved, unique != 0) {
            indexes.push(idx);
        }
    }
    Ok(indexes)
}

fn scan_query(filter_len: usize) -> String {
    let mut query = SCAN_TABLES.to_string();
    if filter_len > 0 {
        query.push_str(&format!(
            "      AND name IN ({})\n",
            sql::in_list(Placeholder::Positional, 1, filter_len)
        ));
    }
    query.push_str("    ORDER BY name");
    query
}

/// Map one non-null SQLite cell onto a [`Value`] by its storage class.
fn decode_cell(row: &SqliteRow, i: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
    Ok(match type_name {
        "INTEGER" => Value::Int(row.try_get_unchecked(i)?),
        "REAL" => Value::Float(row.try_get_unchecked(i)?),
        "BLOB" => Value::Bytes(row.try_get_unchecked(i)?),
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
    use sqlx::Connection as _;

    #[test]
    fn test_scan_query_excludes_internal_tables() {
        let q = scan_query(0);
        assert!(q.contains("NOT LIKE 'sqlite\\_%' ESCAPE '\\'"));
        assert!(q.trim_end().ends_with("ORDER BY name"));
    }

    #[test]
    fn test_scan_query_with_filter() {
        assert!(scan_query(2).contains("AND name IN (?, ?)"));
    }

    #[tokio::test]
    async fn test_decode_cells_by_storage_class() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let rows = readonly::fetch_rows(
            &mut conn,
            "SELECT 42 AS i, 1.5 AS f, 'hi' AS t, x'00ff' AS b, NULL AS n",
            decode_cell,
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["i"], Value::Int(42));
        assert_eq!(row["f"], Value::Float(1.5));
        assert_eq!(row["t"], Value::Text("hi".to_string()));
        assert_eq!(row["b"], Value::Bytes(vec![0x00, 0xff]));
        assert_eq!(row["n"], Value::Null);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_unit_of_work_futures_are_send() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        assert_send(&readonly::fetch_rows(&mut conn, "SELECT 1", decode_cell));
        assert_send(&readonly::fetch_rows_best_effort(&mut conn, "SELECT 1", decode_cell));

        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        assert_send(&readonly::begin(&pool, "query", None));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_best_effort_failure_leaves_transaction_usable() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let mut tx = conn.begin().await.unwrap();

        let sample =
            readonly::fetch_rows_best_effort(&mut *tx, "SELECT * FROM missing", decode_cell)
                .await;
        assert!(sample.is_none());

        let rows = readonly::fetch_rows(&mut *tx, "SELECT 1 AS one", decode_cell)
            .await
            .unwrap();
        assert_eq!(rows[0]["one"], Value::Int(1));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_best_effort_success_returns_rows() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        let mut tx = conn.begin().await.unwrap();
        let sample = readonly::fetch_rows_best_effort(
            &mut *tx,
            "SELECT 'a' AS v UNION ALL SELECT 'b'",
            decode_cell,
        )
        .await
        .unwrap();
        let values: Vec<&Value> = sample.iter().map(|r| &r["v"]).collect();
        assert_eq!(
            values,
            vec![&Value::Text("a".to_string()), &Value::Text("b".to_string())]
        );
    }
}
