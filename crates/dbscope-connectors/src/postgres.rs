//! PostgreSQL connector.
//!
//! Tables are addressed by `(schema, table)` pairs and surfaced as
//! `"schema"."table"`. Column metadata comes from `information_schema`;
//! primary keys and indexes come from `pg_index` / `pg_class` /
//! `pg_namespace` / `pg_attribute`, since `information_schema` does not
//! expose non-constraint indexes.

use async_trait::async_trait;
use futures::FutureExt as _;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, PgConnection, PgPool, Row as _};
use tracing::{debug, info};

use crate::error::{ConnectorError, Result};
use crate::factory::{server_target, Dialect};
use crate::readonly;
use crate::schema::{non_empty, Column, Index, Table, TableDescription};
use crate::sql::{self, Placeholder};
use crate::value::{Row, Value};
use crate::DatabaseConnector;

const MAX_CONNECTIONS: u32 = 5;

/// Applied to every pooled session when it is established. Caller SQL can
/// change session characteristics, so this is only a backstop.
const READ_ONLY_SESSION: &str = "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY";

/// Opens every unit of work.
const READ_ONLY_BEGIN: &str = "BEGIN READ ONLY";

const SCAN_TABLES: &str = r#"
    SELECT table_schema::text, table_name::text
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema NOT IN ('pg_catalog', 'information_schema')
      AND table_schema NOT LIKE 'pg\_toast%'
"#;

const LOAD_COLUMNS: &str = r#"
    SELECT column_name::text, data_type::text, is_nullable::text
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

const RESOLVE_TABLE: &str = r#"
    SELECT table_schema::text, table_name::text
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_name = $1
      AND ($2::text IS NULL OR table_schema = $2)
    ORDER BY (table_schema = current_schema()) DESC, table_schema
    LIMIT 1
"#;

const PRIMARY_KEY: &str = r#"
    SELECT a.attname::text
    FROM pg_index i
    JOIN pg_class c ON c.oid = i.indrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
    WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2
    ORDER BY array_position(i.indkey::int2[], a.attnum)
"#;

const INDEXES: &str = r#"
    SELECT ic.relname::text,
           i.indisunique,
           array_agg(a.attname::text ORDER BY k.ord)
    FROM pg_index i
    JOIN pg_class t ON t.oid = i.indrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_class ic ON ic.oid = i.indexrelid
    CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
    LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE n.nspname = $1 AND t.relname = $2
      AND NOT i.indisprimary
      AND k.ord <= i.indnkeyatts
    GROUP BY ic.relname, i.indisunique
    HAVING count(a.attname) = count(*)
    ORDER BY ic.relname
"#;

/// Connector for the PostgreSQL family of servers.
pub struct PostgresConnector {
    pool: PgPool,
}

impl PostgresConnector {
    /// Dial `conn_string` (a `postgres://` URL) and verify the connection.
    pub async fn connect(conn_string: &str) -> Result<Self> {
        let target = server_target(conn_string, &["postgres", "postgresql"])?;

        let pool = PgPoolOptions::new()
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

        info!("Connected to PostgreSQL at {}", target);
        Ok(connector)
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ping(&self) -> Result<()> {
        readonly::ping(&self.pool).await
    }

    async fn scan(&self, tables: &[String]) -> Result<Vec<Table>> {
        const OP: &str = "scan";
        let mut tx = readonly::begin(&self.pool, OP, Some(READ_ONLY_BEGIN)).await?;

        let query = scan_query(tables.len());
        let mut q = sqlx::query_as::<_, (String, String)>(&query);
        for table in tables {
            q = q.bind(table);
        }
        let names = q
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query(OP, e))?;

        let mut result = Vec::with_capacity(names.len());
        for (schema, name) in names {
            let columns = load_columns(&mut *tx, &schema, &name).await?;
            result.push(Table {
                name: qualified_name(&schema, &name),
                columns,
            });
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
        self.query(&sql::select_sample(table, limit)).await
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        const OP: &str = "describe table";
        let (schema_hint, name_hint) = parse_table_name(table);

        let mut tx = readonly::begin(&self.pool, OP, Some(READ_ONLY_BEGIN)).await?;

        let resolved: Option<(String, String)> = sqlx::query_as(RESOLVE_TABLE)
            .bind(&name_hint)
            .bind(&schema_hint)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on(OP, table, e))?;
        let Some((schema, name)) = resolved else {
            return Err(ConnectorError::TableNotFound(table.to_string()));
        };
        let qualified = qualified_name(&schema, &name);

        let columns = load_columns(&mut *tx, &schema, &name).await?;

        let row_count: i64 = sqlx::query_scalar(&sql::select_count(&qualified))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on("count rows", &qualified, e))?;

        let sample_sql = sql::select_sample(&qualified, sql::DESCRIBE_SAMPLE_ROWS);
        let sample_data =
            readonly::fetch_rows_best_effort(&mut *tx, &sample_sql, decode_cell).await;

        let primary_keys: Vec<String> = sqlx::query_scalar(PRIMARY_KEY)
            .bind(&schema)
            .bind(&name)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on("load primary key", &qualified, e))?;

        let index_rows: Vec<(String, bool, Vec<String>)> = sqlx::query_as(INDEXES)
            .bind(&schema)
            .bind(&name)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| ConnectorError::query_on("load indexes", &qualified, e))?;
        let indexes: Vec<Index> = index_rows
            .into_iter()
            .filter_map(|(index, unique, cols)| Index::from_resolved(index, cols, unique))
            .collect();

        readonly::finish(tx, OP).await?;

        Ok(TableDescription {
            name: qualified,
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
async fn load_columns(conn: &mut PgConnection, schema: &str, table: &str) -> Result<Vec<Column>> {
    let rows: Vec<(String, String, String)> = sqlx::query_as(LOAD_COLUMNS)
        .bind(schema)
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
            sql::in_list(Placeholder::Numbered, 1, filter_len)
        ));
    }
    query.push_str("    ORDER BY table_schema, table_name");
    query
}

/// `"schema"."table"` with embedded quotes doubled.
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!(
        "{}.{}",
        sql::quote_ident(schema, '"'),
        sql::quote_ident(table, '"')
    )
}

/// Split a caller-supplied table reference into an optional schema and the
/// table name. Accepts `"schema"."table"`, `schema.table` and bare names;
/// quoted parts may contain dots and doubled quotes.
pub fn parse_table_name(input: &str) -> (Option<String>, String) {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    let name = parts.pop().unwrap_or_default().trim().to_string();
    let schema = parts.pop().map(|s| s.trim().to_string());
    (schema, name)
}

/// Map one non-null Postgres cell onto a [`Value`].
///
/// Caller SQL runs over the simple query protocol, so every cell arrives in
/// text format and unmapped types can be read back as their text rendering.
fn decode_cell(row: &PgRow, i: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
    Ok(match type_name {
        "BOOL" => Value::Bool(row.try_get_unchecked(i)?),
        "INT2" => Value::Int(row.try_get_unchecked::<i16, _>(i)?.into()),
        "INT4" => Value::Int(row.try_get_unchecked::<i32, _>(i)?.into()),
        "INT8" => Value::Int(row.try_get_unchecked(i)?),
        "FLOAT4" => Value::Float(row.try_get_unchecked::<f32, _>(i)?.into()),
        "FLOAT8" => Value::Float(row.try_get_unchecked(i)?),
        "BYTEA" => Value::Bytes(row.try_get_unchecked(i)?),
        "DATE" => Value::Date(row.try_get_unchecked(i)?),
        "TIME" => Value::Time(row.try_get_unchecked(i)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get_unchecked(i)?),
        "TIMESTAMPTZ" => Value::TimestampTz(row.try_get_unchecked(i)?),
        "JSON" | "JSONB" => Value::Json(row.try_get_unchecked(i)?),
        "UUID" => Value::Uuid(row.try_get_unchecked(i)?),
        _ => Value::Text(row.try_get_unchecked(i)?),
    })
}
