//! dbscope connectors - read-only database introspection
//!
//! This crate provides one connector per SQL dialect:
//! - PostgreSQL
//! - MySQL
//! - SQLite (embedded file)
//!
//! All of them implement [`DatabaseConnector`] and are built through
//! [`factory::create`], so callers never depend on a concrete dialect.
//! Every read runs inside a transaction the backend treats as read-only;
//! that flag is the only write protection. Caller SQL is not parsed or
//! filtered, and table names given to `sample` are interpolated into SQL as
//! they are, so they must come from a prior `scan`.

pub mod error;
pub mod factory;
pub mod mysql;
pub mod postgres;
mod readonly;
pub mod schema;
pub mod sql;
pub mod sqlite;
pub mod value;

pub use error::{ConnectorError, Result};
pub use factory::{create, Dialect};
pub use mysql::MySqlConnector;
pub use postgres::PostgresConnector;
pub use schema::{Column, Index, Table, TableDescription};
pub use sqlite::SqliteConnector;
pub use value::{Row, Value};

use async_trait::async_trait;

/// Uniform read-only contract over every supported dialect.
///
/// Each method is a single unit of work in its own transaction. Dropping the
/// returned future abandons that transaction and it is rolled back.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// The dialect behind this connector, needed to interpret
    /// [`Column::data_type`].
    fn dialect(&self) -> Dialect;

    /// Check that the backend is reachable. Does not touch session state.
    async fn ping(&self) -> Result<()>;

    /// List base tables and their columns, ordered by table name (by schema
    /// first on PostgreSQL). An empty filter means every user table;
    /// otherwise only the named tables that exist are returned.
    async fn scan(&self, tables: &[String]) -> Result<Vec<Table>>;

    /// Run `sql` verbatim and return every row.
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// `SELECT * FROM <table> LIMIT <limit>`; a non-positive `limit` means 10.
    async fn sample(&self, table: &str, limit: i64) -> Result<Vec<Row>>;

    /// Columns, row count, a best-effort 5-row sample, primary key and
    /// secondary indexes of one table.
    async fn describe_table(&self, table: &str) -> Result<TableDescription>;

    /// Release the connection pool. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}
