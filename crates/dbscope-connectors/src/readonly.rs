//! Read-only unit-of-work helpers shared by every dialect.
//!
//! Each contract call opens its own transaction from the connector's pool,
//! runs its statements on that transaction and commits it. Read-only
//! enforcement is the backend's: server dialects open every transaction with
//! a read-only `BEGIN` statement and the pool also marks its sessions
//! read-only. Dropping a future that holds one of these transactions rolls
//! it back.

use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Connection, Database, Pool, Transaction};
use tracing::{debug, warn};

use crate::error::{ConnectorError, Result};
use crate::value::{materialize, CellDecoder, Row};

/// A concrete driver connection that can run caller SQL over the simple/text
/// protocol.
pub(crate) trait Session: Connection + private::Sealed {
    type Row: sqlx::Row;

    fn fetch_raw<'c>(&'c mut self, sql: &'c str) -> BoxFuture<'c, sqlx::Result<Vec<Self::Row>>>;
}

mod private {
    pub trait Sealed {}
}

macro_rules! impl_session {
    ($conn:ty, $row:ty) => {
        impl private::Sealed for $conn {}

        impl Session for $conn {
            type Row = $row;

            fn fetch_raw<'c>(
                &'c mut self,
                sql: &'c str,
            ) -> BoxFuture<'c, sqlx::Result<Vec<Self::Row>>> {
                sqlx::Executor::fetch_all(self, sqlx::raw_sql(sql))
            }
        }
    };
}

impl_session!(PgConnection, PgRow);
impl_session!(MySqlConnection, MySqlRow);
impl_session!(SqliteConnection, SqliteRow);

/// Verify the pool can hand out a live connection.
pub(crate) async fn ping<DB: Database>(pool: &Pool<DB>) -> Result<()> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;
    conn.ping()
        .await
        .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))
}

/// Open a transaction for `operation`. `begin_statement` replaces the plain
/// `BEGIN` when the dialect can mark the transaction read-only as it starts.
pub(crate) async fn begin<DB: Database>(
    pool: &Pool<DB>,
    operation: &'static str,
    begin_statement: Option<&'static str>,
) -> Result<Transaction<'static, DB>> {
    let tx = match begin_statement {
        Some(stmt) => pool.begin_with(stmt).await,
        None => pool.begin().await,
    }
    .map_err(|e| ConnectorError::query(operation, e))?;
    debug!("{}: read-only transaction open", operation);
    Ok(tx)
}

/// Finish a read-only transaction.
pub(crate) async fn finish<DB: Database>(
    tx: Transaction<'static, DB>,
    operation: &'static str,
) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| ConnectorError::query(operation, e))
}

/// Run `sql` verbatim and materialize every row.
///
/// Statements go through the backend's simple/text protocol so that types
/// without a dedicated mapping can still be read as text.
pub(crate) async fn fetch_rows<S>(
    conn: &mut S,
    sql: &str,
    decode: CellDecoder<S::Row>,
) -> sqlx::Result<Vec<Row>>
where
    S: Session,
    usize: sqlx::ColumnIndex<S::Row>,
{
    let rows = conn.fetch_raw(sql).await?;
    materialize(&rows, decode)
}

/// Like [`fetch_rows`] but any failure yields `None`.
///
/// The statement runs inside a savepoint so a failure does not poison the
/// enclosing transaction.
pub(crate) async fn fetch_rows_best_effort<S>(
    conn: &mut S,
    sql: &str,
    decode: CellDecoder<S::Row>,
) -> Option<Vec<Row>>
where
    S: Session,
    usize: sqlx::ColumnIndex<S::Row>,
{
    let mut savepoint = match conn.begin().await {
        Ok(sp) => sp,
        Err(e) => {
            warn!("sample skipped, could not open savepoint: {}", e);
            return None;
        }
    };

    match fetch_rows(&mut *savepoint, sql, decode).await {
        Ok(rows) => match savepoint.commit().await {
            Ok(()) => Some(rows),
            Err(e) => {
                warn!("sample discarded, savepoint release failed: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("sample unavailable: {}", e);
            if let Err(e) = savepoint.rollback().await {
                warn!("rollback to savepoint failed: {}", e);
            }
            None
        }
    }
}
