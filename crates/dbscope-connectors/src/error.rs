//! Typed errors for the connectors crate.

use thiserror::Error;

/// Errors that can occur in database connectors.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Failed to establish or verify a connection to the database.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The dialect tag does not name a supported backend.
    #[error("unsupported database type: {0}")]
    UnsupportedDialect(String),
    /// The requested table does not exist in the backend catalog.
    #[error("table not found: {0}")]
    TableNotFound(String),
    /// The backend rejected or failed a statement.
    #[error("{} failed{}: {}", .operation, table_suffix(.table), .message)]
    QueryFailed {
        operation: &'static str,
        table: Option<String>,
        message: String,
    },
}

fn table_suffix(table: &Option<String>) -> String {
    match table {
        Some(t) => format!(" for table {}", t),
        None => String::new(),
    }
}

impl ConnectorError {
    /// Wrap a driver error raised while running `operation`.
    pub fn query(operation: &'static str, err: sqlx::Error) -> Self {
        ConnectorError::QueryFailed {
            operation,
            table: None,
            message: err.to_string(),
        }
    }

    /// Wrap a driver error raised while running `operation` against `table`.
    pub fn query_on(operation: &'static str, table: &str, err: sqlx::Error) -> Self {
        ConnectorError::QueryFailed {
            operation,
            table: Some(table.to_string()),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
