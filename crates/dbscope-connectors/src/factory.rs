//! Connector factory: dialect selection by configuration tag.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::{ConnectorError, Result};
use crate::{DatabaseConnector, MySqlConnector, PostgresConnector, SqliteConnector};

/// The closed set of supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Server dialects take a connection URL; the embedded one takes a path.
    pub fn is_embedded(&self) -> bool {
        matches!(self, Dialect::Sqlite)
    }
}

impl FromStr for Dialect {
    type Err = ConnectorError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(ConnectorError::UnsupportedDialect(other.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Build and verify the connector for `dialect_tag`.
///
/// `descriptor` is a connection URL for the server dialects and a file path
/// for SQLite. Construction fails if the backend cannot be reached.
pub async fn create(dialect_tag: &str, descriptor: &str) -> Result<Arc<dyn DatabaseConnector>> {
    let dialect: Dialect = dialect_tag.parse()?;
    info!("Creating {} connector", dialect);

    let connector: Arc<dyn DatabaseConnector> = match dialect {
        Dialect::Postgres => Arc::new(PostgresConnector::connect(descriptor).await?),
        Dialect::MySql => Arc::new(MySqlConnector::connect(descriptor).await?),
        Dialect::Sqlite => Arc::new(SqliteConnector::connect(descriptor).await?),
    };
    Ok(connector)
}

/// Validate a server connection URL against `schemes` and return a
/// credential-free `scheme://host:port/path` rendering for log lines.
pub(crate) fn server_target(descriptor: &str, schemes: &[&str]) -> Result<String> {
    let parsed = url::Url::parse(descriptor)
        .map_err(|e| ConnectorError::ConnectionFailed(format!("invalid connection string: {}", e)))?;

    if !schemes.contains(&parsed.scheme()) {
        return Err(ConnectorError::ConnectionFailed(format!(
            "unexpected scheme '{}', expected one of {:?}",
            parsed.scheme(),
            schemes
        )));
    }

    let host = parsed.host_str().unwrap_or("localhost");
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    Ok(format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path()))
}
