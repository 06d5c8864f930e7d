//! Database configuration from a YAML file plus environment overrides.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{bail, Context, Result};
use dbscope_connectors::Dialect;
use serde::Deserialize;
use tracing::debug;

/// File used for the embedded dialect when none is configured.
pub const DEFAULT_SQLITE_FILE: &str = "database.db";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Dialect tag: `postgres`, `mysql` or `sqlite`.
    #[serde(rename = "type", default)]
    pub db_type: String,
    /// Server dialects only.
    #[serde(default)]
    pub connection_string: Option<String>,
    /// Embedded dialect only.
    #[serde(default)]
    pub file: Option<String>,
}

impl Config {
    /// Read `path`, then apply `DB_TYPE`, `DATABASE_URL` and `DATABASE_FILE`.
    ///
    /// A missing file is tolerated as long as the environment names a
    /// database type.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str(&text)
                .with_context(|| format!("Invalid config file {}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("config file {} not found, using environment", path.display());
                Config::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file {}", path.display()))
            }
        };

        config.database.apply_env();

        if config.database.db_type.is_empty() {
            bail!(
                "no database type configured: set database.type in {} or DB_TYPE",
                path.display()
            );
        }
        Ok(config)
    }
}

impl DatabaseConfig {
    fn apply_env(&mut self) {
        if let Some(db_type) = non_empty_var("DB_TYPE") {
            self.db_type = db_type;
        }
        if let Some(url) = non_empty_var("DATABASE_URL") {
            self.connection_string = Some(url);
        }
        if let Some(file) = non_empty_var("DATABASE_FILE") {
            self.file = Some(file);
        }
    }

    /// The descriptor handed to the connector factory for this dialect.
    pub fn connection_descriptor(&self) -> Result<String> {
        let dialect: Dialect = self.db_type.parse()?;
        if dialect.is_embedded() {
            return Ok(self
                .file
                .clone()
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| DEFAULT_SQLITE_FILE.to_string()));
        }
        match self.connection_string.as_deref() {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => bail!(
                "connection string is required for {} connection",
                self.db_type
            ),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
