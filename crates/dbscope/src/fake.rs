//! In-memory connector for handler and server tests.

use std::sync::Mutex;

use async_trait::async_trait;
use dbscope_connectors::{
    Column, ConnectorError, DatabaseConnector, Dialect, Result, Row, Table, TableDescription,
    Value,
};

/// Records every call. `query("hang")` never completes, and describing any
/// table other than `users` fails with a not-found error.
#[derive(Default)]
pub struct FakeConnector {
    calls: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn users_columns() -> Vec<Column> {
    vec![Column {
        name: "id".to_string(),
        data_type: "INTEGER".to_string(),
        nullable: false,
    }]
}

fn alice() -> Row {
    Row::from([
        ("id".to_string(), Value::Int(1)),
        ("name".to_string(), Value::Text("alice".to_string())),
    ])
}

#[async_trait]
impl DatabaseConnector for FakeConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn ping(&self) -> Result<()> {
        self.record("ping".to_string());
        Ok(())
    }

    async fn scan(&self, tables: &[String]) -> Result<Vec<Table>> {
        self.record(format!("scan {}", tables.join(",")));
        Ok(vec![Table {
            name: "users".to_string(),
            columns: users_columns(),
        }])
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.record(format!("query {sql}"));
        if sql == "hang" {
            std::future::pending::<()>().await;
        }
        Ok(vec![alice()])
    }

    async fn sample(&self, table: &str, limit: i64) -> Result<Vec<Row>> {
        self.record(format!("sample {table} {limit}"));
        Ok(vec![alice()])
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription> {
        self.record(format!("describe {table}"));
        if table != "users" {
            return Err(ConnectorError::TableNotFound(table.to_string()));
        }
        Ok(TableDescription {
            name: "users".to_string(),
            columns: users_columns(),
            row_count: 1,
            sample_data: Some(vec![alice()]),
            primary_keys: Some(vec!["id".to_string()]),
            indexes: None,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
