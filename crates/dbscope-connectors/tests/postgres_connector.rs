//! Integration tests for the PostgreSQL connector.
//!
//! These tests need a running PostgreSQL server. Point
//! `DBSCOPE_TEST_POSTGRES_URL` at a database the test user may create schemas
//! in; when it is unset every test returns early.

use dbscope_connectors::{create, ConnectorError, DatabaseConnector, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

struct Fixture {
    admin: PgPool,
    schema: String,
    db: Arc<dyn DatabaseConnector>,
}

impl Fixture {
    fn table(&self, name: &str) -> String {
        format!("\"{}\".\"{}\"", self.schema, name)
    }

    async fn teardown(self) {
        self.db.close().await.unwrap();
        sqlx::raw_sql(&format!("DROP SCHEMA \"{}\" CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .unwrap();
        self.admin.close().await;
    }
}

async fn fixture() -> Option<Fixture> {
    let Ok(url) = std::env::var("DBSCOPE_TEST_POSTGRES_URL") else {
        eprintln!("DBSCOPE_TEST_POSTGRES_URL not set, skipping");
        return None;
    };

    let schema = format!("dbscope_{}", uuid::Uuid::new_v4().simple());
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();

    let setup = format!(
        r#"
        CREATE SCHEMA "{s}";
        CREATE TABLE "{s}".users (id integer PRIMARY KEY, name text NOT NULL, email text);
        INSERT INTO "{s}".users VALUES
            (1, 'alice', 'alice@example.com'), (2, 'bob', NULL), (3, 'carol', 'carol@example.com');
        CREATE TABLE "{s}".only_this_table (id integer PRIMARY KEY);
        CREATE TABLE "{s}".other (id integer PRIMARY KEY);
        CREATE TABLE "{s}".accounts (id integer PRIMARY KEY, org text, login text, created timestamptz);
        CREATE UNIQUE INDEX ux_accounts_org_login ON "{s}".accounts (org, login);
        CREATE INDEX ix_accounts_created ON "{s}".accounts (created);
        CREATE INDEX ix_accounts_lower_login ON "{s}".accounts (lower(login));
        CREATE INDEX ix_accounts_org_lower_login ON "{s}".accounts (org, lower(login));
        CREATE TABLE "{s}".ledger (id bigint PRIMARY KEY, amount numeric(10, 2), tags text[], meta jsonb, day date, ok boolean);
        INSERT INTO "{s}".ledger VALUES (1, 12.50, ARRAY['a', 'b'], '{{"k": 1}}', '2024-02-29', true);
        "#,
        s = schema
    );
    sqlx::raw_sql(&setup).execute(&admin).await.unwrap();

    let db = create("postgres", &url).await.unwrap();
    Some(Fixture { admin, schema, db })
}

#[tokio::test]
async fn test_scan_excludes_system_schemas() {
    let Some(fx) = fixture().await else { return };

    let tables = fx.db.scan(&[]).await.unwrap();
    assert!(tables
        .iter()
        .all(|t| !t.name.starts_with("\"pg_catalog\".") && !t.name.starts_with("\"information_schema\".")));
    assert!(tables.iter().any(|t| t.name == fx.table("users")));

    fx.teardown().await;
}

#[tokio::test]
async fn test_scan_filter_returns_only_named_table() {
    let Some(fx) = fixture().await else { return };

    let tables = fx.db.scan(&["only_this_table".to_string()]).await.unwrap();
    let ours: Vec<_> = tables
        .iter()
        .filter(|t| t.name.starts_with(&format!("\"{}\".", fx.schema)))
        .collect();
    assert_eq!(ours.len(), 1);
    assert_eq!(ours[0].name, fx.table("only_this_table"));
    assert!(tables.iter().all(|t| !t.name.ends_with(".\"other\"")));

    fx.teardown().await;
}

#[tokio::test]
async fn test_users_scenario() {
    let Some(fx) = fixture().await else { return };
    let users = fx.table("users");

    let tables = fx.db.scan(&["users".to_string()]).await.unwrap();
    let table = tables.iter().find(|t| t.name == users).unwrap();
    let shape: Vec<(&str, &str, bool)> = table
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.data_type.as_str(), c.nullable))
        .collect();
    assert_eq!(
        shape,
        vec![("id", "integer", false), ("name", "text", false), ("email", "text", true)]
    );

    assert_eq!(fx.db.sample(&users, 2).await.unwrap().len(), 2);

    let desc = fx.db.describe_table(&users).await.unwrap();
    assert_eq!(desc.row_count, 3);
    assert_eq!(desc.primary_keys, Some(vec!["id".to_string()]));
    assert_eq!(desc.sample_data.map(|s| s.len()), Some(3));
    assert_eq!(desc.columns, table.columns);

    fx.teardown().await;
}

#[tokio::test]
async fn test_describe_accepts_dotted_name() {
    let Some(fx) = fixture().await else { return };

    let desc = fx
        .db
        .describe_table(&format!("{}.users", fx.schema))
        .await
        .unwrap();
    assert_eq!(desc.name, fx.table("users"));

    fx.teardown().await;
}

#[tokio::test]
async fn test_describe_indexes() {
    let Some(fx) = fixture().await else { return };

    let desc = fx.db.describe_table(&fx.table("accounts")).await.unwrap();
    let indexes = desc.indexes.expect("indexes");
    assert_eq!(indexes.len(), 2, "{indexes:?}");

    let org_login = indexes.iter().find(|i| i.name == "ux_accounts_org_login").unwrap();
    assert!(org_login.unique);
    assert_eq!(org_login.columns, vec!["org", "login"]);

    let created = indexes.iter().find(|i| i.name == "ix_accounts_created").unwrap();
    assert!(!created.unique);
    assert_eq!(created.columns, vec!["created"]);

    assert!(indexes.iter().all(|i| !i.name.ends_with("_pkey")));
    assert!(indexes.iter().all(|i| i.name != "ix_accounts_org_lower_login"));

    fx.teardown().await;
}

#[tokio::test]
async fn test_describe_missing_table() {
    let Some(fx) = fixture().await else { return };

    let err = fx
        .db
        .describe_table(&fx.table("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::TableNotFound(_)));

    fx.teardown().await;
}

#[tokio::test]
async fn test_query_decodes_native_types() {
    let Some(fx) = fixture().await else { return };

    let rows = fx
        .db
        .query(&format!("SELECT * FROM {}", fx.table("ledger")))
        .await
        .unwrap();
    let row = &rows[0];
    assert_eq!(row["id"], Value::Int(1));
    assert_eq!(row["amount"], Value::Text("12.50".to_string()));
    assert_eq!(row["tags"], Value::Text("{a,b}".to_string()));
    assert_eq!(row["meta"], Value::Json(serde_json::json!({"k": 1})));
    assert_eq!(
        row["day"],
        Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
    );
    assert_eq!(row["ok"], Value::Bool(true));

    fx.teardown().await;
}

#[tokio::test]
async fn test_query_runs_read_only() {
    let Some(fx) = fixture().await else { return };

    let err = fx
        .db
        .query(&format!("INSERT INTO {} VALUES (9, 'x', NULL)", fx.table("users")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("read-only"), "{err}");

    fx.teardown().await;
}

#[tokio::test]
async fn test_session_read_write_does_not_unlock_writes() {
    let Some(fx) = fixture().await else { return };

    let result = fx
        .db
        .query("SET SESSION CHARACTERISTICS AS TRANSACTION READ WRITE")
        .await;
    assert!(result.is_ok(), "{result:?}");

    let err = fx
        .db
        .query(&format!("INSERT INTO {} VALUES (9, 'x', NULL)", fx.table("users")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("read-only"), "{err}");

    let desc = fx.db.describe_table(&fx.table("users")).await.unwrap();
    assert_eq!(desc.row_count, 3);

    fx.teardown().await;
}
