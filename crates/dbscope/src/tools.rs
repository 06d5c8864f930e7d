//! Tool catalog and per-tool handlers.
//!
//! Each handler validates its arguments, makes exactly one connector call and
//! renders the outcome as pretty-printed JSON text. Connector failures become
//! error results rather than protocol errors.

use dbscope_connectors::sql::DEFAULT_SAMPLE_LIMIT;
use dbscope_connectors::DatabaseConnector;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

impl ToolResult {
    fn text(text: String) -> Self {
        Self {
            content: vec![Content::Text { text }],
            is_error: false,
        }
    }

    fn error(text: String) -> Self {
        Self {
            content: vec![Content::Text { text }],
            is_error: true,
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(text) => Self::text(text),
            Err(e) => Self::error(format!("Failed to marshal results: {e}")),
        }
    }
}

/// The `tools/list` payload.
pub fn definitions() -> Value {
    json!({
        "tools": [
            {
                "name": "scan_database",
                "description": "Discover database tables and their structure",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "tables": {
                            "type": ["array", "string"],
                            "items": { "type": "string" },
                            "description": "Optional list of specific table names to scan. If empty, scans all tables"
                        }
                    }
                }
            },
            {
                "name": "sample_table",
                "description": "Get sample data from a specific table",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "table": { "type": "string", "description": "Name of the table to sample" },
                        "limit": { "type": "number", "description": "Number of rows to return (default: 10)" }
                    },
                    "required": ["table"]
                }
            },
            {
                "name": "query_database",
                "description": "Execute a read-only SQL query on the database",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "SQL query to execute" }
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "describe_table",
                "description": "Describe a table: columns, row count, sample rows, primary key and indexes",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "table": { "type": "string", "description": "Name of the table to describe" }
                    },
                    "required": ["table"]
                }
            }
        ]
    })
}

/// Dispatch one `tools/call`.
pub async fn call(connector: &dyn DatabaseConnector, name: &str, args: &Value) -> ToolResult {
    debug!(tool = name, "tool call");
    match name {
        "scan_database" => scan_database(connector, args).await,
        "sample_table" => sample_table(connector, args).await,
        "query_database" => query_database(connector, args).await,
        "describe_table" => describe_table(connector, args).await,
        other => ToolResult::error(format!("Unknown tool: {other}")),
    }
}

async fn scan_database(connector: &dyn DatabaseConnector, args: &Value) -> ToolResult {
    let tables = match table_list(args.get("tables")) {
        Ok(tables) => tables,
        Err(msg) => return ToolResult::error(msg),
    };
    match connector.scan(&tables).await {
        Ok(tables) => ToolResult::json(&tables),
        Err(e) => ToolResult::error(format!("Scan failed: {e}")),
    }
}

async fn sample_table(connector: &dyn DatabaseConnector, args: &Value) -> ToolResult {
    let table = match required_str(args, "table") {
        Ok(table) => table,
        Err(msg) => return ToolResult::error(msg),
    };
    let limit = match args.get("limit") {
        None | Some(Value::Null) => DEFAULT_SAMPLE_LIMIT,
        Some(v) => match v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)) {
            Some(limit) => limit,
            None => return ToolResult::error("Invalid limit parameter: expected a number".into()),
        },
    };
    match connector.sample(table, limit).await {
        Ok(rows) => ToolResult::json(&rows),
        Err(e) => ToolResult::error(format!("Sample failed: {e}")),
    }
}

async fn query_database(connector: &dyn DatabaseConnector, args: &Value) -> ToolResult {
    let query = match required_str(args, "query") {
        Ok(query) => query,
        Err(msg) => return ToolResult::error(msg),
    };
    match connector.query(query).await {
        Ok(rows) => ToolResult::json(&rows),
        Err(e) => ToolResult::error(format!("Query failed: {e}")),
    }
}

async fn describe_table(connector: &dyn DatabaseConnector, args: &Value) -> ToolResult {
    let table = match required_str(args, "table") {
        Ok(table) => table,
        Err(msg) => return ToolResult::error(msg),
    };
    match connector.describe_table(table).await {
        Ok(desc) => ToolResult::json(&desc),
        Err(e) => ToolResult::error(format!("Describe failed: {e}")),
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    match args.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(format!("Missing {key} parameter"))
        }
        Some(_) => Err(format!("Invalid {key} parameter: expected a string")),
    }
}

/// Accepts a JSON array of names or a comma-separated string. Non-string
/// array entries and blank names are skipped.
fn table_list(param: Option<&Value>) -> Result<Vec<String>, String> {
    match param {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        Some(Value::String(s)) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        Some(_) => Err("Invalid tables parameter: expected an array or a string".into()),
    }
}
