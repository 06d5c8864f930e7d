//! Backend-agnostic schema model returned by every connector.
//!
//! These are read-only snapshots: each `scan` / `describe_table` call builds
//! them fresh from the catalog and nothing here is cached.

use serde::{Deserialize, Serialize};

use crate::value::Row;

/// A column as reported by the backend catalog.
///
/// `data_type` is the backend-native type name and is not normalized across
/// dialects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
}

/// A base table and its columns in ordinal order.
///
/// Postgres names are schema-qualified (`"public"."users"`); MySQL and SQLite
/// names are bare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

/// A secondary index. Columns are listed in their position within the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl Index {
    /// Build an index from its resolved key columns, or `None` when there
    /// are none.
    pub fn from_resolved(name: String, columns: Vec<String>, unique: bool) -> Option<Self> {
        if columns.is_empty() {
            return None;
        }
        Some(Self {
            name,
            columns,
            unique,
        })
    }
}

/// Detailed snapshot of a single table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<Column>,
    pub row_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<Index>>,
}

/// `Some(items)` unless the list is empty.
pub(crate) fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_without_columns_is_dropped() {
        assert!(Index::from_resolved("idx_expr".to_string(), vec![], false).is_none());
    }

    #[test]
    fn test_index_keeps_column_order() {
        let idx = Index::from_resolved(
            "idx_name_email".to_string(),
            vec!["name".to_string(), "email".to_string()],
            true,
        )
        .unwrap();
        assert_eq!(idx.columns, vec!["name", "email"]);
        assert!(idx.unique);
    }

    #[test]
    fn test_column_serializes_type_field() {
        let col = Column {
            name: "id".to_string(),
            data_type: "integer".to_string(),
            nullable: false,
        };
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "id", "type": "integer", "nullable": false})
        );
    }

    #[test]
    fn test_description_omits_absent_parts() {
        let desc = TableDescription {
            name: "users".to_string(),
            columns: vec![],
            row_count: 3,
            sample_data: None,
            primary_keys: Some(vec!["id".to_string()]),
            indexes: None,
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert!(json.get("sample_data").is_none());
        assert!(json.get("indexes").is_none());
        assert_eq!(json["primary_keys"], serde_json::json!(["id"]));
        assert_eq!(json["row_count"], 3);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty::<String>(vec![]), None);
        assert_eq!(non_empty(vec![1]), Some(vec![1]));
    }
}
