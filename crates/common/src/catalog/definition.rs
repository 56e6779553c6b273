//! Declarative table, column and view definitions

use serde::{Deserialize, Serialize};

/// Column data type as authored in catalog files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    #[serde(alias = "INTEGER")]
    Int64,
    #[serde(alias = "FLOAT")]
    Float64,
    Numeric,
    #[serde(alias = "BOOLEAN")]
    Bool,
    Timestamp,
    Datetime,
    Date,
    Json,
    Bytes,
}

impl FieldType {
    /// Whether the type can drive time partitioning
    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Timestamp | FieldType::Datetime | FieldType::Date)
    }
}

/// Column mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, field_type: FieldType, mode: FieldMode) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            mode,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionGranularity {
    Hour,
    #[default]
    Day,
    Month,
    Year,
}

/// Time partitioning on a single temporal column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Partitioning {
    pub field: String,
    #[serde(default)]
    pub granularity: PartitionGranularity,
}

/// Desired shape of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<Partitioning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clustering: Vec<String>,
}

impl TableDefinition {
    pub fn new(name: &str, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            columns,
            partitioning: None,
            clustering: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Materialized view over base tables; the query may reference
/// `{meta_dataset}`, `{org_dataset}` and `{org_slug}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub query: String,
}

/// One catalog file as stored on disk
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    pub version: String,
    pub tables: Vec<TableDefinition>,
    #[serde(default)]
    pub views: Vec<ViewDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_parsing_with_aliases() {
        let col: ColumnDefinition =
            serde_json::from_str(r#"{"name":"n","type":"INTEGER","mode":"REQUIRED"}"#).unwrap();
        assert_eq!(col.field_type, FieldType::Int64);
        assert_eq!(col.mode, FieldMode::Required);

        let col: ColumnDefinition = serde_json::from_str(r#"{"name":"f","type":"FLOAT64"}"#).unwrap();
        assert_eq!(col.field_type, FieldType::Float64);
        assert_eq!(col.mode, FieldMode::Nullable);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let parsed = serde_json::from_str::<ColumnDefinition>(r#"{"name":"g","type":"GEOGRAPHY"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_temporal_types() {
        assert!(FieldType::Date.is_temporal());
        assert!(FieldType::Timestamp.is_temporal());
        assert!(!FieldType::String.is_temporal());
    }
}
