use serde::{Deserialize, Serialize};

/// One column of a base table, as reported by `information_schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub table_schema: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
}

/// One foreign-key column pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub constraint_name: String,
    pub source_schema: String,
    pub source_table: String,
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
}

/// Cached schema for a connection, stored whole under `schema:<connectionId>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaCache {
    pub tables: Vec<SchemaColumn>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Epoch milliseconds.
    pub cached_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub table_count: usize,
    pub relationship_count: usize,
    pub cached_at: i64,
}

impl SchemaCache {
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            table_count: self.tables.len(),
            relationship_count: self.relationships.len(),
            cached_at: self.cached_at,
        }
    }
}
