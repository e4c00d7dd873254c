//! information_schema queries and normalization of their result shapes.

use crate::schema::models::{Relationship, SchemaCache, SchemaColumn};
use crate::sources::traits::SqlBackend;
use crate::{Error, Result};
use serde_json::Value;

const SCHEMA_KEYS: [&str; 4] = ["table_schema", "table_name", "column_name", "data_type"];
const RELATIONSHIP_KEYS: [&str; 7] = [
    "constraint_name",
    "source_schema",
    "source_table",
    "source_column",
    "target_schema",
    "target_table",
    "target_column",
];

/// Catalog names are spliced into SQL, so only plain identifiers are allowed.
pub fn validate_catalog(catalog: &str) -> Result<()> {
    if catalog.is_empty() {
        return Err(Error::InvalidInput("catalog is empty".to_string()));
    }
    if !catalog
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::InvalidInput(format!(
            "catalog must be a plain identifier: {catalog}"
        )));
    }
    Ok(())
}

fn info_schema(catalog: Option<&str>) -> Result<String> {
    match catalog {
        Some(c) => {
            validate_catalog(c)?;
            Ok(format!("{c}.information_schema"))
        }
        None => Ok("information_schema".to_string()),
    }
}

/// Base-table columns, catalog-qualified when `catalog` is given (Trino).
pub fn tables_query(catalog: Option<&str>) -> Result<String> {
    let is = info_schema(catalog)?;
    Ok(format!(
        "SELECT t.table_schema, t.table_name, c.column_name, c.data_type \
         FROM {is}.tables AS t \
         JOIN {is}.columns AS c \
           ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
         WHERE t.table_schema NOT IN ('information_schema', 'pg_catalog') \
           AND t.table_type = 'BASE TABLE' \
         ORDER BY t.table_schema, t.table_name, c.ordinal_position"
    ))
}

/// Foreign-key column pairs.
pub fn relationships_query(catalog: Option<&str>) -> Result<String> {
    let is = info_schema(catalog)?;
    Ok(format!(
        "SELECT tc.constraint_name, \
                tc.table_schema AS source_schema, tc.table_name AS source_table, \
                kcu.column_name AS source_column, \
                ccu.table_schema AS target_schema, ccu.table_name AS target_table, \
                ccu.column_name AS target_column \
         FROM {is}.table_constraints AS tc \
         JOIN {is}.key_column_usage AS kcu \
           ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
         JOIN {is}.constraint_column_usage AS ccu \
           ON ccu.constraint_name = tc.constraint_name \
         WHERE tc.constraint_type = 'FOREIGN KEY' \
           AND tc.table_schema NOT IN ('information_schema', 'pg_catalog') \
         ORDER BY tc.table_schema, tc.table_name, kcu.ordinal_position"
    ))
}

fn cell(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read `N` cells from a positional row or a keyed object.
fn cells<const N: usize>(row: &Value, keys: &[&str; N]) -> Option<[String; N]> {
    let mut out: [String; N] = std::array::from_fn(|_| String::new());
    match row {
        Value::Array(items) if items.len() >= N => {
            for (slot, item) in out.iter_mut().zip(items.iter()) {
                *slot = cell(item)?;
            }
        }
        Value::Object(map) => {
            for (slot, key) in out.iter_mut().zip(keys.iter()) {
                *slot = cell(map.get(*key)?)?;
            }
        }
        _ => return None,
    }
    Some(out)
}

/// Walk a heterogeneous list of results: `{columns, data}` batches, bare
/// positional rows, or keyed objects. Rows that fit none are dropped.
fn flatten<const N: usize, T>(
    values: &[Value],
    keys: &[&str; N],
    build: impl Fn([String; N]) -> T,
) -> Vec<T> {
    let mut out = Vec::new();
    for v in values {
        if let (Some(Value::Array(data)), true) = (v.get("data"), v.get("columns").is_some()) {
            out.extend(data.iter().filter_map(|row| match row {
                Value::Array(_) => cells(row, keys).map(&build),
                _ => None,
            }));
            continue;
        }
        if let Some(c) = cells(v, keys) {
            out.push(build(c));
        }
    }
    out
}

pub fn flatten_schema_rows(values: &[Value]) -> Vec<SchemaColumn> {
    flatten(values, &SCHEMA_KEYS, |[table_schema, table_name, column_name, data_type]| {
        SchemaColumn {
            table_schema,
            table_name,
            column_name,
            data_type,
        }
    })
}

pub fn flatten_relationship_rows(values: &[Value]) -> Vec<Relationship> {
    flatten(
        values,
        &RELATIONSHIP_KEYS,
        |[
            constraint_name,
            source_schema,
            source_table,
            source_column,
            target_schema,
            target_table,
            target_column,
        ]| Relationship {
            constraint_name,
            source_schema,
            source_table,
            source_column,
            target_schema,
            target_table,
            target_column,
        },
    )
}

/// Introspect a source into a fresh cache entry. Table introspection errors
/// propagate; relationship introspection is best-effort.
#[tracing::instrument(level = "debug", skip_all, fields(source = %backend.kind()))]
pub async fn introspect(backend: &dyn SqlBackend) -> Result<SchemaCache> {
    let tables = backend.fetch_schema().await?;
    let relationships = match backend.fetch_relationships().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "relationship introspection failed; caching without relationships");
            Vec::new()
        }
    };
    Ok(SchemaCache {
        tables,
        relationships,
        cached_at: chrono::Utc::now().timestamp_millis(),
    })
}
