//! Text renderings of a schema for prompts.

use crate::schema::models::{Relationship, SchemaColumn};

/// One `table_schema,table_name,column_name,data_type` line per column.
pub fn schema_csv(tables: &[SchemaColumn]) -> String {
    tables
        .iter()
        .map(|c| {
            format!(
                "{},{},{},{}",
                c.table_schema, c.table_name, c.column_name, c.data_type
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Columns grouped per table, in first-seen table order:
///
/// ```text
/// Table: web.users
///   Columns: id (bigint), email (varchar)
/// ```
pub fn schema_grouped(tables: &[SchemaColumn]) -> String {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for c in tables {
        let name = format!("{}.{}", c.table_schema, c.table_name);
        let col = format!("{} ({})", c.column_name, c.data_type);
        match groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, cols)) => cols.push(col),
            None => groups.push((name, vec![col])),
        }
    }
    groups
        .into_iter()
        .map(|(name, cols)| format!("Table: {name}\n  Columns: {}", cols.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `- schema.table.column -> schema.table.column` per foreign key, or empty.
pub fn relationships_block(relationships: &[Relationship]) -> String {
    relationships
        .iter()
        .map(|r| {
            format!(
                "- {}.{}.{} -> {}.{}.{}",
                r.source_schema,
                r.source_table,
                r.source_column,
                r.target_schema,
                r.target_table,
                r.target_column
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(s: &str, t: &str, c: &str, ty: &str) -> SchemaColumn {
        SchemaColumn {
            table_schema: s.to_string(),
            table_name: t.to_string(),
            column_name: c.to_string(),
            data_type: ty.to_string(),
        }
    }

    #[test]
    fn renders_csv_and_grouped() {
        let tables = vec![
            col("web", "users", "id", "bigint"),
            col("web", "orders", "id", "bigint"),
            col("web", "users", "email", "varchar"),
        ];
        assert_eq!(
            schema_csv(&tables),
            "web,users,id,bigint\nweb,orders,id,bigint\nweb,users,email,varchar"
        );
        assert_eq!(
            schema_grouped(&tables),
            "Table: web.users\n  Columns: id (bigint), email (varchar)\nTable: web.orders\n  Columns: id (bigint)"
        );
        assert_eq!(schema_grouped(&[]), "");
    }
}
