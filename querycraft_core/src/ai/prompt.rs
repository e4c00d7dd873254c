//! Prompt assembly for query generation and refinement.
//!
//! Prompts are plain concatenations of fixed instruction blocks with the
//! connection details, schema rendering and (for refinement) recent history.
//! No token budgeting is applied.

use crate::schema::format::{relationships_block, schema_csv};
use crate::schema::models::{Relationship, SchemaColumn};
use crate::store::models::ConnectionRecord;

pub const BASE_CONTEXT: &str = "You are an AI assistant that specializes in generating highly efficient SQL queries and schema designs.
INSTRUCTIONS:
1. Generate valid SQL queries that precisely match the user's request
2. Use EXACT table and column names as provided in the schema details
3. Pay special attention to singular/plural forms in table names
4. Strictly return ONLY the SQL query and do not add /n or any other formatting characters just the raw sql query.
5. Make sure you give response in one line only.
6. Include appropriate joins when information is needed from multiple tables
7. Use appropriate SQL functions and operators when needed (COUNT, SUM, GROUP BY, etc.)
8. Focus on performance and efficiency in your queries
9. Incorporate query optimization techniques specific to the dialect
10. Do not include any explanation, markdown formatting, or comments in your response
";

const TRINO_CONTEXT: &str = "This is a Trino SQL query. Optimize accordingly:
1. Always use <catalog>.<schema>.tablename syntax when referring to tables
2. Use Trino-specific functions like UNNEST for array operations
3. Always give query in one line only.
4. Leverage Trino's array and map functions for complex data structures
5. Use TABLESAMPLE when working with large datasets that don't require exact results
6. For table definitions, use WITH (partitioned_by = ARRAY['column']) for partitioning
7. Implement proper bucketing with WITH (bucketed_by = ARRAY['column'], bucket_count = N)
8. Use approximate functions (approx_distinct, approx_percentile) for large datasets
9. Leverage GROUPING SETS, CUBE, or ROLLUP for multi-dimensional aggregations";

const SPARK_CONTEXT: &str = "This is a Spark SQL query. Optimize accordingly:
1. Use Spark-specific functions like EXPLODE for array operations
2. Optimize joins with broadcast hints when appropriate: /*+ BROADCAST(table) */
3. For table definitions, use PARTITIONED BY (column) for partitioning
4. Implement proper data clustering with CLUSTERED BY (columns) INTO N BUCKETS
5. Specify STORED AS PARQUET (or other columnar formats) for better performance
6. Use window functions with proper partitioning and ordering
7. Leverage Spark's approximate functions for large datasets
8. Consider data skew and use SKEW('column', 'value') when applicable";

const POSTGRES_CONTEXT: &str = "This is a PostgreSQL query. Optimize accordingly:
1. Use PostgreSQL's rich feature set including CTEs and window functions
2. Leverage PostgreSQL's JSON/JSONB functions for complex data operations
3. Use proper indexing hints when appropriate
4. Implement table partitioning with PARTITION BY RANGE/LIST/HASH
5. Use EXPLAIN ANALYZE to suggest performance optimizations
6. Consider materialized views for complex aggregations
7. Use appropriate PostgreSQL-specific data types (like JSONB, ARRAY, etc.)
8. Leverage Common Table Expressions (CTEs) for complex queries";

pub const OLAP_CONTEXT: &str = "Optimize this schema/query for OLAP (Online Analytical Processing) workloads:
1. Implement star or snowflake schema design with clear fact and dimension tables
2. Use appropriate partitioning strategies based on common query patterns:
   - Date/time-based partitioning for time-series data
   - Geographic partitioning for location-based queries
3. Implement columnar storage formats (Parquet, ORC) for better compression and query performance
4. Use proper bucketing/clustering on high-cardinality join columns
5. Pre-aggregate common metrics at various granularities
6. Optimize sort orders within partitions for better data locality
7. Denormalize where appropriate to reduce expensive joins
8. Consider materialized views for frequently accessed aggregations
9. Use proper data types to minimize storage (e.g., INT vs BIGINT when appropriate)
10. Implement appropriate indexing strategies for dimension tables";

pub const VIEWER_CONTEXT: &str = "IMPORTANT SECURITY RESTRICTION:
This user has VIEW-ONLY permissions.
DO NOT generate any queries that modify the database (INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, etc.).
Generate only SELECT statements that read data.";

const PERFORMANCE_CONTEXT: &str = "PERFORMANCE AND STORAGE OPTIMIZATION:
1. For all queries, focus on:
   - Minimizing expensive operations (e.g., avoid CROSS JOIN, inefficient subqueries)
   - Pushing filters down as close to data sources as possible
   - Using appropriate join algorithms based on table sizes
   - Avoiding unnecessary columns in SELECT statements
2. For schema design:
   - Choose appropriate primary and secondary keys
   - Implement proper partitioning strategies for large tables
   - Use columnar storage formats when supported
   - Consider data access patterns when designing tables
   - Choose appropriate data types to minimize storage requirements
   - Implement bucketing/clustering for frequently joined columns";

const REFINE_INSTRUCTIONS: &str = "You are an AI assistant that specializes in refining and improving SQL queries.
INSTRUCTIONS:
1. You are given an original SQL query and a request to refine it.
2. Modify the query to meet the refinement request while maintaining correctness.
3. Use EXACT table and column names if schema details are provided below.
4. Consider the recent query history and feedback provided below for context.
5. Focus on performance and efficiency in your refined query.
6. Do not include any explanation, markdown formatting, or comments in your response.
7. Return ONLY the refined SQL query.";

const TRINO_PRIORITIES: &str = "TRINO PERFORMANCE OPTIMIZATION PRIORITIES:
  1. ANALYSIS TIME REDUCTION (Most Critical - currently ~55% of query time):
     - Always use consistent and fully qualified object naming (<catalog>.<schema>.<table>)
     - Minimize complex expressions and unnecessary type conversions
     - Keep query structure as simple as possible while meeting requirements

  2. FINISHING TIME REDUCTION (Second Priority - currently ~26% of query time):
     - Return only necessary columns, never use SELECT *
     - Add appropriate LIMIT clauses for exploratory queries
     - Minimize result set size through precise filtering

  3. JOIN OPTIMIZATION (Critical for resource usage):
     - Order joins from largest to smallest tables when possible
     - Apply filters BEFORE joins whenever possible
     - Position smaller tables on the build side (right side) of joins
     - Consider broadcast vs. partitioned join strategies based on table sizes

  4. RESOURCE USAGE OPTIMIZATION:
     - Apply partition pruning through appropriate WHERE clauses
     - Use approximation functions when exact results aren't required
     - Minimize complex string operations which are CPU-intensive";

pub const NO_HISTORY: &str = "No recent query history available for this connection.";
pub const NO_MODIFICATIONS: &str = "No prior modifications context available.";

/// Instruction block for a dialect key. `postgre` and `postgresql` are
/// accepted for `postgres`; unknown keys contribute nothing.
pub fn dialect_context(dialect: &str) -> Option<&'static str> {
    match dialect.trim().to_ascii_lowercase().as_str() {
        "trino" => Some(TRINO_CONTEXT),
        "spark" => Some(SPARK_CONTEXT),
        "postgres" | "postgre" | "postgresql" => Some(POSTGRES_CONTEXT),
        _ => None,
    }
}

/// Inputs for the generation prompt.
#[derive(Debug, Clone, Copy)]
pub struct GeneratePrompt<'a> {
    pub dialect: &'a str,
    pub optimize_for_olap: bool,
    pub viewer: bool,
    pub connection: &'a ConnectionRecord,
    pub tables: &'a [SchemaColumn],
    pub relationships: &'a [Relationship],
}

impl GeneratePrompt<'_> {
    pub fn build(&self) -> String {
        let mut out = String::from(BASE_CONTEXT);
        if let Some(block) = dialect_context(self.dialect) {
            out.push_str("\n\n");
            out.push_str(block);
        }
        if self.optimize_for_olap {
            out.push_str("\n\n");
            out.push_str(OLAP_CONTEXT);
        }
        if self.viewer {
            out.push_str("\n\n");
            out.push_str(VIEWER_CONTEXT);
        }
        out.push_str("\n\n");
        out.push_str(PERFORMANCE_CONTEXT);

        out.push_str(&format!(
            "\n\nCONNECTION DETAILS:\n- Catalog: {}\n- Schema: {}\n- Source Type: {}\n- Tables and Columns: \ntable_schema,table_name,column_name,data_type \n{}",
            self.connection.catalog,
            self.connection.schema,
            self.connection.source,
            schema_csv(self.tables)
        ));
        if !self.relationships.is_empty() {
            out.push_str("\n- Foreign Keys:\n");
            out.push_str(&relationships_block(self.relationships));
        }

        out.push_str(&format!(
            "\n\nEVALUATION CRITERIA:\n1. Accuracy: Generated statements must be syntactically correct and semantically appropriate\n2. Dialect-specific features: Use specialized functions for this dialect ({})\n3. Performance: Optimize for execution speed and resource efficiency\n4. Storage efficiency: Consider data organization and compression when creating tables",
            self.dialect
        ));
        out
    }
}

/// Inputs for the refinement prompt. Schema and history arrive pre-rendered
/// so the caller decides how to degrade when either is unavailable.
#[derive(Debug, Clone, Copy)]
pub struct RefinePrompt<'a> {
    pub connection: &'a ConnectionRecord,
    pub schema_context: &'a str,
    pub history_context: &'a str,
    pub original_query: &'a str,
    pub viewer: bool,
    pub refinement_request: &'a str,
    pub modification_context: Option<&'a str>,
}

impl RefinePrompt<'_> {
    pub fn build(&self) -> String {
        let viewer = if self.viewer { VIEWER_CONTEXT } else { "" };
        format!(
            "{REFINE_INSTRUCTIONS}\n\n{TRINO_PRIORITIES}\n\n  CONNECTION DETAILS:\n  - Catalog: {catalog}\n  - Schema: {schema}\n  - Source Type: {source}\n\nSCHEMA DETAILS:\n{schema_context}\n\nRECENT QUERY HISTORY & FEEDBACK (Last 5 for this connection):\n{history}\n\nORIGINAL QUERY TO REFINE:\n{original}\n\n{viewer}\n\nUSER'S REFINEMENT REQUEST:\n{request}\n\nCONTEXT ABOUT USER MODIFICATIONS TO PREVIOUS QUERY (if applicable):\n{modifications}\n\nREFINED QUERY OUTPUT (Return ONLY the SQL):",
            catalog = self.connection.catalog,
            schema = self.connection.schema,
            source = self.connection.source,
            schema_context = self.schema_context,
            history = self.history_context,
            original = self.original_query,
            request = self.refinement_request,
            modifications = self.modification_context.unwrap_or(NO_MODIFICATIONS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::models::SourceKind;
    use chrono::Utc;
    use serde_json::json;

    fn connection() -> ConnectionRecord {
        let now = Utc::now();
        ConnectionRecord {
            id: crate::ConnectionId::new(),
            name: None,
            project_id: crate::ProjectId::new(),
            server: "http://trino:8080".to_string(),
            catalog: "hive".to_string(),
            schema: "web".to_string(),
            source: SourceKind::Trino,
            auth: json!({}),
            extra_headers: json!({}),
            ssl: json!({}),
            extra_credential: json!({}),
            session: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    fn tables() -> Vec<SchemaColumn> {
        vec![SchemaColumn {
            table_schema: "web".to_string(),
            table_name: "users".to_string(),
            column_name: "id".to_string(),
            data_type: "bigint".to_string(),
        }]
    }

    #[test]
    fn generate_prompt_orders_blocks() {
        let conn = connection();
        let tables = tables();
        let prompt = GeneratePrompt {
            dialect: "trino",
            optimize_for_olap: true,
            viewer: true,
            connection: &conn,
            tables: &tables,
            relationships: &[],
        }
        .build();

        let base = prompt.find("INSTRUCTIONS:").unwrap();
        let dialect = prompt.find("This is a Trino SQL query").unwrap();
        let olap = prompt.find("OLAP (Online Analytical Processing)").unwrap();
        let viewer = prompt.find("VIEW-ONLY").unwrap();
        let perf = prompt.find("PERFORMANCE AND STORAGE OPTIMIZATION").unwrap();
        let conn_at = prompt.find("CONNECTION DETAILS").unwrap();
        assert!(base < dialect && dialect < olap && olap < viewer && viewer < perf && perf < conn_at);
        assert!(prompt.contains("- Catalog: hive"));
        assert!(prompt.contains("- Source Type: trino"));
        assert!(prompt.contains("\nweb,users,id,bigint"));
        assert!(prompt.contains("Use specialized functions for this dialect (trino)"));
        assert!(!prompt.contains("Foreign Keys"));
    }

    #[test]
    fn dialect_aliases_and_unknown_keys() {
        assert_eq!(dialect_context("postgre"), dialect_context("postgres"));
        assert_eq!(dialect_context("PostgreSQL"), dialect_context("postgres"));
        assert!(dialect_context("mysql").is_none());

        let conn = connection();
        let prompt = GeneratePrompt {
            dialect: "mysql",
            optimize_for_olap: false,
            viewer: false,
            connection: &conn,
            tables: &[],
            relationships: &[],
        }
        .build();
        assert!(!prompt.contains("Optimize accordingly"));
        assert!(!prompt.contains("VIEW-ONLY"));
        assert!(!prompt.contains("OLAP"));
    }

    #[test]
    fn refine_prompt_embeds_context() {
        let conn = connection();
        let prompt = RefinePrompt {
            connection: &conn,
            schema_context: "Table: web.users\n  Columns: id (bigint)",
            history_context: NO_HISTORY,
            original_query: "SELECT * FROM hive.web.users",
            viewer: false,
            refinement_request: "only ids",
            modification_context: None,
        }
        .build();
        assert!(prompt.starts_with("You are an AI assistant that specializes in refining"));
        assert!(prompt.contains("TRINO PERFORMANCE OPTIMIZATION PRIORITIES"));
        assert!(prompt.contains("ORIGINAL QUERY TO REFINE:\nSELECT * FROM hive.web.users"));
        assert!(prompt.contains("USER'S REFINEMENT REQUEST:\nonly ids"));
        assert!(prompt.contains(NO_MODIFICATIONS));
        assert!(prompt.contains(NO_HISTORY));
        assert!(!prompt.contains("VIEW-ONLY"));
        assert!(prompt.ends_with("REFINED QUERY OUTPUT (Return ONLY the SQL):"));
    }
}
