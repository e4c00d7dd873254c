use crate::ai::diff::modification_context;
use crate::ai::llm::TextGenerator;
use crate::ai::prompt::{GeneratePrompt, NO_HISTORY, RefinePrompt};
use crate::ai::sanitize::sanitize_sql_query;
use crate::models::{ConnectionId, ExecutedQueryId, MemberRole, UserId};
use crate::queries::executor::{ExecutionOutcome, QueryExecutor};
use crate::queries::history::{REFINE_HISTORY_LIMIT, format_history};
use crate::queries::{ConnectionAccess, resolve_access};
use crate::schema::cache::SchemaCacheStore;
use crate::schema::format::schema_grouped;
use crate::schema::introspect::introspect;
use crate::schema::models::{CacheStats, SchemaCache};
use crate::sources::traits::BackendFactory;
use crate::store::models::{ConnectionRecord, ExecutedQueryRecord, QueryStatus};
use crate::store::traits::AppDb;
use crate::{Error, Result};
use std::sync::Arc;

pub const DEFAULT_DIALECT: &str = "trino";
const NO_TABLES_FOUND: &str = "Schema fetched, but no tables/columns found.";

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub connection_id: ConnectionId,
    pub dialect: String,
    pub optimize_for_olap: bool,
}

#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub query: String,
    pub connection_id: ConnectionId,
    pub executed_query_id: ExecutedQueryId,
}

#[derive(Debug, Clone)]
pub struct RefineRequest {
    pub original_query: String,
    /// The statement the user actually ran, when it differs from the original.
    pub executed_query: Option<String>,
    pub refinement_request: String,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone)]
pub struct RefinedQuery {
    pub original_query: String,
    pub refined_query: String,
    pub connection_id: ConnectionId,
    /// The full prompt sent to the model.
    pub generate_context: String,
    pub executed_query_id: ExecutedQueryId,
}

/// Natural-language query flows over one connection: schema lookup, prompt
/// assembly, model call, sanitization and auditing.
#[derive(Clone)]
pub struct QueryAssistant {
    db: Arc<dyn AppDb>,
    backends: Arc<dyn BackendFactory>,
    llm: Arc<dyn TextGenerator>,
    schemas: SchemaCacheStore,
    executor: QueryExecutor,
}

fn require_text(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{what} is required")));
    }
    Ok(())
}

impl QueryAssistant {
    pub fn new(
        db: Arc<dyn AppDb>,
        backends: Arc<dyn BackendFactory>,
        llm: Arc<dyn TextGenerator>,
        schemas: SchemaCacheStore,
    ) -> Self {
        let executor = QueryExecutor::new(db.clone(), backends.clone());
        Self {
            db,
            backends,
            llm,
            schemas,
            executor,
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Cached schema for the connection, or a fresh introspection that is
    /// not written back.
    async fn schema_for(&self, connection: &ConnectionRecord) -> Result<SchemaCache> {
        if let Some(entry) = self.schemas.get(connection.id).await {
            return Ok(entry);
        }
        tracing::debug!(connection_id = %connection.id, "schema cache miss; introspecting");
        let backend = self.backends.open(connection)?;
        introspect(backend.as_ref()).await
    }

    /// Grouped schema text for the refine prompt. Never fails: fetch errors
    /// are rendered into the text.
    async fn refine_schema_context(&self, connection: &ConnectionRecord) -> String {
        if let Some(entry) = self.schemas.get(connection.id).await {
            if !entry.tables.is_empty() {
                return schema_grouped(&entry.tables);
            }
        }
        let fetched = match self.backends.open(connection) {
            Ok(backend) => backend.fetch_schema().await,
            Err(e) => Err(e),
        };
        match fetched {
            Ok(tables) if tables.is_empty() => NO_TABLES_FOUND.to_string(),
            Ok(tables) => schema_grouped(&tables),
            Err(e) => {
                tracing::warn!(connection_id = %connection.id, error = %e, "schema fetch for refine failed");
                format!("Failed to fetch schema information. Error: {e}")
            }
        }
    }

    async fn history_context(&self, connection_id: ConnectionId) -> String {
        match self
            .db
            .recent_queries_for_connection(connection_id, REFINE_HISTORY_LIMIT)
            .await
        {
            Ok(entries) => format_history(&entries),
            Err(e) => {
                tracing::warn!(%connection_id, error = %e, "history lookup for refine failed");
                NO_HISTORY.to_string()
            }
        }
    }

    async fn audit_model_output(
        &self,
        query: &str,
        user_id: UserId,
        connection: &ConnectionRecord,
        status: QueryStatus,
    ) -> Result<ExecutedQueryId> {
        let record =
            ExecutedQueryRecord::model_output(query.to_string(), user_id, connection, status);
        self.db.append_executed_query(&record).await?;
        Ok(record.id)
    }

    #[tracing::instrument(level = "info", skip(self, req), fields(connection_id = %req.connection_id, dialect = %req.dialect))]
    pub async fn generate(&self, user_id: UserId, req: &GenerateRequest) -> Result<GeneratedQuery> {
        require_text(&req.prompt, "prompt")?;
        let access = resolve_access(self.db.as_ref(), user_id, req.connection_id).await?;
        self.generate_for(user_id, &access, req).await
    }

    async fn generate_for(
        &self,
        user_id: UserId,
        access: &ConnectionAccess,
        req: &GenerateRequest,
    ) -> Result<GeneratedQuery> {
        let connection = &access.connection;
        let schema = self.schema_for(connection).await?;
        let context = GeneratePrompt {
            dialect: &req.dialect,
            optimize_for_olap: req.optimize_for_olap,
            viewer: access.membership.role == MemberRole::Viewer,
            connection,
            tables: &schema.tables,
            relationships: &schema.relationships,
        }
        .build();

        let raw = self.llm.generate(&[context, req.prompt.clone()]).await?;
        let query = sanitize_sql_query(&raw);
        if query.is_empty() {
            return Err(Error::BackendMessage(
                "model returned an empty query".to_string(),
            ));
        }
        let executed_query_id = self
            .audit_model_output(&query, user_id, connection, QueryStatus::Generated)
            .await?;
        tracing::info!(%executed_query_id, "query generated");
        Ok(GeneratedQuery {
            query,
            connection_id: connection.id,
            executed_query_id,
        })
    }

    /// Generate, then run the result through the executor (viewer guard included).
    #[tracing::instrument(level = "info", skip(self, req), fields(connection_id = %req.connection_id))]
    pub async fn generate_and_execute(
        &self,
        user_id: UserId,
        req: &GenerateRequest,
    ) -> Result<(GeneratedQuery, ExecutionOutcome)> {
        require_text(&req.prompt, "prompt")?;
        let access = resolve_access(self.db.as_ref(), user_id, req.connection_id).await?;
        let generated = self.generate_for(user_id, &access, req).await?;
        let outcome = self
            .executor
            .execute(
                user_id,
                access.membership.role,
                &access.connection,
                &generated.query,
            )
            .await?;
        Ok((generated, outcome))
    }

    #[tracing::instrument(level = "info", skip(self, req), fields(connection_id = %req.connection_id))]
    pub async fn refine(&self, user_id: UserId, req: &RefineRequest) -> Result<RefinedQuery> {
        require_text(&req.original_query, "originalQuery")?;
        require_text(&req.refinement_request, "refinementRequest")?;
        let access = resolve_access(self.db.as_ref(), user_id, req.connection_id).await?;
        let connection = &access.connection;

        let schema_context = self.refine_schema_context(connection).await;
        let history_context = self.history_context(connection.id).await;
        let modifications = modification_context(&req.original_query, req.executed_query.as_deref());

        let prompt = RefinePrompt {
            connection,
            schema_context: &schema_context,
            history_context: &history_context,
            original_query: &req.original_query,
            viewer: access.membership.role == MemberRole::Viewer,
            refinement_request: &req.refinement_request,
            modification_context: modifications.as_deref(),
        }
        .build();

        let raw = self.llm.generate(std::slice::from_ref(&prompt)).await?;
        let refined_query = sanitize_sql_query(&raw);
        let executed_query_id = self
            .audit_model_output(&refined_query, user_id, connection, QueryStatus::Refined)
            .await?;
        Ok(RefinedQuery {
            original_query: req.original_query.clone(),
            refined_query,
            connection_id: connection.id,
            generate_context: prompt,
            executed_query_id,
        })
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn cache_schema(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<CacheStats> {
        let access = resolve_access(self.db.as_ref(), user_id, connection_id).await?;
        let backend = self.backends.open(&access.connection)?;
        self.schemas
            .cache_schema(backend.as_ref(), connection_id)
            .await
    }

    /// Returns whether an entry existed.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn invalidate_schema(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<bool> {
        resolve_access(self.db.as_ref(), user_id, connection_id).await?;
        self.schemas.invalidate(connection_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MembershipId, OrgId, ProjectId};
    use crate::queries::executor::tests::{ScriptedFactory, trino_connection};
    use crate::schema::models::SchemaColumn;
    use crate::store::memory::{InMemoryAppDb, InMemoryCache};
    use crate::store::models::{MembershipRecord, OrganizationRecord, ProjectRecord};
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    /// Records every prompt and answers with a fenced query.
    #[derive(Default)]
    struct EchoLlm {
        prompts: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl TextGenerator for EchoLlm {
        async fn generate(&self, parts: &[String]) -> Result<String> {
            self.prompts.lock().await.push(parts.to_vec());
            Ok("```sql\nSELECT id\nFROM hive.web.users\n```".to_string())
        }
    }

    struct Fixture {
        db: Arc<InMemoryAppDb>,
        llm: Arc<EchoLlm>,
        assistant: QueryAssistant,
        user_id: UserId,
        connection_id: ConnectionId,
    }

    fn users_table() -> Vec<SchemaColumn> {
        vec![SchemaColumn {
            table_schema: "web".to_string(),
            table_name: "users".to_string(),
            column_name: "id".to_string(),
            data_type: "bigint".to_string(),
        }]
    }

    async fn fixture(role: Option<MemberRole>, fail_with: Option<&str>) -> Fixture {
        let db = Arc::new(InMemoryAppDb::new());
        let now = Utc::now();
        let org = OrganizationRecord {
            id: OrgId::new(),
            name: "Acme".to_string(),
            email: None,
            created_at: now,
            deleted_at: None,
        };
        db.create_org(&org).await.unwrap();
        let user_id = UserId::new();
        if let Some(role) = role {
            db.upsert_membership(&MembershipRecord {
                id: MembershipId::new(),
                user_id,
                organization_id: org.id,
                role,
                joined_at: now,
                deleted_at: None,
            })
            .await
            .unwrap();
        }
        let project = ProjectRecord {
            id: ProjectId::new(),
            name: "analytics".to_string(),
            description: None,
            user_id,
            organization_id: org.id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let connection = trino_connection(project.id);
        db.create_project_with_connection(&project, &connection)
            .await
            .unwrap();

        let llm = Arc::new(EchoLlm::default());
        let assistant = QueryAssistant::new(
            db.clone(),
            Arc::new(ScriptedFactory {
                fail_with: fail_with.map(str::to_string),
                tables: users_table(),
            }),
            llm.clone(),
            SchemaCacheStore::new(Arc::new(InMemoryCache::new()), None),
        );
        Fixture {
            db,
            llm,
            assistant,
            user_id,
            connection_id: connection.id,
        }
    }

    fn generate_request(fx: &Fixture) -> GenerateRequest {
        GenerateRequest {
            prompt: "all user ids".to_string(),
            connection_id: fx.connection_id,
            dialect: DEFAULT_DIALECT.to_string(),
            optimize_for_olap: false,
        }
    }

    #[tokio::test]
    async fn generate_sanitizes_and_audits() {
        let fx = fixture(Some(MemberRole::Member), None).await;
        let out = fx
            .assistant
            .generate(fx.user_id, &generate_request(&fx))
            .await
            .unwrap();
        assert_eq!(out.query, "SELECT id FROM hive.web.users");

        let row = fx
            .db
            .get_executed_query(out.executed_query_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, QueryStatus::Generated);

        let prompts = fx.llm.prompts.lock().await;
        assert!(prompts[0][0].contains("web,users,id,bigint"));
        assert_eq!(prompts[0][1], "all user ids");
    }

    #[tokio::test]
    async fn generate_requires_membership() {
        let fx = fixture(None, None).await;
        let err = fx
            .assistant
            .generate(fx.user_id, &generate_request(&fx))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_any_write() {
        let fx = fixture(Some(MemberRole::Member), None).await;
        let mut req = generate_request(&fx);
        req.prompt = "  ".to_string();
        let err = fx.assistant.generate(fx.user_id, &req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let recent = fx
            .db
            .recent_queries_for_connection(fx.connection_id, 5)
            .await
            .unwrap();
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn viewer_prompt_carries_restriction() {
        let fx = fixture(Some(MemberRole::Viewer), None).await;
        fx.assistant
            .generate(fx.user_id, &generate_request(&fx))
            .await
            .unwrap();
        let prompts = fx.llm.prompts.lock().await;
        assert!(prompts[0][0].contains("VIEW-ONLY"));
    }

    #[tokio::test]
    async fn refine_degrades_when_schema_fetch_fails() {
        let fx = fixture(Some(MemberRole::Admin), Some("connection refused")).await;
        let out = fx
            .assistant
            .refine(
                fx.user_id,
                &RefineRequest {
                    original_query: "SELECT * FROM users".to_string(),
                    executed_query: Some("SELECT id FROM users".to_string()),
                    refinement_request: "add a limit".to_string(),
                    connection_id: fx.connection_id,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.refined_query, "SELECT id FROM hive.web.users");
        assert!(out
            .generate_context
            .contains("Failed to fetch schema information. Error:"));
        assert!(out.generate_context.contains("connection refused"));
        assert!(out.generate_context.contains("[Removed:") || out.generate_context.contains("[Added:"));
        assert!(out.generate_context.contains(NO_HISTORY));
    }

    #[tokio::test]
    async fn cache_schema_then_invalidate() {
        let fx = fixture(Some(MemberRole::Member), None).await;
        let stats = fx
            .assistant
            .cache_schema(fx.user_id, fx.connection_id)
            .await
            .unwrap();
        assert_eq!(stats.table_count, 1);
        assert!(fx
            .assistant
            .invalidate_schema(fx.user_id, fx.connection_id)
            .await
            .unwrap());
        assert!(!fx
            .assistant
            .invalidate_schema(fx.user_id, fx.connection_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn generate_uses_cached_schema_without_introspecting() {
        let fx = fixture(Some(MemberRole::Member), Some("connection refused")).await;

        // Nothing cached and the source is down: generation has no schema.
        let err = fx
            .assistant
            .generate(fx.user_id, &generate_request(&fx))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"), "{err}");

        let cached = SchemaCache {
            tables: vec![SchemaColumn {
                table_schema: "sales".to_string(),
                table_name: "orders".to_string(),
                column_name: "total".to_string(),
                data_type: "decimal(12,2)".to_string(),
            }],
            relationships: Vec::new(),
            cached_at: Utc::now().timestamp_millis(),
        };
        fx.assistant
            .schemas
            .put(fx.connection_id, &cached)
            .await
            .unwrap();

        let out = fx
            .assistant
            .generate(fx.user_id, &generate_request(&fx))
            .await
            .unwrap();
        assert_eq!(out.query, "SELECT id FROM hive.web.users");

        let prompts = fx.llm.prompts.lock().await;
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0][0].contains("sales,orders,total,decimal(12,2)"));
        assert!(!prompts[0][0].contains("web,users,id,bigint"));
    }

    #[tokio::test]
    async fn generate_and_execute_records_both_rows() {
        let fx = fixture(Some(MemberRole::Member), None).await;
        let (generated, outcome) = fx
            .assistant
            .generate_and_execute(fx.user_id, &generate_request(&fx))
            .await
            .unwrap();
        assert!(outcome.succeeded());
        assert_ne!(generated.executed_query_id, outcome.executed_query_id);
        let recent = fx
            .db
            .recent_queries_for_connection(fx.connection_id, 5)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }
}
