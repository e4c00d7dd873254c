use crate::config::PostgresConfig;
use crate::models::{ConnectionId, ExecutedQueryId, MemberRole, OrgId, ProjectId, UserId};
use crate::sources::models::{QueryTimings, SourceKind};
use crate::store::models::{
    ConnectionRecord, ConnectionSummary, ExecutedQueryRecord, ExecutedQueryView, FeedbackRecord,
    HistoryEntry, MemberEntry, MembershipRecord, OrganizationRecord, OrganizationWithProjects,
    ProjectRecord, QueryStatus, UserRecord, UserSummary,
};
use crate::store::traits::AppDb;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

const MIGRATION_0001: &str = include_str!("../../migrations/0001_init.sql");

const USER_COLUMNS: &str =
    "id, name, email, password_hash, organization_id, created_at, deleted_at";
const PROJECT_COLUMNS: &str =
    "id, name, description, user_id, organization_id, created_at, updated_at, deleted_at";
const CONNECTION_COLUMNS: &str = "id, name, project_id, server, catalog, schema, source, auth, \
     extra_headers, ssl, extra_credential, session, created_at, updated_at";
const EXECUTED_COLUMNS: &str = "id, query, user_id, project_id, connection_id, status, duration, \
     error, result_size, cpu_time, elapsed_time, wall_time, queued_time, processed_rows, \
     processed_bytes, executed_at";

#[derive(Clone)]
pub struct PostgresAppDb {
    pool: PgPool,
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| Error::backend(name.to_string(), e))
}

impl PostgresAppDb {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect(&cfg.url)
            .await
            .map_err(|e| Error::backend("connect postgres", e))?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema migration. Idempotent.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_0001)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("apply migrations", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("postgres ping", e))?;
        Ok(())
    }

    fn user_from_row(row: &PgRow) -> Result<UserRecord> {
        Ok(UserRecord {
            id: col(row, "id")?,
            name: col(row, "name")?,
            email: col(row, "email")?,
            password_hash: col(row, "password_hash")?,
            organization_id: col(row, "organization_id")?,
            created_at: col(row, "created_at")?,
            deleted_at: col(row, "deleted_at")?,
        })
    }

    fn org_from_row(row: &PgRow) -> Result<OrganizationRecord> {
        Ok(OrganizationRecord {
            id: col(row, "id")?,
            name: col(row, "name")?,
            email: col(row, "email")?,
            created_at: col(row, "created_at")?,
            deleted_at: col(row, "deleted_at")?,
        })
    }

    fn membership_from_row(row: &PgRow) -> Result<MembershipRecord> {
        let role_str: String = col(row, "role")?;
        let role = MemberRole::parse_str(&role_str)
            .ok_or_else(|| Error::BackendMessage(format!("invalid member role in db: {role_str}")))?;
        Ok(MembershipRecord {
            id: col(row, "id")?,
            user_id: col(row, "user_id")?,
            organization_id: col(row, "organization_id")?,
            role,
            joined_at: col(row, "joined_at")?,
            deleted_at: col(row, "deleted_at")?,
        })
    }

    fn project_from_row(row: &PgRow) -> Result<ProjectRecord> {
        Ok(ProjectRecord {
            id: col(row, "id")?,
            name: col(row, "name")?,
            description: col(row, "description")?,
            user_id: col(row, "user_id")?,
            organization_id: col(row, "organization_id")?,
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
            deleted_at: col(row, "deleted_at")?,
        })
    }

    fn connection_from_row(row: &PgRow) -> Result<ConnectionRecord> {
        let source_str: String = col(row, "source")?;
        let source = SourceKind::parse(&source_str)
            .map_err(|_| Error::BackendMessage(format!("invalid source in db: {source_str}")))?;
        Ok(ConnectionRecord {
            id: col(row, "id")?,
            name: col(row, "name")?,
            project_id: col(row, "project_id")?,
            server: col(row, "server")?,
            catalog: col(row, "catalog")?,
            schema: col(row, "schema")?,
            source,
            auth: col(row, "auth")?,
            extra_headers: col(row, "extra_headers")?,
            ssl: col(row, "ssl")?,
            extra_credential: col(row, "extra_credential")?,
            session: col(row, "session")?,
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
        })
    }

    fn executed_from_row(row: &PgRow) -> Result<ExecutedQueryRecord> {
        let status_str: String = col(row, "status")?;
        let status = QueryStatus::parse_str(&status_str).ok_or_else(|| {
            Error::BackendMessage(format!("invalid query status in db: {status_str}"))
        })?;
        Ok(ExecutedQueryRecord {
            id: col(row, "id")?,
            query: col(row, "query")?,
            user_id: col(row, "user_id")?,
            project_id: col(row, "project_id")?,
            connection_id: col(row, "connection_id")?,
            status,
            duration: col(row, "duration")?,
            error: col(row, "error")?,
            result_size: col(row, "result_size")?,
            timings: QueryTimings {
                cpu_time: col(row, "cpu_time")?,
                elapsed_time: col(row, "elapsed_time")?,
                wall_time: col(row, "wall_time")?,
                queued_time: col(row, "queued_time")?,
                processed_rows: col(row, "processed_rows")?,
                processed_bytes: col(row, "processed_bytes")?,
            },
            executed_at: col(row, "executed_at")?,
        })
    }

    fn feedback_from_row(row: &PgRow) -> Result<FeedbackRecord> {
        Ok(FeedbackRecord {
            id: col(row, "id")?,
            executed_query_id: col(row, "executed_query_id")?,
            user_id: col(row, "user_id")?,
            rating: col(row, "rating")?,
            text: col(row, "text")?,
            raw_query: col(row, "raw_query")?,
            created_at: col(row, "created_at")?,
        })
    }

    /// Feedback rows for the given audit ids, grouped by audit id.
    async fn feedback_for(
        &self,
        ids: &[ExecutedQueryId],
    ) -> Result<HashMap<ExecutedQueryId, Vec<FeedbackRecord>>> {
        let mut out: HashMap<ExecutedQueryId, Vec<FeedbackRecord>> = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let raw: Vec<uuid::Uuid> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, executed_query_id, user_id, rating, text, raw_query, created_at
            FROM query_feedback
            WHERE executed_query_id = ANY($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(&raw)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list feedback", e))?;
        for r in rows {
            let fb = Self::feedback_from_row(&r)?;
            out.entry(fb.executed_query_id).or_default().push(fb);
        }
        Ok(out)
    }

    async fn insert_connection(conn: &mut PgConnection, c: &ConnectionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO connections (id, name, project_id, server, catalog, schema, source, auth,
                extra_headers, ssl, extra_credential, session, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(c.id)
        .bind(&c.name)
        .bind(c.project_id)
        .bind(&c.server)
        .bind(&c.catalog)
        .bind(&c.schema)
        .bind(c.source.as_str())
        .bind(&c.auth)
        .bind(&c.extra_headers)
        .bind(&c.ssl)
        .bind(&c.extra_credential)
        .bind(&c.session)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(conn)
        .await
        .map_err(|e| Error::backend("insert connection", e))?;
        Ok(())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl AppDb for PostgresAppDb {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_user(&self, user: &UserRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, organization_id, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.organization_id)
        .bind(user.created_at)
        .bind(user.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!("user {} already exists", user.email))
            } else {
                Error::backend("create user", e)
            }
        })?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get user", e))?;
        row.as_ref().map(Self::user_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get user by email", e))?;
        row.as_ref().map(Self::user_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn update_user(&self, user: &UserRecord) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, email = $3, password_hash = $4, organization_id = $5, deleted_at = $6
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.organization_id)
        .bind(user.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("update user", e))?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_org(&self, org: &OrganizationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO organizations (id, name, email, created_at, deleted_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.email)
        .bind(org.created_at)
        .bind(org.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("create org", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_org(&self, org_id: OrgId) -> Result<Option<OrganizationRecord>> {
        let row = sqlx::query(
            "SELECT id, name, email, created_at, deleted_at FROM organizations WHERE id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get org", e))?;
        row.as_ref().map(Self::org_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_orgs_for_user(&self, user_id: UserId) -> Result<Vec<OrganizationWithProjects>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.name, o.email, o.created_at, o.deleted_at
            FROM organizations o
            JOIN organization_members m ON m.organization_id = o.id
            WHERE m.user_id = $1 AND m.deleted_at IS NULL AND o.deleted_at IS NULL
            ORDER BY o.created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list orgs for user", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let organization = Self::org_from_row(&r)?;
            let projects = self.list_projects_for_org(organization.id).await?;
            out.push(OrganizationWithProjects {
                organization,
                projects,
            });
        }
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn upsert_membership(&self, m: &MembershipRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organization_members (id, user_id, organization_id, role, joined_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, organization_id) DO UPDATE
              SET role = EXCLUDED.role,
                  joined_at = EXCLUDED.joined_at,
                  deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(m.id)
        .bind(m.user_id)
        .bind(m.organization_id)
        .bind(m.role.as_str())
        .bind(m.joined_at)
        .bind(m.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("upsert membership", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
    ) -> Result<Option<MembershipRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, organization_id, role, joined_at, deleted_at
            FROM organization_members
            WHERE user_id = $1 AND organization_id = $2
            "#,
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get membership", e))?;
        row.as_ref().map(Self::membership_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_active_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
    ) -> Result<Option<MembershipRecord>> {
        Ok(self
            .get_membership(user_id, org_id)
            .await?
            .filter(MembershipRecord::is_active))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_members(&self, org_id: OrgId) -> Result<Vec<MemberEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.name, u.email, u.password_hash, u.organization_id, u.created_at,
                   u.deleted_at,
                   m.id AS m_id, m.role AS m_role, m.joined_at AS m_joined_at
            FROM organization_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.organization_id = $1 AND m.deleted_at IS NULL AND u.deleted_at IS NULL
            ORDER BY m.joined_at ASC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list members", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let user = Self::user_from_row(&r)?;
            let role_str: String = col(&r, "m_role")?;
            let role = MemberRole::parse_str(&role_str).ok_or_else(|| {
                Error::BackendMessage(format!("invalid member role in db: {role_str}"))
            })?;
            let membership = MembershipRecord {
                id: col(&r, "m_id")?,
                user_id: user.id,
                organization_id: org_id,
                role,
                joined_at: col(&r, "m_joined_at")?,
                deleted_at: None,
            };
            out.push(MemberEntry { user, membership });
        }
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_project_with_connection(
        &self,
        project: &ProjectRecord,
        connection: &ConnectionRecord,
    ) -> Result<()> {
        if connection.project_id != project.id {
            return Err(Error::InvalidInput(
                "connection must belong to the new project".to_string(),
            ));
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin project tx", e))?;
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, user_id, organization_id, created_at,
                updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.user_id)
        .bind(project.organization_id)
        .bind(project.created_at)
        .bind(project.updated_at)
        .bind(project.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::backend("insert project", e))?;
        Self::insert_connection(&mut *tx, connection).await?;
        tx.commit()
            .await
            .map_err(|e| Error::backend("commit project tx", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_project(&self, project_id: ProjectId) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get project", e))?;
        row.as_ref().map(Self::project_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_projects_for_org(&self, org_id: OrgId) -> Result<Vec<ProjectRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects \
             WHERE organization_id = $1 AND deleted_at IS NULL ORDER BY created_at DESC"
        ))
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list projects", e))?;
        rows.iter().map(Self::project_from_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn soft_delete_project(&self, project_id: ProjectId) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE projects SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(project_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("soft delete project", e))?;
        Ok(res.rows_affected() > 0)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_connection(&self, connection: &ConnectionRecord) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::backend("acquire connection", e))?;
        Self::insert_connection(&mut conn, connection).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = $1"
        ))
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get connection", e))?;
        row.as_ref().map(Self::connection_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_connections(&self, project_id: ProjectId) -> Result<Vec<ConnectionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections WHERE project_id = $1 ORDER BY created_at ASC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list connections", e))?;
        rows.iter().map(Self::connection_from_row).collect()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(status = record.status.as_str()))]
    async fn append_executed_query(&self, record: &ExecutedQueryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executed_queries (id, query, user_id, project_id, connection_id, status,
                duration, error, result_size, cpu_time, elapsed_time, wall_time, queued_time,
                processed_rows, processed_bytes, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id)
        .bind(&record.query)
        .bind(record.user_id)
        .bind(record.project_id)
        .bind(record.connection_id)
        .bind(record.status.as_str())
        .bind(record.duration)
        .bind(&record.error)
        .bind(record.result_size)
        .bind(record.timings.cpu_time)
        .bind(record.timings.elapsed_time)
        .bind(record.timings.wall_time)
        .bind(record.timings.queued_time)
        .bind(record.timings.processed_rows)
        .bind(record.timings.processed_bytes)
        .bind(record.executed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("append executed query", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_executed_query(
        &self,
        id: ExecutedQueryId,
    ) -> Result<Option<ExecutedQueryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTED_COLUMNS} FROM executed_queries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get executed query", e))?;
        row.as_ref().map(Self::executed_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_executed_queries_for_project(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> Result<Vec<ExecutedQueryView>> {
        let rows = sqlx::query(
            r#"
            SELECT q.id, q.query, q.user_id, q.project_id, q.connection_id, q.status, q.duration,
                   q.error, q.result_size, q.cpu_time, q.elapsed_time, q.wall_time, q.queued_time,
                   q.processed_rows, q.processed_bytes, q.executed_at,
                   u.name AS u_name, u.email AS u_email,
                   c.name AS c_name, c.server AS c_server, c.catalog AS c_catalog,
                   c.schema AS c_schema, c.source AS c_source,
                   c.created_at AS c_created_at, c.updated_at AS c_updated_at
            FROM executed_queries q
            LEFT JOIN users u ON u.id = q.user_id
            LEFT JOIN connections c ON c.id = q.connection_id
            WHERE q.project_id = $1
            ORDER BY q.executed_at DESC
            LIMIT $2
            "#,
        )
        .bind(project_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list executed queries", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for r in &rows {
            let record = Self::executed_from_row(r)?;
            let user = match col::<Option<String>>(r, "u_email")? {
                Some(email) => Some(UserSummary {
                    id: record.user_id,
                    name: col(r, "u_name")?,
                    email,
                }),
                None => None,
            };
            let connection = match col::<Option<String>>(r, "c_source")? {
                Some(source) => Some(ConnectionSummary {
                    id: record.connection_id,
                    name: col(r, "c_name")?,
                    server: col(r, "c_server")?,
                    catalog: col(r, "c_catalog")?,
                    schema: col(r, "c_schema")?,
                    source: SourceKind::parse(&source).map_err(|_| {
                        Error::BackendMessage(format!("invalid source in db: {source}"))
                    })?,
                    created_at: col(r, "c_created_at")?,
                    updated_at: col(r, "c_updated_at")?,
                }),
                None => None,
            };
            records.push((record, user, connection));
        }

        let ids: Vec<ExecutedQueryId> = records.iter().map(|(r, _, _)| r.id).collect();
        let mut feedback = self.feedback_for(&ids).await?;
        Ok(records
            .into_iter()
            .map(|(record, user, connection)| ExecutedQueryView {
                feedbacks: feedback.remove(&record.id).unwrap_or_default(),
                record,
                user,
                connection,
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn recent_queries_for_connection(
        &self,
        connection_id: ConnectionId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTED_COLUMNS} FROM executed_queries \
             WHERE connection_id = $1 ORDER BY executed_at DESC LIMIT $2"
        ))
        .bind(connection_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("recent queries for connection", e))?;

        let records = rows
            .iter()
            .map(Self::executed_from_row)
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<ExecutedQueryId> = records.iter().map(|r| r.id).collect();
        let mut feedback = self.feedback_for(&ids).await?;
        Ok(records
            .into_iter()
            .map(|record| HistoryEntry {
                feedbacks: feedback.remove(&record.id).unwrap_or_default(),
                record,
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn append_feedback(&self, feedback: &FeedbackRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_feedback (id, executed_query_id, user_id, rating, text, raw_query, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(feedback.id)
        .bind(feedback.executed_query_id)
        .bind(feedback.user_id)
        .bind(feedback.rating)
        .bind(&feedback.text)
        .bind(&feedback.raw_query)
        .bind(feedback.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => Error::NotFound(
                format!("executed query {}", feedback.executed_query_id),
            ),
            _ => Error::backend("append feedback", e),
        })?;
        Ok(())
    }
}
