use crate::models::{ConnectionId, ExecutedQueryId, OrgId, ProjectId, UserId};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub use crate::store::models::{
    ConnectionRecord, ExecutedQueryRecord, ExecutedQueryView, FeedbackRecord, HistoryEntry,
    MemberEntry, MembershipRecord, OrganizationRecord, OrganizationWithProjects, ProjectRecord,
    QueryStatus, UserRecord,
};

/// Platform database: users, organizations, memberships, projects, their
/// connections and the query audit trail.
#[async_trait]
pub trait AppDb: Send + Sync {
    async fn create_user(&self, user: &UserRecord) -> Result<()>;
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>>;
    /// Case-insensitive; returns soft-deleted users too.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;
    async fn update_user(&self, user: &UserRecord) -> Result<()>;

    async fn create_org(&self, org: &OrganizationRecord) -> Result<()>;
    async fn get_org(&self, org_id: OrgId) -> Result<Option<OrganizationRecord>>;
    /// Active organizations where the user holds an active membership, each
    /// with its non-deleted projects.
    async fn list_orgs_for_user(&self, user_id: UserId) -> Result<Vec<OrganizationWithProjects>>;

    /// Insert or replace the membership for `(user_id, organization_id)`.
    async fn upsert_membership(&self, membership: &MembershipRecord) -> Result<()>;
    /// Returns soft-deleted memberships too.
    async fn get_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
    ) -> Result<Option<MembershipRecord>>;
    async fn get_active_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
    ) -> Result<Option<MembershipRecord>>;
    async fn list_members(&self, org_id: OrgId) -> Result<Vec<MemberEntry>>;

    /// Inserts both rows in one transaction.
    async fn create_project_with_connection(
        &self,
        project: &ProjectRecord,
        connection: &ConnectionRecord,
    ) -> Result<()>;
    /// Non-deleted projects only.
    async fn get_project(&self, project_id: ProjectId) -> Result<Option<ProjectRecord>>;
    async fn list_projects_for_org(&self, org_id: OrgId) -> Result<Vec<ProjectRecord>>;
    /// Returns false when the project does not exist or is already deleted.
    async fn soft_delete_project(&self, project_id: ProjectId) -> Result<bool>;

    async fn create_connection(&self, connection: &ConnectionRecord) -> Result<()>;
    async fn get_connection(&self, connection_id: ConnectionId)
    -> Result<Option<ConnectionRecord>>;
    async fn list_connections(&self, project_id: ProjectId) -> Result<Vec<ConnectionRecord>>;

    async fn append_executed_query(&self, record: &ExecutedQueryRecord) -> Result<()>;
    async fn get_executed_query(
        &self,
        id: ExecutedQueryId,
    ) -> Result<Option<ExecutedQueryRecord>>;
    async fn list_executed_queries_for_project(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> Result<Vec<ExecutedQueryView>>;
    async fn recent_queries_for_connection(
        &self,
        connection_id: ConnectionId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>>;
    async fn append_feedback(&self, feedback: &FeedbackRecord) -> Result<()>;
}

/// Key-value cache (Redis in production).
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;
    async fn del(&self, key: &str) -> Result<u64>;
}

/// Shared key validation for cache implementations.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(crate::Error::InvalidInput("cache key is empty".to_string()));
    }
    if key.contains(' ') {
        return Err(crate::Error::InvalidInput(
            "cache key must not contain spaces".to_string(),
        ));
    }
    Ok(())
}
