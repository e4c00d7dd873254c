use crate::models::{ConnectionId, ExecutedQueryId, OrgId, ProjectId, UserId};
use crate::store::models::{
    ConnectionRecord, ExecutedQueryRecord, ExecutedQueryView, FeedbackRecord, HistoryEntry,
    MemberEntry, MembershipRecord, OrganizationRecord, OrganizationWithProjects, ProjectRecord,
    UserRecord,
};
use crate::store::traits::{AppDb, Cache, validate_key};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserRecord>,
    orgs: HashMap<OrgId, OrganizationRecord>,
    memberships: HashMap<(UserId, OrgId), MembershipRecord>,
    projects: HashMap<ProjectId, ProjectRecord>,
    connections: HashMap<ConnectionId, ConnectionRecord>,
    executed: Vec<ExecutedQueryRecord>,
    feedback: Vec<FeedbackRecord>,
}

impl MemoryState {
    fn feedback_for(&self, id: ExecutedQueryId) -> Vec<FeedbackRecord> {
        let mut out: Vec<FeedbackRecord> = self
            .feedback
            .iter()
            .filter(|f| f.executed_query_id == id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Executed queries matching `pred`, newest first. Insertion order breaks
    /// ties so rows appended within the same instant still sort deterministically.
    fn newest_first(
        &self,
        pred: impl Fn(&ExecutedQueryRecord) -> bool,
        limit: usize,
    ) -> Vec<ExecutedQueryRecord> {
        let mut rows: Vec<(usize, &ExecutedQueryRecord)> = self
            .executed
            .iter()
            .enumerate()
            .filter(|(_, r)| pred(r))
            .collect();
        rows.sort_by(|(ia, a), (ib, b)| b.executed_at.cmp(&a.executed_at).then(ib.cmp(ia)));
        rows.into_iter().take(limit).map(|(_, r)| r.clone()).collect()
    }
}

/// In-process [`AppDb`] used when no `DATABASE_URL` is configured, and by tests.
#[derive(Clone, Default)]
pub struct InMemoryAppDb {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryAppDb {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_projects(mut projects: Vec<ProjectRecord>) -> Vec<ProjectRecord> {
    projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    projects
}

#[async_trait]
impl AppDb for InMemoryAppDb {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_user(&self, user: &UserRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let email = user.email.to_lowercase();
        if state
            .users
            .values()
            .any(|u| u.email.to_lowercase() == email)
        {
            return Err(Error::Conflict(format!("user {} already exists", user.email)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRecord>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn update_user(&self, user: &UserRecord) -> Result<()> {
        let mut state = self.state.write().await;
        match state.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("user {}", user.id))),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_org(&self, org: &OrganizationRecord) -> Result<()> {
        self.state.write().await.orgs.insert(org.id, org.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_org(&self, org_id: OrgId) -> Result<Option<OrganizationRecord>> {
        Ok(self.state.read().await.orgs.get(&org_id).cloned())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_orgs_for_user(&self, user_id: UserId) -> Result<Vec<OrganizationWithProjects>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for m in state.memberships.values() {
            if m.user_id != user_id || !m.is_active() {
                continue;
            }
            let Some(org) = state.orgs.get(&m.organization_id) else {
                continue;
            };
            if org.deleted_at.is_some() {
                continue;
            }
            let projects = state
                .projects
                .values()
                .filter(|p| p.organization_id == org.id && p.deleted_at.is_none())
                .cloned()
                .collect();
            out.push(OrganizationWithProjects {
                organization: org.clone(),
                projects: sorted_projects(projects),
            });
        }
        out.sort_by(|a, b| a.organization.created_at.cmp(&b.organization.created_at));
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn upsert_membership(&self, membership: &MembershipRecord) -> Result<()> {
        self.state.write().await.memberships.insert(
            (membership.user_id, membership.organization_id),
            membership.clone(),
        );
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
    ) -> Result<Option<MembershipRecord>> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .get(&(user_id, org_id))
            .cloned())
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
        let state = self.state.read().await;
        let mut out: Vec<MemberEntry> = state
            .memberships
            .values()
            .filter(|m| m.organization_id == org_id && m.is_active())
            .filter_map(|m| {
                let user = state.users.get(&m.user_id)?;
                user.is_active().then(|| MemberEntry {
                    user: user.clone(),
                    membership: m.clone(),
                })
            })
            .collect();
        out.sort_by(|a, b| a.membership.joined_at.cmp(&b.membership.joined_at));
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
        let mut state = self.state.write().await;
        state.projects.insert(project.id, project.clone());
        state.connections.insert(connection.id, connection.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_project(&self, project_id: ProjectId) -> Result<Option<ProjectRecord>> {
        Ok(self
            .state
            .read()
            .await
            .projects
            .get(&project_id)
            .filter(|p| p.deleted_at.is_none())
            .cloned())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_projects_for_org(&self, org_id: OrgId) -> Result<Vec<ProjectRecord>> {
        let state = self.state.read().await;
        let projects = state
            .projects
            .values()
            .filter(|p| p.organization_id == org_id && p.deleted_at.is_none())
            .cloned()
            .collect();
        Ok(sorted_projects(projects))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn soft_delete_project(&self, project_id: ProjectId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.projects.get_mut(&project_id) {
            Some(p) if p.deleted_at.is_none() => {
                let now = Utc::now();
                p.deleted_at = Some(now);
                p.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_connection(&self, connection: &ConnectionRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.projects.contains_key(&connection.project_id) {
            return Err(Error::NotFound(format!("project {}", connection.project_id)));
        }
        state.connections.insert(connection.id, connection.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionRecord>> {
        Ok(self
            .state
            .read()
            .await
            .connections
            .get(&connection_id)
            .cloned())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_connections(&self, project_id: ProjectId) -> Result<Vec<ConnectionRecord>> {
        let state = self.state.read().await;
        let mut out: Vec<ConnectionRecord> = state
            .connections
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn append_executed_query(&self, record: &ExecutedQueryRecord) -> Result<()> {
        self.state.write().await.executed.push(record.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_executed_query(
        &self,
        id: ExecutedQueryId,
    ) -> Result<Option<ExecutedQueryRecord>> {
        Ok(self
            .state
            .read()
            .await
            .executed
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_executed_queries_for_project(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> Result<Vec<ExecutedQueryView>> {
        let state = self.state.read().await;
        let rows = state.newest_first(|r| r.project_id == project_id, limit);
        Ok(rows
            .into_iter()
            .map(|record| ExecutedQueryView {
                user: state.users.get(&record.user_id).map(UserRecord::summary),
                connection: state
                    .connections
                    .get(&record.connection_id)
                    .map(ConnectionRecord::summary),
                feedbacks: state.feedback_for(record.id),
                record,
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn recent_queries_for_connection(
        &self,
        connection_id: ConnectionId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let state = self.state.read().await;
        let rows = state.newest_first(|r| r.connection_id == connection_id, limit);
        Ok(rows
            .into_iter()
            .map(|record| HistoryEntry {
                feedbacks: state.feedback_for(record.id),
                record,
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn append_feedback(&self, feedback: &FeedbackRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if !state
            .executed
            .iter()
            .any(|r| r.id == feedback.executed_query_id)
        {
            return Err(Error::NotFound(format!(
                "executed query {}",
                feedback.executed_query_id
            )));
        }
        state.feedback.push(feedback.clone());
        Ok(())
    }
}

/// In-process [`Cache`] with per-entry expiry, used when no `REDIS_URL` is set.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    data: Arc<RwLock<HashMap<String, (Bytes, Option<DateTime<Utc>>)>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        let mut map = self.data.write().await;
        let Some((val, expires)) = map.get(key).cloned() else {
            return Ok(None);
        };
        if let Some(expires) = expires {
            if Utc::now() >= expires {
                map.remove(key);
                return Ok(None);
            }
        }
        Ok(Some(val))
    }

    #[tracing::instrument(level = "debug", skip(self, value))]
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        validate_key(key)?;
        let expires = ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());
        self.data
            .write()
            .await
            .insert(key.to_string(), (value, expires));
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn del(&self, key: &str) -> Result<u64> {
        validate_key(key)?;
        Ok(self
            .data
            .write()
            .await
            .remove(key)
            .map(|_| 1)
            .unwrap_or(0))
    }
}
