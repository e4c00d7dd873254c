use crate::models::{
    ConnectionId, ExecutedQueryId, FeedbackId, MemberRole, MembershipId, OrgId, ProjectId, UserId,
};
use crate::sources::models::{QueryTimings, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform user. `password_hash` is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub name: Option<String>,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Primary organization (the one the user registered or was invited into).
    pub organization_id: Option<OrgId>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRecord {
    pub id: OrgId,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub id: MembershipId,
    pub user_id: UserId,
    pub organization_id: OrgId,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MembershipRecord {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub user_id: UserId,
    pub organization_id: OrgId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Registered external data source.
///
/// `auth` and `extra_credential` hold secrets and are not serialized; API
/// responses use [`ConnectionSummary`] or this record's remaining fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub name: Option<String>,
    pub project_id: ProjectId,
    pub server: String,
    pub catalog: String,
    pub schema: String,
    pub source: SourceKind,
    #[serde(skip_serializing, default)]
    pub auth: serde_json::Value,
    pub extra_headers: serde_json::Value,
    pub ssl: serde_json::Value,
    #[serde(skip_serializing, default)]
    pub extra_credential: serde_json::Value,
    pub session: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id,
            name: self.name.clone(),
            server: self.server.clone(),
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            source: self.source,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub name: Option<String>,
    pub server: String,
    pub catalog: String,
    pub schema: String,
    pub source: SourceKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Generated,
    Refined,
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Generated => "GENERATED",
            QueryStatus::Refined => "REFINED",
            QueryStatus::Success => "SUCCESS",
            QueryStatus::Error => "ERROR",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "GENERATED" => Some(QueryStatus::Generated),
            "REFINED" => Some(QueryStatus::Refined),
            "SUCCESS" => Some(QueryStatus::Success),
            "ERROR" => Some(QueryStatus::Error),
            _ => None,
        }
    }
}

/// Append-only audit row for every generate / refine / execute call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedQueryRecord {
    pub id: ExecutedQueryId,
    pub query: String,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub connection_id: ConnectionId,
    pub status: QueryStatus,
    /// Seconds.
    pub duration: f64,
    pub error: Option<String>,
    pub result_size: i64,
    #[serde(flatten)]
    pub timings: QueryTimings,
    pub executed_at: DateTime<Utc>,
}

impl ExecutedQueryRecord {
    /// Audit row for a query produced by the model (no execution stats).
    pub fn model_output(
        query: String,
        user_id: UserId,
        connection: &ConnectionRecord,
        status: QueryStatus,
    ) -> Self {
        Self {
            id: ExecutedQueryId::new(),
            query,
            user_id,
            project_id: connection.project_id,
            connection_id: connection.id,
            status,
            duration: 0.0,
            error: None,
            result_size: 0,
            timings: QueryTimings::default(),
            executed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: FeedbackId,
    pub executed_query_id: ExecutedQueryId,
    pub user_id: UserId,
    pub rating: i32,
    pub text: Option<String>,
    pub raw_query: String,
    pub created_at: DateTime<Utc>,
}

/// Project history row: the audit record plus who ran it, where, and feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedQueryView {
    #[serde(flatten)]
    pub record: ExecutedQueryRecord,
    pub user: Option<UserSummary>,
    pub connection: Option<ConnectionSummary>,
    pub feedbacks: Vec<FeedbackRecord>,
}

/// Recent history for a connection, used as refine-prompt context.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub record: ExecutedQueryRecord,
    pub feedbacks: Vec<FeedbackRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub user: UserRecord,
    pub membership: MembershipRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationWithProjects {
    #[serde(flatten)]
    pub organization: OrganizationRecord,
    pub projects: Vec<ProjectRecord>,
}
