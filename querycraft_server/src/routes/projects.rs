use crate::error::ApiError;
use crate::extract::{CurrentUser, parse_id, require_id};
use crate::routes::{require_admin, require_member};
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use querycraft_core::store::models::{ConnectionRecord, ConnectionSummary, ProjectRecord};
use querycraft_core::{ConnectionId, OrgId, ProjectId, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

const DEFAULT_CATALOG: &str = "default";
const DEFAULT_SCHEMA: &str = "public";

/// Connection fields as clients send them. Blobs default to `{}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    pub name: Option<String>,
    pub server: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    #[serde(default)]
    pub auth: Option<Value>,
    #[serde(default)]
    pub extra_headers: Option<Value>,
    /// Legacy spelling of `extraHeaders`; merged underneath it.
    #[serde(default)]
    pub headers: Option<Value>,
    #[serde(default)]
    pub ssl: Option<Value>,
    #[serde(default)]
    pub extra_credential: Option<Value>,
    #[serde(default)]
    pub session: Option<Value>,
}

fn blob(v: Option<Value>) -> Value {
    match v {
        Some(Value::Null) | None => json!({}),
        Some(v) => v,
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ConnectionDetails {
    pub fn into_record(self, project_id: ProjectId, source: SourceKind) -> ConnectionRecord {
        let extra_headers = match (blob(self.headers), blob(self.extra_headers)) {
            (Value::Object(mut base), Value::Object(over)) => {
                base.extend(over);
                Value::Object(base)
            }
            (_, over) => over,
        };
        let now = Utc::now();
        ConnectionRecord {
            id: ConnectionId::new(),
            name: non_empty(self.name),
            project_id,
            server: self.server.unwrap_or_default().trim().to_string(),
            catalog: non_empty(self.catalog).unwrap_or_else(|| DEFAULT_CATALOG.to_string()),
            schema: non_empty(self.schema).unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            source,
            auth: blob(self.auth),
            extra_headers,
            ssl: blob(self.ssl),
            extra_credential: blob(self.extra_credential),
            session: blob(self.session),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub organization_id: Option<String>,
    pub connection_type: Option<String>,
    #[serde(default)]
    pub connection_details: ConnectionDetails,
}

#[derive(Debug, Serialize)]
pub struct CreateProjectResponse {
    pub success: bool,
    pub project: ProjectRecord,
    pub connection: ConnectionRecord,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: ProjectRecord,
    pub connections: Vec<ConnectionSummary>,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub success: bool,
    pub project: ProjectDetail,
}

#[derive(Debug, Serialize)]
pub struct ProjectsResponse {
    pub success: bool,
    pub projects: Vec<ProjectRecord>,
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_project))
        .route("/{id}", get(get_project).delete(delete_project))
        .route(
            "/organization/{organization_id}",
            get(list_organization_projects),
        )
}

/// 400 body for a failed pre-save connection test.
pub(crate) fn connection_test_failed(source: &str, err: &querycraft_core::Error) -> Response {
    tracing::warn!(source, error = %err, "connection test failed");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "success": false,
            "message": format!("Connection test failed for {source}"),
            "error": err.to_string(),
        })),
    )
        .into_response()
}

/// Load a live project and require the caller to belong to its organization.
pub(crate) async fn project_for_member(
    state: &AppState,
    current: &CurrentUser,
    project_id: ProjectId,
) -> Result<ProjectRecord, ApiError> {
    let project = state
        .db
        .get_project(project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    require_member(state, current.id(), project.organization_id).await?;
    Ok(project)
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn create_project(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Response, ApiError> {
    let name = non_empty(req.name).ok_or_else(|| ApiError::invalid("name is required"))?;
    let org_id: OrgId = require_id(req.organization_id.as_deref(), "organizationId")?;
    let source_raw = non_empty(req.connection_type)
        .ok_or_else(|| ApiError::invalid("connectionType is required"))?;
    let source = SourceKind::parse(&source_raw)?;
    require_member(&state, current.id(), org_id).await?;

    let now = Utc::now();
    let project = ProjectRecord {
        id: ProjectId::new(),
        name,
        description: req.description,
        user_id: current.id(),
        organization_id: org_id,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    let connection = req.connection_details.into_record(project.id, source);

    let tested = match state.backends.open(&connection) {
        Ok(backend) => backend.ping().await,
        Err(e) => Err(e),
    };
    if let Err(e) = tested {
        return Ok(connection_test_failed(source.as_str(), &e));
    }

    state
        .db
        .create_project_with_connection(&project, &connection)
        .await?;
    tracing::info!(project_id = %project.id, connection_id = %connection.id, "project created");
    Ok((
        StatusCode::CREATED,
        Json(CreateProjectResponse {
            success: true,
            project,
            connection,
        }),
    )
        .into_response())
}

#[tracing::instrument(level = "debug", skip_all, fields(%id))]
pub async fn get_project(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project_id: ProjectId = parse_id(&id, "projectId")?;
    let project = project_for_member(&state, &current, project_id).await?;
    let connections = state
        .db
        .list_connections(project.id)
        .await?
        .iter()
        .map(ConnectionRecord::summary)
        .collect();
    Ok(Json(ProjectResponse {
        success: true,
        project: ProjectDetail {
            project,
            connections,
        },
    }))
}

#[tracing::instrument(level = "debug", skip_all, fields(%organization_id))]
pub async fn list_organization_projects(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path(organization_id): Path<String>,
) -> Result<Json<ProjectsResponse>, ApiError> {
    let org_id: OrgId = parse_id(&organization_id, "organizationId")?;
    require_member(&state, current.id(), org_id).await?;
    Ok(Json(ProjectsResponse {
        success: true,
        projects: state.db.list_projects_for_org(org_id).await?,
    }))
}

#[tracing::instrument(level = "info", skip_all, fields(%id))]
pub async fn delete_project(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let project_id: ProjectId = parse_id(&id, "projectId")?;
    let project = state
        .db
        .get_project(project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    require_admin(&state, current.id(), project.organization_id).await?;
    if !state.db.soft_delete_project(project_id).await? {
        return Err(ApiError::not_found("Project not found"));
    }
    Ok(Json(json!({
        "success": true,
        "message": "Project deleted successfully",
    })))
}
