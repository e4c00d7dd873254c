use crate::error::ApiError;
use crate::extract::{CurrentUser, parse_id, require_id};
use crate::routes::projects::{ConnectionDetails, project_for_member};
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use querycraft_core::queries::resolve_access;
use querycraft_core::store::models::{ConnectionRecord, ConnectionSummary};
use querycraft_core::{MemberRole, ProjectId, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionBody {
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub details: ConnectionDetails,
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub message: &'static str,
    pub connection: ConnectionRecord,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub success: bool,
    pub connections: Vec<ConnectionSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    pub connection_id: Option<String>,
    pub query: Option<String>,
}

pub fn router() -> Router {
    Router::new()
        .route("/test-connection", post(test_connection))
        .route("/connections", post(create_connection))
        .route("/projects/{id}", get(project_connections))
        .route("/execute", post(execute_query))
}

/// Ping a Trino server with `SELECT 1 AS success` without saving anything.
#[tracing::instrument(level = "info", skip_all)]
pub async fn test_connection(
    Extension(state): Extension<Arc<AppState>>,
    _current: CurrentUser,
    Json(details): Json<ConnectionDetails>,
) -> Result<Response, ApiError> {
    if details.server.as_deref().is_none_or(|s| s.trim().is_empty()) {
        return Err(ApiError::invalid("server is required"));
    }
    // Transient record; never persisted.
    let connection = details.into_record(ProjectId::new(), SourceKind::Trino);
    let backend = state.backends.open(&connection)?;
    match backend.query("SELECT 1 AS success").await {
        Ok(out) => Ok(Json(json!({
            "message": "Connection successful",
            "result": out.rows,
        }))
        .into_response()),
        Err(e) => {
            tracing::warn!(server = %connection.server, error = %e, "trino connection test failed");
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "message": "Connection failed",
                    "error": e.to_string(),
                })),
            )
                .into_response())
        }
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn create_connection(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<CreateConnectionBody>,
) -> Result<(StatusCode, Json<ConnectionResponse>), ApiError> {
    let project_id: ProjectId = require_id(body.project_id.as_deref(), "projectId")?;
    let project = project_for_member(&state, &current, project_id).await?;
    let membership = state
        .db
        .get_active_membership(current.id(), project.organization_id)
        .await?;
    if membership.is_some_and(|m| m.role == MemberRole::Viewer) {
        return Err(ApiError::forbidden("Viewers cannot add connections"));
    }

    let connection = body.details.into_record(project.id, SourceKind::Trino);
    state.db.create_connection(&connection).await?;
    tracing::info!(connection_id = %connection.id, "connection created");
    Ok((
        StatusCode::CREATED,
        Json(ConnectionResponse {
            message: "Connection created successfully",
            connection,
        }),
    ))
}

#[tracing::instrument(level = "debug", skip_all, fields(%id))]
pub async fn project_connections(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let project_id: ProjectId = parse_id(&id, "projectId")?;
    let project = project_for_member(&state, &current, project_id).await?;
    let connections = state
        .db
        .list_connections(project.id)
        .await?
        .iter()
        .map(ConnectionRecord::summary)
        .collect();
    Ok(Json(ConnectionsResponse {
        success: true,
        connections,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn execute_query(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<ExecuteBody>,
) -> Result<Response, ApiError> {
    let query = body
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("query is required"))?;
    let connection_id = require_id(body.connection_id.as_deref(), "connectionId")?;
    let access = resolve_access(state.db.as_ref(), current.id(), connection_id).await?;

    let outcome = state
        .executor()
        .execute(
            current.id(),
            access.membership.role,
            &access.connection,
            &query,
        )
        .await?;
    match outcome.output {
        Some(output) => Ok(Json(json!({
            "message": "Query executed successfully",
            "data": output.rows,
            "executedQueryId": outcome.executed_query_id,
        }))
        .into_response()),
        None => Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "message": "Failed to execute query",
                "error": outcome.error,
                "executedQueryId": outcome.executed_query_id,
            })),
        )
            .into_response()),
    }
}
