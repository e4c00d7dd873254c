use crate::error::ApiError;
use crate::extract::{CurrentUser, parse_id, require_id};
use crate::routes::projects::project_for_member;
use crate::routes::require_member;
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use querycraft_core::queries::resolve_access;
use querycraft_core::store::models::{ExecutedQueryView, FeedbackRecord};
use querycraft_core::{ExecutedQueryId, FeedbackId, ProjectId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    pub query: Option<String>,
    pub connection_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBody {
    pub executed_query_id: Option<String>,
    pub rating: Option<i32>,
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub success: bool,
    pub feedback: FeedbackRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub success: bool,
    pub executed_queries: Vec<ExecutedQueryView>,
}

pub fn router() -> Router {
    Router::new()
        .route("/execute", post(execute_query))
        .route("/history/{project_id}", get(query_history))
        .route("/feedback", post(submit_feedback))
}

/// 200 with the result, or 400 carrying the recorded failure. Both include
/// the audit row id.
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

    if outcome.succeeded() {
        Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "result": outcome.output,
                "executionTime": outcome.execution_time,
                "executedQueryId": outcome.executed_query_id,
            })),
        )
            .into_response())
    } else {
        Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": "Query execution failed",
                "error": outcome.error,
                "executedQueryId": outcome.executed_query_id,
            })),
        )
            .into_response())
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(%project_id))]
pub async fn query_history(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path(project_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let project_id: ProjectId = parse_id(&project_id, "projectId")?;
    let project = project_for_member(&state, &current, project_id).await?;
    let queries = state
        .db
        .list_executed_queries_for_project(project.id, HISTORY_LIMIT)
        .await?;
    Ok(Json(HistoryResponse {
        success: true,
        executed_queries: queries,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn submit_feedback(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<FeedbackBody>,
) -> Result<(StatusCode, Json<FeedbackResponse>), ApiError> {
    let executed_query_id: ExecutedQueryId =
        require_id(body.executed_query_id.as_deref(), "executedQueryId")?;
    let rating = body
        .rating
        .ok_or_else(|| ApiError::invalid("rating is required"))?;

    let executed = state
        .db
        .get_executed_query(executed_query_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Executed query not found"))?;
    let project = state
        .db
        .get_project(executed.project_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    require_member(&state, current.id(), project.organization_id).await?;

    let feedback = FeedbackRecord {
        id: FeedbackId::new(),
        executed_query_id,
        user_id: current.id(),
        rating,
        text: body.text.filter(|t| !t.trim().is_empty()),
        raw_query: executed.query,
        created_at: Utc::now(),
    };
    state.db.append_feedback(&feedback).await?;
    Ok((
        StatusCode::CREATED,
        Json(FeedbackResponse {
            success: true,
            feedback,
        }),
    ))
}
