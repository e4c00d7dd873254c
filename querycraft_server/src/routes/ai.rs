use crate::error::ApiError;
use crate::extract::{CurrentUser, parse_id, require_id};
use crate::server::AppState;
use axum::extract::Path;
use axum::routing::{delete, post};
use axum::{Extension, Json, Router};
use querycraft_core::queries::assistant::DEFAULT_DIALECT;
use querycraft_core::queries::{ExecutionOutcome, GenerateRequest, RefineRequest};
use querycraft_core::{ConnectionId, ExecutedQueryId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub prompt: Option<String>,
    pub connection_id: Option<String>,
    pub dialect: Option<String>,
    #[serde(rename = "optimizeForOLAP", default)]
    pub optimize_for_olap: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub message: &'static str,
    pub query: String,
    pub connection_id: ConnectionId,
    pub executed_query_id: ExecutedQueryId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateExecuteResponse {
    pub message: &'static str,
    pub query: String,
    pub connection_id: ConnectionId,
    pub execution: ExecutionOutcome,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineBody {
    pub original_query: Option<String>,
    pub executed_query: Option<String>,
    pub refinement_request: Option<String>,
    pub connection_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineResponse {
    pub message: &'static str,
    pub original_query: String,
    pub refined_query: String,
    pub connection_id: ConnectionId,
    pub generate_context: String,
    pub executed_query_id: ExecutedQueryId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSchemaBody {
    pub connection_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSchemaResponse {
    pub message: &'static str,
    pub table_count: usize,
    pub relationship_count: usize,
    pub cached_at: i64,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub message: &'static str,
    pub invalidated: bool,
}

pub fn router() -> Router {
    Router::new()
        .route("/generate-query", post(generate_query))
        .route("/generate-execute", post(generate_execute))
        .route("/refine-query", post(refine_query))
        .route("/cache-schema", post(cache_schema))
        .route("/cache-schema/{connection_id}", delete(invalidate_schema))
}

/// Validates the generate body before anything touches the store.
fn generate_request(body: GenerateBody) -> Result<GenerateRequest, ApiError> {
    let prompt = body.prompt.filter(|p| !p.trim().is_empty());
    let connection_raw = body.connection_id.filter(|c| !c.trim().is_empty());
    let (Some(prompt), Some(connection_raw)) = (prompt, connection_raw) else {
        return Err(ApiError::invalid("Prompt and connectionId are required"));
    };
    Ok(GenerateRequest {
        prompt,
        connection_id: parse_id(&connection_raw, "connectionId")?,
        dialect: body
            .dialect
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DIALECT.to_string()),
        optimize_for_olap: body.optimize_for_olap,
    })
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn generate_query(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let req = generate_request(body)?;
    let out = state.assistant.generate(current.id(), &req).await?;
    Ok(Json(GenerateResponse {
        message: "Query generated successfully",
        query: out.query,
        connection_id: out.connection_id,
        executed_query_id: out.executed_query_id,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn generate_execute(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateExecuteResponse>, ApiError> {
    let req = generate_request(body)?;
    let (generated, execution) = state
        .assistant
        .generate_and_execute(current.id(), &req)
        .await?;
    let message = if execution.succeeded() {
        "Query generated and executed successfully"
    } else {
        "Query generated but execution failed"
    };
    Ok(Json(GenerateExecuteResponse {
        message,
        query: generated.query,
        connection_id: generated.connection_id,
        execution,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn refine_query(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<RefineBody>,
) -> Result<Json<RefineResponse>, ApiError> {
    let original_query = body.original_query.filter(|q| !q.trim().is_empty());
    let refinement_request = body.refinement_request.filter(|r| !r.trim().is_empty());
    let (Some(original_query), Some(refinement_request)) = (original_query, refinement_request)
    else {
        return Err(ApiError::invalid(
            "originalQuery, refinementRequest and connectionId are required",
        ));
    };
    let connection_id = require_id(body.connection_id.as_deref(), "connectionId")?;

    let out = state
        .assistant
        .refine(
            current.id(),
            &RefineRequest {
                original_query,
                executed_query: body.executed_query,
                refinement_request,
                connection_id,
            },
        )
        .await?;
    Ok(Json(RefineResponse {
        message: "Query refined successfully",
        original_query: out.original_query,
        refined_query: out.refined_query,
        connection_id: out.connection_id,
        generate_context: out.generate_context,
        executed_query_id: out.executed_query_id,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn cache_schema(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(body): Json<CacheSchemaBody>,
) -> Result<Json<CacheSchemaResponse>, ApiError> {
    let connection_id = require_id(body.connection_id.as_deref(), "connectionId")?;
    let stats = state
        .assistant
        .cache_schema(current.id(), connection_id)
        .await?;
    Ok(Json(CacheSchemaResponse {
        message: "Schema cached successfully",
        table_count: stats.table_count,
        relationship_count: stats.relationship_count,
        cached_at: stats.cached_at,
    }))
}

#[tracing::instrument(level = "info", skip_all, fields(%connection_id))]
pub async fn invalidate_schema(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path(connection_id): Path<String>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let id = parse_id(&connection_id, "connectionId")?;
    let invalidated = state.assistant.invalidate_schema(current.id(), id).await?;
    Ok(Json(InvalidateResponse {
        message: if invalidated {
            "Schema cache cleared"
        } else {
            "No cached schema for this connection"
        },
        invalidated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(prompt: Option<&str>, connection_id: Option<&str>) -> GenerateBody {
        GenerateBody {
            prompt: prompt.map(str::to_string),
            connection_id: connection_id.map(str::to_string),
            dialect: None,
            optimize_for_olap: false,
        }
    }

    #[test]
    fn generate_body_requires_prompt_and_connection() {
        let id = ConnectionId::new().to_string();
        assert!(generate_request(body(None, Some(&id))).is_err());
        assert!(generate_request(body(Some("  "), Some(&id))).is_err());
        assert!(generate_request(body(Some("count users"), None)).is_err());

        let req = generate_request(body(Some("count users"), Some(&id))).unwrap();
        assert_eq!(req.dialect, "trino");
        assert!(!req.optimize_for_olap);
    }
}
