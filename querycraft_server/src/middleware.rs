use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::server::AppState;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{body::Body, http::Request};
use std::sync::Arc;

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    let raw = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn authenticate(
    state: Option<Arc<AppState>>,
    token: Option<String>,
) -> Result<CurrentUser, ApiError> {
    let state = state.ok_or_else(|| ApiError::Internal("app state missing".to_string()))?;
    let token =
        token.ok_or_else(|| ApiError::Unauthorized("Not authorized, no token".to_string()))?;
    let claims = state.tokens.verify(&token)?;
    match state.db.get_user(claims.id).await? {
        Some(user) if user.is_active() => Ok(CurrentUser(user)),
        _ => Err(ApiError::Unauthorized(
            "Not authorized, user not found".to_string(),
        )),
    }
}

/// Require `Authorization: Bearer <jwt>` for a live user and expose it as
/// [`CurrentUser`].
pub async fn protect(mut req: Request<Body>, next: Next) -> Response {
    // Request bodies are not Sync, so nothing borrowed from `req` crosses an await.
    let state = req.extensions().get::<Arc<AppState>>().cloned();
    let token = bearer_token(&req).map(str::to_string);
    match authenticate(state, token).await {
        Ok(user) => {
            tracing::debug!(user_id = %user.id(), "request authenticated");
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
