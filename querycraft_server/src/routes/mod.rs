use crate::error::ApiError;
use crate::middleware::protect;
use crate::server::AppState;
use axum::Router;
use axum::middleware;
use querycraft_core::store::models::MembershipRecord;
use querycraft_core::{OrgId, UserId};

pub mod ai;
pub mod auth;
pub mod health;
pub mod organizations;
pub mod projects;
pub mod queries;
pub mod trino;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .nest(
            "/api/auth",
            auth::public_router().merge(auth::protected_router().route_layer(
                middleware::from_fn(protect),
            )),
        )
        .nest("/api", protected_api_router())
}

#[tracing::instrument(level = "debug", skip_all)]
fn protected_api_router() -> Router {
    Router::new()
        .nest("/organizations", organizations::router())
        .nest("/projects", projects::router())
        .nest("/ai", ai::router())
        .nest("/queries", queries::router())
        .nest("/trino", trino::router())
        .route_layer(middleware::from_fn(protect))
}

/// Active membership of `user_id` in `org_id`, or 403.
pub(crate) async fn require_member(
    state: &AppState,
    user_id: UserId,
    org_id: OrgId,
) -> Result<MembershipRecord, ApiError> {
    state
        .db
        .get_active_membership(user_id, org_id)
        .await?
        .ok_or_else(|| ApiError::forbidden("You are not a member of this organization"))
}

/// Active ADMIN membership of `user_id` in `org_id`, or 403.
pub(crate) async fn require_admin(
    state: &AppState,
    user_id: UserId,
    org_id: OrgId,
) -> Result<MembershipRecord, ApiError> {
    let membership = require_member(state, user_id, org_id).await?;
    if !membership.role.is_admin() {
        return Err(ApiError::forbidden(
            "Only organization admins can perform this action",
        ));
    }
    Ok(membership)
}
