use crate::auth::{hash_password, verify_password};
use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::routes::organizations;
use crate::server::AppState;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use querycraft_core::store::models::{
    MembershipRecord, OrganizationRecord, ProjectRecord, UserRecord,
};
use querycraft_core::{MemberRole, MembershipId, OrgId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub organization_name: Option<String>,
    pub organization_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub token: String,
    pub user: UserRecord,
    pub organization: OrganizationRecord,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: UserRecord,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: UserRecord,
    pub organization: Option<OrganizationRecord>,
    pub projects: Vec<ProjectRecord>,
    pub membership: Option<MembershipRecord>,
}

pub fn public_router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn protected_router() -> Router {
    Router::new()
        .route("/profile", get(profile))
        .route("/organizations", post(organizations::create_organization))
        .route(
            "/organizations/{organization_id}/invite",
            post(organizations::invite_member),
        )
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::invalid(format!("{field} is required")))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let email = required(req.email, "email")?.to_lowercase();
    let password = required(req.password, "password")?;
    let name = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

    if state.db.get_user_by_email(&email).await?.is_some() {
        return Err(ApiError::invalid("User already exists"));
    }

    let now = Utc::now();
    let org_name = req
        .organization_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{}'s Organization", name.as_deref().unwrap_or(&email)));
    let organization = OrganizationRecord {
        id: OrgId::new(),
        name: org_name,
        email: req.organization_email.or_else(|| Some(email.clone())),
        created_at: now,
        deleted_at: None,
    };
    state.db.create_org(&organization).await?;

    let user = UserRecord {
        id: UserId::new(),
        name,
        email,
        password_hash: hash_password(&password)?,
        organization_id: Some(organization.id),
        created_at: now,
        deleted_at: None,
    };
    state.db.create_user(&user).await?;
    state
        .db
        .upsert_membership(&MembershipRecord {
            id: MembershipId::new(),
            user_id: user.id,
            organization_id: organization.id,
            role: MemberRole::Admin,
            joined_at: now,
            deleted_at: None,
        })
        .await?;

    let token = state.tokens.issue(user.id)?;
    tracing::info!(user_id = %user.id, org_id = %organization.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            token,
            user,
            organization,
        }),
    ))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());
    let email = required(req.email, "email")?;
    let password = required(req.password, "password")?;

    let user = state
        .db
        .get_user_by_email(&email)
        .await?
        .filter(UserRecord::is_active)
        .ok_or_else(invalid)?;
    if !verify_password(&password, &user.password_hash) {
        return Err(invalid());
    }

    let token = state.tokens.issue(user.id)?;
    Ok(Json(LoginResponse {
        success: true,
        token,
        user,
    }))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn profile(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = current.0;
    let (organization, projects, membership) = match user.organization_id {
        Some(org_id) => {
            let org = state.db.get_org(org_id).await?;
            let membership = state.db.get_active_membership(user.id, org_id).await?;
            let projects = if membership.is_some() {
                state.db.list_projects_for_org(org_id).await?
            } else {
                Vec::new()
            };
            (org, projects, membership)
        }
        None => (None, Vec::new(), None),
    };
    Ok(Json(ProfileResponse {
        user,
        organization,
        projects,
        membership,
    }))
}
