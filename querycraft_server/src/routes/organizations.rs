use crate::auth::{generate_password, hash_password};
use crate::error::ApiError;
use crate::extract::{CurrentUser, parse_id};
use crate::routes::{require_admin, require_member};
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use querycraft_core::store::models::{
    MemberEntry, MembershipRecord, OrganizationRecord, OrganizationWithProjects, UserRecord,
};
use querycraft_core::{MemberRole, MembershipId, OrgId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrganizationResponse {
    pub success: bool,
    pub organization: OrganizationRecord,
    pub membership: MembershipRecord,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub success: bool,
    pub user: UserRecord,
    pub membership: MembershipRecord,
    /// Present only when the invite created the account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    pub success: bool,
    pub membership: MembershipRecord,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_organization))
        .route("/me/with-projects", get(my_organizations))
        .route("/{organization_id}/invite", post(invite_member))
        .route("/{organization_id}/members", get(list_members))
        .route(
            "/{organization_id}/members/{user_id}",
            patch(update_member_role).delete(remove_member),
        )
}

fn parse_role(raw: Option<&str>, default: Option<MemberRole>) -> Result<MemberRole, ApiError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) => MemberRole::parse_str(r).ok_or_else(|| ApiError::invalid("Invalid role")),
        None => default.ok_or_else(|| ApiError::invalid("role is required")),
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn create_organization(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationResponse>), ApiError> {
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::invalid("name is required"))?;
    let now = Utc::now();
    let organization = OrganizationRecord {
        id: OrgId::new(),
        name,
        email: req.email,
        created_at: now,
        deleted_at: None,
    };
    state.db.create_org(&organization).await?;
    let membership = MembershipRecord {
        id: MembershipId::new(),
        user_id: current.id(),
        organization_id: organization.id,
        role: MemberRole::Admin,
        joined_at: now,
        deleted_at: None,
    };
    state.db.upsert_membership(&membership).await?;

    if current.0.organization_id.is_none() {
        let mut user = current.0.clone();
        user.organization_id = Some(organization.id);
        state.db.update_user(&user).await?;
    }

    tracing::info!(org_id = %organization.id, "organization created");
    Ok((
        StatusCode::CREATED,
        Json(OrganizationResponse {
            success: true,
            organization,
            membership,
        }),
    ))
}

#[tracing::instrument(level = "info", skip_all, fields(%organization_id))]
pub async fn invite_member(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path(organization_id): Path<String>,
    Json(req): Json<InviteRequest>,
) -> Result<(StatusCode, Json<InviteResponse>), ApiError> {
    let org_id: OrgId = parse_id(&organization_id, "organizationId")?;
    require_admin(&state, current.id(), org_id).await?;
    state
        .db
        .get_org(org_id)
        .await?
        .filter(|o| o.deleted_at.is_none())
        .ok_or_else(|| ApiError::not_found("Organization not found"))?;

    let email = req
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::invalid("email is required"))?;
    let role = parse_role(req.role.as_deref(), Some(MemberRole::Member))?;
    let now = Utc::now();

    let (user, temporary_password) = match state.db.get_user_by_email(&email).await? {
        Some(mut user) => {
            if !user.is_active() {
                user.deleted_at = None;
                if user.organization_id.is_none() {
                    user.organization_id = Some(org_id);
                }
                state.db.update_user(&user).await?;
            }
            (user, None)
        }
        None => {
            let password = generate_password();
            let user = UserRecord {
                id: UserId::new(),
                name: req.name.filter(|n| !n.trim().is_empty()),
                email,
                password_hash: hash_password(&password)?,
                organization_id: Some(org_id),
                created_at: now,
                deleted_at: None,
            };
            state.db.create_user(&user).await?;
            (user, Some(password))
        }
    };

    let membership = match state.db.get_membership(user.id, org_id).await? {
        Some(m) if m.is_active() => {
            return Err(ApiError::invalid(
                "User is already a member of this organization",
            ));
        }
        Some(m) => MembershipRecord {
            role,
            joined_at: now,
            deleted_at: None,
            ..m
        },
        None => MembershipRecord {
            id: MembershipId::new(),
            user_id: user.id,
            organization_id: org_id,
            role,
            joined_at: now,
            deleted_at: None,
        },
    };
    state.db.upsert_membership(&membership).await?;

    tracing::info!(user_id = %user.id, role = %role, "member invited");
    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            success: true,
            user,
            membership,
            temporary_password,
        }),
    ))
}

#[tracing::instrument(level = "debug", skip_all, fields(%organization_id))]
pub async fn list_members(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path(organization_id): Path<String>,
) -> Result<Json<Vec<MemberEntry>>, ApiError> {
    let org_id: OrgId = parse_id(&organization_id, "organizationId")?;
    require_member(&state, current.id(), org_id).await?;
    Ok(Json(state.db.list_members(org_id).await?))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn my_organizations(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Vec<OrganizationWithProjects>>, ApiError> {
    Ok(Json(state.db.list_orgs_for_user(current.id()).await?))
}

#[tracing::instrument(level = "info", skip_all, fields(%organization_id, %user_id))]
pub async fn update_member_role(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path((organization_id, user_id)): Path<(String, String)>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<MembershipResponse>, ApiError> {
    let org_id: OrgId = parse_id(&organization_id, "organizationId")?;
    let target: UserId = parse_id(&user_id, "userId")?;
    require_admin(&state, current.id(), org_id).await?;
    let role = parse_role(req.role.as_deref(), None)?;

    let mut membership = state
        .db
        .get_active_membership(target, org_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Membership not found"))?;
    membership.role = role;
    state.db.upsert_membership(&membership).await?;
    Ok(Json(MembershipResponse {
        success: true,
        membership,
    }))
}

/// Soft-deletes both the membership and the user account.
#[tracing::instrument(level = "info", skip_all, fields(%organization_id, %user_id))]
pub async fn remove_member(
    Extension(state): Extension<Arc<AppState>>,
    current: CurrentUser,
    Path((organization_id, user_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let org_id: OrgId = parse_id(&organization_id, "organizationId")?;
    let target: UserId = parse_id(&user_id, "userId")?;
    require_admin(&state, current.id(), org_id).await?;

    let mut membership = state
        .db
        .get_active_membership(target, org_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Membership not found"))?;
    let now = Utc::now();
    membership.deleted_at = Some(now);
    state.db.upsert_membership(&membership).await?;

    if let Some(mut user) = state.db.get_user(target).await? {
        if user.is_active() {
            user.deleted_at = Some(now);
            state.db.update_user(&user).await?;
        }
    }

    Ok(Json(SuccessResponse {
        success: true,
        message: "Member removed".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_default_only_when_absent() {
        assert_eq!(
            parse_role(None, Some(MemberRole::Member)).unwrap(),
            MemberRole::Member
        );
        assert_eq!(parse_role(Some("viewer"), None).unwrap(), MemberRole::Viewer);
        assert!(parse_role(Some("owner"), Some(MemberRole::Member)).is_err());
        assert!(parse_role(None, None).is_err());
    }
}
