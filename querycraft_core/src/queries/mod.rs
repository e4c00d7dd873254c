//! Query generation, refinement and execution flows, plus the access checks
//! they share.

pub mod assistant;
pub mod executor;
pub mod guard;
pub mod history;

use crate::models::{ConnectionId, UserId};
use crate::store::models::{ConnectionRecord, MembershipRecord, ProjectRecord};
use crate::store::traits::AppDb;
use crate::{Error, Result};

pub use assistant::{
    GenerateRequest, GeneratedQuery, QueryAssistant, RefineRequest, RefinedQuery,
};
pub use executor::{ExecutionOutcome, QueryExecutor};
pub use guard::check_viewer_query;
pub use history::format_history;

/// A connection together with the caller's standing in its organization.
#[derive(Debug, Clone)]
pub struct ConnectionAccess {
    pub connection: ConnectionRecord,
    pub project: ProjectRecord,
    pub membership: MembershipRecord,
}

/// Load a connection and require an active membership in the organization
/// owning its project.
#[tracing::instrument(level = "debug", skip(db))]
pub async fn resolve_access(
    db: &dyn AppDb,
    user_id: UserId,
    connection_id: ConnectionId,
) -> Result<ConnectionAccess> {
    let connection = db
        .get_connection(connection_id)
        .await?
        .ok_or_else(|| Error::NotFound("Connection not found".to_string()))?;
    let project = db
        .get_project(connection.project_id)
        .await?
        .ok_or_else(|| Error::NotFound("Project not found".to_string()))?;
    let membership = db
        .get_active_membership(user_id, project.organization_id)
        .await?
        .ok_or_else(|| {
            Error::Forbidden("You do not have access to this connection".to_string())
        })?;
    Ok(ConnectionAccess {
        connection,
        project,
        membership,
    })
}
