//! QueryCraft core library: domain models, persistence traits and the
//! schema / prompt / execution pipeline shared by the HTTP server.

pub mod ai;
pub mod config;
pub mod error;
pub mod models;
pub mod o11y;
pub mod queries;
pub mod schema;
pub mod sources;
pub mod store;

pub use error::{Error, Result};
pub use models::{
    ConnectionId, ExecutedQueryId, FeedbackId, MemberRole, MembershipId, OrgId, ProjectId,
    UserId,
};
pub use sources::models::{QueryOutput, QueryTimings, SourceKind};
pub use sources::traits::{BackendFactory, SqlBackend};
pub use store::traits::{AppDb, Cache};
