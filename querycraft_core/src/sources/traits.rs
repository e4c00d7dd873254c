use crate::Result;
use crate::schema::models::{Relationship, SchemaColumn};
use crate::sources::models::{QueryOutput, SourceKind};
use crate::store::models::ConnectionRecord;
use async_trait::async_trait;

/// A live handle on one external data source.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn query(&self, sql: &str) -> Result<QueryOutput>;

    /// Cheap round trip used to validate credentials before a connection is saved.
    async fn ping(&self) -> Result<()>;

    /// Base-table columns outside the system schemas, ordered by schema, table
    /// and ordinal position.
    async fn fetch_schema(&self) -> Result<Vec<SchemaColumn>>;

    /// Foreign-key edges.
    async fn fetch_relationships(&self) -> Result<Vec<Relationship>>;
}

/// Opens a [`SqlBackend`] for a stored connection.
pub trait BackendFactory: Send + Sync {
    fn open(&self, connection: &ConnectionRecord) -> Result<Box<dyn SqlBackend>>;
}
