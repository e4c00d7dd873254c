use crate::models::ConnectionId;
use crate::schema::introspect::introspect;
use crate::schema::models::{CacheStats, SchemaCache};
use crate::sources::traits::SqlBackend;
use crate::store::traits::Cache;
use crate::{Error, Result};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Schema cache keyed by connection. Entries are replaced whole; concurrent
/// writers race and the last one wins.
#[derive(Clone)]
pub struct SchemaCacheStore {
    cache: Arc<dyn Cache>,
    ttl: Option<Duration>,
}

impl SchemaCacheStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Option<Duration>) -> Self {
        Self { cache, ttl }
    }

    pub fn key(connection_id: ConnectionId) -> String {
        format!("schema:{connection_id}")
    }

    #[tracing::instrument(level = "debug", skip(self, entry), fields(tables = entry.tables.len()))]
    pub async fn put(&self, connection_id: ConnectionId, entry: &SchemaCache) -> Result<()> {
        let body = serde_json::to_vec(entry).map_err(|e| Error::backend("encode schema cache", e))?;
        self.cache
            .set(&Self::key(connection_id), Bytes::from(body), self.ttl)
            .await
    }

    /// Any failure reading or decoding the entry is logged and reported as a miss.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, connection_id: ConnectionId) -> Option<SchemaCache> {
        let raw = match self.cache.get(&Self::key(connection_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "schema cache read failed");
                return None;
            }
        };
        match decode_entry(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "schema cache entry unreadable");
                None
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn invalidate(&self, connection_id: ConnectionId) -> Result<bool> {
        Ok(self.cache.del(&Self::key(connection_id)).await? > 0)
    }

    /// Introspect `backend` and overwrite the entry for `connection_id`.
    #[tracing::instrument(level = "info", skip(self, backend))]
    pub async fn cache_schema(
        &self,
        backend: &dyn SqlBackend,
        connection_id: ConnectionId,
    ) -> Result<CacheStats> {
        let entry = introspect(backend).await?;
        self.put(connection_id, &entry).await?;
        let stats = entry.stats();
        tracing::info!(
            table_count = stats.table_count,
            relationship_count = stats.relationship_count,
            "schema cached"
        );
        Ok(stats)
    }
}

/// Stored entries are JSON objects, but a JSON string wrapping the object is
/// accepted too.
fn decode_entry(raw: &[u8]) -> Result<SchemaCache> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| Error::backend("decode schema cache", e))?;
    let value = match value {
        Value::String(inner) => serde_json::from_str::<Value>(&inner)
            .map_err(|e| Error::backend("decode nested schema cache", e))?,
        other => other,
    };
    serde_json::from_value(value).map_err(|e| Error::backend("schema cache shape", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::models::{Relationship, SchemaColumn};
    use crate::sources::models::{QueryOutput, SourceKind};
    use crate::store::memory::InMemoryCache;
    use async_trait::async_trait;

    struct FixedSchema {
        fail_relationships: bool,
    }

    #[async_trait]
    impl SqlBackend for FixedSchema {
        fn kind(&self) -> SourceKind {
            SourceKind::Trino
        }
        async fn query(&self, _sql: &str) -> Result<QueryOutput> {
            Ok(QueryOutput::default())
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn fetch_schema(&self) -> Result<Vec<SchemaColumn>> {
            Ok(vec![SchemaColumn {
                table_schema: "web".to_string(),
                table_name: "users".to_string(),
                column_name: "id".to_string(),
                data_type: "bigint".to_string(),
            }])
        }
        async fn fetch_relationships(&self) -> Result<Vec<Relationship>> {
            if self.fail_relationships {
                return Err(Error::BackendMessage("no table_constraints".to_string()));
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn cache_schema_writes_under_connection_key() {
        let cache = Arc::new(InMemoryCache::new());
        let store = SchemaCacheStore::new(cache.clone(), None);
        let id = ConnectionId::new();

        let stats = store
            .cache_schema(&FixedSchema { fail_relationships: true }, id)
            .await
            .unwrap();
        assert_eq!(stats.table_count, 1);
        assert_eq!(stats.relationship_count, 0);

        let raw = cache.get(&format!("schema:{id}")).await.unwrap().unwrap();
        let v: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(v["tables"][0]["table_name"], "users");
        assert!(v["cachedAt"].as_i64().unwrap() > 0);

        let entry = store.get(id).await.unwrap();
        assert_eq!(entry.tables.len(), 1);
        assert!(store.invalidate(id).await.unwrap());
        assert!(store.get(id).await.is_none());
    }

    #[tokio::test]
    async fn get_tolerates_string_wrapped_and_garbage_entries() {
        let cache = Arc::new(InMemoryCache::new());
        let store = SchemaCacheStore::new(cache.clone(), None);
        let id = ConnectionId::new();

        let inner = r#"{"tables":[{"table_schema":"a","table_name":"b","column_name":"c","data_type":"int"}],"cachedAt":1}"#;
        let wrapped = serde_json::to_vec(&Value::String(inner.to_string())).unwrap();
        cache
            .set(&SchemaCacheStore::key(id), Bytes::from(wrapped), None)
            .await
            .unwrap();
        let entry = store.get(id).await.unwrap();
        assert_eq!(entry.cached_at, 1);
        assert!(entry.relationships.is_empty());

        cache
            .set(&SchemaCacheStore::key(id), Bytes::from_static(b"not json"), None)
            .await
            .unwrap();
        assert!(store.get(id).await.is_none());
    }
}
