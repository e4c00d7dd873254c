use crate::config::RedisConfig;
use crate::store::traits::{Cache, validate_key};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    prefix: Option<String>,
}

impl RedisCache {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub async fn new(cfg: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(cfg.url.clone())
            .map_err(|e| Error::backend("redis client open", e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::backend("redis connect", e))?;
        Ok(Self {
            manager,
            prefix: cfg.key_prefix.clone(),
        })
    }

    fn scoped_key(prefix: Option<&str>, key: &str) -> Result<String> {
        validate_key(key)?;
        match prefix.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => Ok(format!("{p}:{key}")),
            None => Ok(key.to_string()),
        }
    }

    fn scoped(&self, key: &str) -> Result<String> {
        Self::scoped_key(self.prefix.as_deref(), key)
    }

    /// Round-trip `PING`, used by the `check` command.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend("redis ping", e))?;
        Ok(())
    }
}

#[async_trait]
impl Cache for RedisCache {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let key = self.scoped(key)?;
        let mut conn = self.manager.clone();
        let val: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::backend("redis get", e))?;
        Ok(val.map(Bytes::from))
    }

    #[tracing::instrument(level = "debug", skip(self, value))]
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let key = self.scoped(key)?;
        let mut conn = self.manager.clone();
        if let Some(ttl) = ttl {
            let secs = ttl.as_secs().max(1);
            let _: () = conn
                .set_ex(key, value.to_vec(), secs)
                .await
                .map_err(|e| Error::backend("redis set_ex", e))?;
        } else {
            let _: () = conn
                .set(key, value.to_vec())
                .await
                .map_err(|e| Error::backend("redis set", e))?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn del(&self, key: &str) -> Result<u64> {
        let key = self.scoped(key)?;
        let mut conn = self.manager.clone();
        let n: i64 = conn
            .del(key)
            .await
            .map_err(|e| Error::backend("redis del", e))?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_joined_with_colon() {
        assert_eq!(
            RedisCache::scoped_key(Some("qc"), "schema:abc").unwrap(),
            "qc:schema:abc"
        );
        assert_eq!(
            RedisCache::scoped_key(Some("  "), "schema:abc").unwrap(),
            "schema:abc"
        );
        assert_eq!(RedisCache::scoped_key(None, "k").unwrap(), "k");
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(RedisCache::scoped_key(None, "").is_err());
        assert!(RedisCache::scoped_key(None, "a b").is_err());
    }
}
