//! Backend wiring from configuration. Postgres and Redis are used when
//! configured; otherwise the in-memory store and cache stand in, which is
//! what local development and the tests run against.

use crate::server::AppState;
use querycraft_core::ai::llm::{GeminiClient, TextGenerator};
use querycraft_core::config::AppConfig;
use querycraft_core::sources::DefaultBackendFactory;
use querycraft_core::store::{InMemoryAppDb, InMemoryCache, PostgresAppDb, RedisCache};
use querycraft_core::{AppDb, BackendFactory, Cache};
use std::sync::Arc;

#[tracing::instrument(level = "info", skip_all)]
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let db: Arc<dyn AppDb> = match &config.postgres {
        Some(pg) => {
            let db = PostgresAppDb::connect(pg).await?;
            db.migrate().await?;
            tracing::info!("using postgres store");
            Arc::new(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
            Arc::new(InMemoryAppDb::new())
        }
    };

    let cache: Arc<dyn Cache> = match &config.redis {
        Some(redis) => {
            tracing::info!("using redis schema cache");
            Arc::new(RedisCache::new(redis).await?)
        }
        None => {
            tracing::warn!("REDIS_URL not set; using the in-memory schema cache");
            Arc::new(InMemoryCache::new())
        }
    };

    if config.llm.api_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY not set; AI endpoints will fail");
    }
    let llm: Arc<dyn TextGenerator> = Arc::new(GeminiClient::new(&config.llm)?);
    let backends: Arc<dyn BackendFactory> =
        Arc::new(DefaultBackendFactory::new(config.sources.clone())?);

    Ok(AppState::new(config, db, cache, llm, backends))
}
