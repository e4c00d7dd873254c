use crate::auth::TokenIssuer;
use crate::routes;
use axum::routing::get;
use axum::{Extension, Router};
use querycraft_core::ai::llm::TextGenerator;
use querycraft_core::config::AppConfig;
use querycraft_core::queries::{QueryAssistant, QueryExecutor};
use querycraft_core::schema::SchemaCacheStore;
use querycraft_core::{AppDb, BackendFactory, Cache};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn AppDb>,
    pub backends: Arc<dyn BackendFactory>,
    pub assistant: QueryAssistant,
    pub tokens: TokenIssuer,
    pub started_at: Instant,
}

impl AppState {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        config: AppConfig,
        db: Arc<dyn AppDb>,
        cache: Arc<dyn Cache>,
        llm: Arc<dyn TextGenerator>,
        backends: Arc<dyn BackendFactory>,
    ) -> Self {
        let schemas = SchemaCacheStore::new(cache, config.schema_cache.ttl);
        let assistant = QueryAssistant::new(db.clone(), backends.clone(), llm, schemas);
        Self {
            tokens: TokenIssuer::new(&config.auth),
            db,
            backends,
            assistant,
            started_at: Instant::now(),
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        self.assistant.executor()
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);
    let request_id = axum::http::HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::router())
        .route("/health", get(routes::health::get_health))
        .layer(Extension(state))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[tracing::instrument(level = "info", skip_all, fields(%addr))]
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("querycraft listening");
    axum::serve(listener, app).await?;
    Ok(())
}
